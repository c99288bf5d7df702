use std::env;
use std::time::Duration;

use log::{debug, info, trace};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use crate::error::{Result, StoryError};
use crate::llm::{ChatMessage, ImageAsset, ImageGenerator, TextGenerator};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub text_model: String,
    pub image_model: String,
    /// Aspect ratio requested for generated images.
    pub aspect_ratio: String,
    pub request_timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            text_model: "gemini-2.5-flash".to_string(),
            image_model: "imagen-4.0-generate-001".to_string(),
            aspect_ratio: "16:9".to_string(),
            request_timeout: Duration::from_secs(90),
        }
    }
}

impl GeminiConfig {
    /// Read `GEMINI_API_KEY` (or `GOOGLE_API_KEY`), `GEMINI_API_BASE`,
    /// `MONOMYTH_TEXT_MODEL` and `MONOMYTH_IMAGE_MODEL`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY")),
            api_base: non_empty_env("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            text_model: non_empty_env("MONOMYTH_TEXT_MODEL").unwrap_or(defaults.text_model),
            image_model: non_empty_env("MONOMYTH_IMAGE_MODEL").unwrap_or(defaults.image_model),
            ..defaults
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Gemini `generateContent` for story steps and Imagen `predict` for pictures.
pub struct GeminiClient {
    config: GeminiConfig,
    http: HttpClient,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            config,
            http: HttpClient::new(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(GeminiConfig::from_env())
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    fn api_key(&self) -> Result<&str> {
        self.config.api_key.as_deref().ok_or_else(|| {
            StoryError::CredentialMissing("GEMINI_API_KEY or GOOGLE_API_KEY not set".into())
        })
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:{}", self.config.api_base, model_path, method)
    }

    fn post_json(&self, endpoint: &str, payload: &Value) -> Result<Value> {
        let api_key = self.api_key()?;
        debug!("POST {endpoint}");
        let response = self
            .http
            .post(endpoint)
            .query(&[("key", api_key)])
            .timeout(self.config.request_timeout)
            .json(payload)
            .send()
            .map_err(|e| StoryError::NetworkFailure(format!("request to {endpoint} failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| StoryError::NetworkFailure(format!("response body read failed: {e}")))?;
        trace!("Gemini response ({}): {body}", status.as_u16());

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(StoryError::CredentialMissing(format!(
                "service rejected the API key ({})",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(StoryError::NetworkFailure(format!(
                "request failed ({}): {}",
                status.as_u16(),
                truncate_text(&body, 512)
            )));
        }
        serde_json::from_str(&body)
            .map_err(|e| StoryError::NetworkFailure(format!("service returned invalid JSON: {e}")))
    }
}

/// Build a `generateContent` payload: system turns become `systemInstruction`,
/// assistant turns are sent with the `model` role.
pub fn build_text_payload(context: &[ChatMessage], prompt: &str) -> Value {
    let system_text = context
        .iter()
        .filter(|m| m.is_system())
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut contents: Vec<Value> = context
        .iter()
        .filter(|m| !m.is_system())
        .map(|m| {
            let role = if m.role == "assistant" { "model" } else { "user" };
            json!({ "role": role, "parts": [{ "text": m.content }] })
        })
        .collect();
    contents.push(json!({ "role": "user", "parts": [{ "text": prompt }] }));

    let mut payload = json!({
        "contents": contents,
        "generationConfig": { "responseMimeType": "application/json" },
    });
    if !system_text.is_empty() {
        payload["systemInstruction"] = json!({ "parts": [{ "text": system_text }] });
    }
    payload
}

/// Concatenate the text parts of the first candidate.
pub fn extract_reply_text(payload: &Value) -> Result<String> {
    let parts = payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let text = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<String>();

    if text.trim().is_empty() {
        return Err(StoryError::MalformedResponse(
            "service reply contained no text".into(),
        ));
    }
    Ok(text)
}

/// Pull the first encoded image out of an Imagen `predict` reply.
pub fn extract_image(payload: &Value) -> Result<ImageAsset> {
    let predictions = payload
        .get("predictions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for row in predictions {
        let Some(obj) = row.as_object() else {
            continue;
        };
        if let Some(encoded) = obj
            .get("bytesBase64Encoded")
            .or_else(|| obj.get("bytes_base64_encoded"))
            .and_then(Value::as_str)
        {
            let mime = obj.get("mimeType").and_then(Value::as_str);
            return ImageAsset::from_base64(encoded, mime);
        }
    }

    Err(StoryError::AssetGenerationFailure(
        "no image data received; the safety filter may have been triggered".into(),
    ))
}

impl TextGenerator for GeminiClient {
    fn send_step(&mut self, context: &[ChatMessage], prompt: &str) -> Result<String> {
        info!(
            "=== GEMINI CALL: {} context messages, model {} ===",
            context.len(),
            self.config.text_model
        );
        let endpoint = self.endpoint(&self.config.text_model, "generateContent");
        let payload = build_text_payload(context, prompt);
        let response = self.post_json(&endpoint, &payload)?;
        let text = extract_reply_text(&response)?;
        info!("Gemini replied with {} chars", text.len());
        Ok(text)
    }
}

impl ImageGenerator for GeminiClient {
    fn generate_image(&self, prompt: &str) -> Result<ImageAsset> {
        info!("Requesting image from {}", self.config.image_model);
        debug!("Image prompt: {prompt}");
        let endpoint = self.endpoint(&self.config.image_model, "predict");
        let payload = json!({
            "instances": [{ "prompt": prompt }],
            "parameters": {
                "sampleCount": 1,
                "aspectRatio": self.config.aspect_ratio,
            },
        });
        let response = self.post_json(&endpoint, &payload).map_err(|e| match e {
            missing @ StoryError::CredentialMissing(_) => missing,
            other => StoryError::AssetGenerationFailure(other.to_string()),
        })?;
        extract_image(&response)
    }
}

fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_payload_roles() {
        let context = vec![
            ChatMessage::system("You are the narrator."),
            ChatMessage::user("Begin."),
            ChatMessage::assistant("{\"narrative\":\"A gate.\"}"),
        ];
        let payload = build_text_payload(&context, "User choice: A");
        assert_eq!(
            payload["systemInstruction"]["parts"][0]["text"],
            "You are the narrator."
        );
        let contents = payload["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["role"], "user");
        assert_eq!(contents[2]["parts"][0]["text"], "User choice: A");
        assert_eq!(
            payload["generationConfig"]["responseMimeType"],
            "application/json"
        );
    }

    #[test]
    fn test_extract_reply_text() {
        let payload = json!({
            "candidates": [{ "content": { "parts": [{ "text": "{\"narrative\":" }, { "text": "\"x\"}" }] } }]
        });
        assert_eq!(extract_reply_text(&payload).unwrap(), "{\"narrative\":\"x\"}");

        let empty = json!({ "candidates": [] });
        assert!(matches!(
            extract_reply_text(&empty),
            Err(StoryError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_extract_image() {
        let payload = json!({
            "predictions": [{ "bytesBase64Encoded": "iVBORw==", "mimeType": "image/png" }]
        });
        let asset = extract_image(&payload).unwrap();
        assert_eq!(asset.mime_type, "image/png");
        assert_eq!(asset.base64, "iVBORw==");

        let filtered = json!({ "predictions": [] });
        assert!(matches!(
            extract_image(&filtered),
            Err(StoryError::AssetGenerationFailure(_))
        ));
    }

    #[test]
    fn test_missing_key_is_credential_error() {
        let mut client = GeminiClient::new(GeminiConfig::default());
        let err = client.send_step(&[], "hello").unwrap_err();
        assert!(matches!(err, StoryError::CredentialMissing(_)));
    }

    #[test]
    fn test_endpoint_prefixes_models() {
        let client = GeminiClient::new(GeminiConfig::default());
        assert_eq!(
            client.endpoint("gemini-2.5-flash", "generateContent"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }
}
