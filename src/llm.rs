//! Boundary to the external generation services.
//!
//! The session engine only ever talks to [`TextGenerator`] and [`ImageGenerator`]; the
//! Gemini HTTP transport and the optional local GGUF backend are the two implementations
//! shipped with the crate.

pub mod gemini;
#[cfg(feature = "local-model")]
pub mod local;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{Result, StoryError};

// ---------------------------------------------------------------------------
// Chat message helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }

    pub fn is_system(&self) -> bool {
        self.role == "system"
    }
}

impl std::fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.role, self.content)
    }
}

// ---------------------------------------------------------------------------
// Service traits
// ---------------------------------------------------------------------------

/// One step request against a conversational text model.
///
/// `context` is the conversation so far (system instruction first, then alternating user and
/// assistant turns); `prompt` is the new user turn. Implementations return the raw reply text
/// and must not keep conversation state of their own: two sessions never share a context.
pub trait TextGenerator {
    fn send_step(&mut self, context: &[ChatMessage], prompt: &str) -> Result<String>;
}

/// Prompt in, encoded image out.
pub trait ImageGenerator {
    fn generate_image(&self, prompt: &str) -> Result<ImageAsset>;
}

impl<T: TextGenerator + ?Sized> TextGenerator for Box<T> {
    fn send_step(&mut self, context: &[ChatMessage], prompt: &str) -> Result<String> {
        (**self).send_step(context, prompt)
    }
}

impl<T: ImageGenerator + ?Sized> ImageGenerator for Box<T> {
    fn generate_image(&self, prompt: &str) -> Result<ImageAsset> {
        (**self).generate_image(prompt)
    }
}

// ---------------------------------------------------------------------------
// Generated image
// ---------------------------------------------------------------------------

/// A generated image, kept in the base64 form the service delivers it in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    pub base64: String,
    pub mime_type: String,
}

impl ImageAsset {
    /// Wrap service-provided base64, rejecting payloads that do not decode.
    pub fn from_base64(encoded: impl Into<String>, mime_type: Option<&str>) -> Result<Self> {
        let encoded = encoded.into();
        let trimmed = encoded.trim();
        if trimmed.is_empty() {
            return Err(StoryError::AssetGenerationFailure(
                "no image data received".into(),
            ));
        }
        BASE64.decode(trimmed.as_bytes()).map_err(|e| {
            StoryError::AssetGenerationFailure(format!("image base64 decode failed: {e}"))
        })?;
        Ok(Self {
            base64: trimmed.to_string(),
            mime_type: mime_type.unwrap_or("image/png").to_string(),
        })
    }

    pub fn from_bytes(bytes: &[u8], mime_type: &str) -> Self {
        Self {
            base64: BASE64.encode(bytes),
            mime_type: mime_type.to_string(),
        }
    }

    pub fn bytes(&self) -> Result<Vec<u8>> {
        BASE64.decode(self.base64.as_bytes()).map_err(|e| {
            StoryError::AssetGenerationFailure(format!("image base64 decode failed: {e}"))
        })
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_asset_data_url() {
        let asset = ImageAsset::from_bytes(b"\x89PNG", "image/png");
        assert_eq!(asset.data_url(), "data:image/png;base64,iVBORw==");
        assert_eq!(asset.bytes().unwrap(), b"\x89PNG".to_vec());
    }

    #[test]
    fn test_image_asset_rejects_garbage() {
        let err = ImageAsset::from_base64("not base64 !!", None).unwrap_err();
        assert!(matches!(err, StoryError::AssetGenerationFailure(_)));
        let err = ImageAsset::from_base64("   ", None).unwrap_err();
        assert!(matches!(err, StoryError::AssetGenerationFailure(_)));
    }

    #[test]
    fn test_chat_message_display() {
        let msg = ChatMessage::assistant("{\"narrative\":\"...\"}");
        assert_eq!(msg.to_string(), "[assistant]: {\"narrative\":\"...\"}");
        assert!(ChatMessage::system("x").is_system());
    }
}
