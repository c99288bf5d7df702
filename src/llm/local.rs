//! Offline text backend running a GGUF model through llama.cpp.

use std::num::NonZeroU32;
use std::pin::pin;

use anyhow::{Context, Result};
use log::{debug, info, trace};

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;

use crate::error::StoryError;
use crate::llm::{ChatMessage, TextGenerator};

// ---------------------------------------------------------------------------
// Model configuration
// ---------------------------------------------------------------------------

pub struct ModelConfig {
    /// How many layers to offload to GPU (0 = CPU only).
    pub n_gpu_layers: u32,
    /// Context window size in tokens. Story steps accumulate, so keep this roomy.
    pub n_ctx: u32,
    /// Maximum tokens to generate per step.
    pub max_tokens: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_gpu_layers: 0,
            n_ctx: 8192,
            max_tokens: 1024,
        }
    }
}

fn build_sampler() -> LlamaSampler {
    LlamaSampler::chain_simple([
        LlamaSampler::penalties(64, 1.1, 0.0, 0.0),
        LlamaSampler::top_k(40),
        LlamaSampler::top_p(0.95, 1),
        LlamaSampler::min_p(0.0, 1),
        LlamaSampler::temp(0.9),
        LlamaSampler::dist(1234),
    ])
}

// ---------------------------------------------------------------------------
// LocalModel: loaded model handle
// ---------------------------------------------------------------------------

pub struct LocalModel {
    #[allow(dead_code)]
    backend: &'static LlamaBackend,
    model: &'static LlamaModel,
    ctx: LlamaContext<'static>,
    n_ctx: u32,
    max_tokens: usize,
}

impl LocalModel {
    pub fn load(model_path: &str, config: ModelConfig) -> Result<Self> {
        let backend: &'static LlamaBackend = Box::leak(Box::new(
            LlamaBackend::init().context("failed to init llama backend")?,
        ));

        info!("Loading model from: {model_path}");
        info!(
            "  config: n_gpu_layers={}, n_ctx={}, max_tokens={}",
            config.n_gpu_layers, config.n_ctx, config.max_tokens
        );

        let model_params = pin!(LlamaModelParams::default().with_n_gpu_layers(config.n_gpu_layers));
        let model: &'static LlamaModel = Box::leak(Box::new(
            LlamaModel::load_from_file(backend, model_path, &model_params)
                .context("failed to load model")?,
        ));

        let n_ctx = NonZeroU32::new(config.n_ctx).context("n_ctx must be > 0")?;
        let ctx = model
            .new_context(backend, LlamaContextParams::default().with_n_ctx(Some(n_ctx)))
            .context("failed to create inference context")?;

        Ok(Self {
            backend,
            model,
            ctx,
            n_ctx: config.n_ctx,
            max_tokens: config.max_tokens,
        })
    }

    /// Tokenize the conversation, feed it, and sample until end-of-generation.
    fn generate(&mut self, messages: &[ChatMessage]) -> Result<String> {
        info!("=== LOCAL CALL: {} messages ===", messages.len());
        for (i, msg) in messages.iter().enumerate() {
            debug!("  msg[{i}] {msg}");
        }

        self.ctx.clear_kv_cache();
        let mut sampler = build_sampler();

        let llama_msgs: Vec<LlamaChatMessage> = messages
            .iter()
            .map(|m| LlamaChatMessage::new(m.role.clone(), m.content.clone()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to create chat messages")?;

        let tmpl = self
            .model
            .chat_template(None)
            .context("model has no chat template")?;
        let prompt = self
            .model
            .apply_chat_template(&tmpl, &llama_msgs, true)
            .context("failed to apply chat template")?;

        trace!("=== RENDERED PROMPT ===\n{prompt}\n=== END PROMPT ===");

        let tokens = self
            .model
            .str_to_token(&prompt, AddBos::Always)
            .context("tokenization failed")?;
        if tokens.is_empty() {
            anyhow::bail!("prompt tokenized to nothing");
        }
        if tokens.len() >= self.n_ctx as usize {
            anyhow::bail!(
                "conversation of {} tokens does not fit the {} token context",
                tokens.len(),
                self.n_ctx
            );
        }

        let mut batch = LlamaBatch::new(self.n_ctx as usize, 1);
        let last_idx = (tokens.len() - 1) as i32;
        for (i, tok) in (0i32..).zip(tokens.iter()) {
            batch.add(*tok, i, &[0], i == last_idx)?;
        }
        self.ctx.decode(&mut batch).context("initial decode failed")?;

        let mut output = String::new();
        let mut decoder = encoding_rs::UTF_8.new_decoder();
        let mut n_cur = batch.n_tokens();

        for _ in 0..self.max_tokens {
            let tok = sampler.sample(&self.ctx, batch.n_tokens() - 1);
            sampler.accept(tok);

            if self.model.is_eog_token(tok) {
                debug!("Hit EOG token, stopping generation");
                break;
            }

            let piece = self
                .model
                .token_to_piece(tok, &mut decoder, true, None)
                .context("token_to_piece failed")?;
            output.push_str(&piece);

            batch.clear();
            batch.add(tok, n_cur, &[0], true)?;
            self.ctx.decode(&mut batch).context("decode step failed")?;
            n_cur += 1;
        }

        info!("Local model produced {} chars", output.len());
        trace!("=== RAW OUTPUT ===\n{output}\n=== END OUTPUT ===");
        Ok(output)
    }
}

impl TextGenerator for LocalModel {
    fn send_step(&mut self, context: &[ChatMessage], prompt: &str) -> crate::error::Result<String> {
        let mut messages = context.to_vec();
        messages.push(ChatMessage::user(prompt));
        self.generate(&messages).map_err(backend_failure)
    }
}

/// Decode or context failures are transient from the session's point of view.
fn backend_failure(err: anyhow::Error) -> StoryError {
    StoryError::NetworkFailure(format!("{err:#}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_cpu_with_roomy_context() {
        let config = ModelConfig::default();
        assert_eq!(config.n_gpu_layers, 0);
        assert_eq!(config.n_ctx, 8192);
        assert!(config.max_tokens > 0);
        assert!(config.max_tokens < config.n_ctx as usize);
    }

    #[test]
    fn test_backend_failure_is_retriable_and_keeps_context() {
        let err = anyhow::anyhow!("KV cache full").context("decode failed at token 812");
        let mapped = backend_failure(err);
        assert!(mapped.is_retriable());
        match mapped {
            StoryError::NetworkFailure(message) => {
                assert!(message.contains("decode failed at token 812"));
                assert!(message.contains("KV cache full"));
            }
            other => panic!("expected NetworkFailure, got {other:?}"),
        }
    }
}
