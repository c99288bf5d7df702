mod play;

use anyhow::{Context, Result};
use log::info;

use monomyth::assets::{AssetStudio, RetryConfig};
use monomyth::llm::gemini::GeminiClient;
use monomyth::llm::TextGenerator;
use monomyth::story::SessionConfig;

const USAGE: &str = "Usage: monomyth [max_steps]\n\
     \n\
     Environment:\n  GEMINI_API_KEY        key for the Gemini text and Imagen services\n  \
     MONOMYTH_TEXT_MODEL   text model (default gemini-2.5-flash)\n  \
     MONOMYTH_IMAGE_MODEL  image model (default imagen-4.0-generate-001)\n  \
     MONOMYTH_LOCAL_MODEL  path to a GGUF model (requires the `local-model` feature)\n\
     \n\
     Logging: set RUST_LOG=debug or RUST_LOG=trace for verbose output";

fn main() -> Result<()> {
    // Initialize logging. Control verbosity with RUST_LOG env var:
    //   RUST_LOG=info   cargo run   # transitions, generation calls, asset outcomes
    //   RUST_LOG=debug  cargo run   # + prompts and extracted JSON
    //   RUST_LOG=trace  cargo run   # + raw service replies
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        println!("{USAGE}");
        return Ok(());
    }

    let mut config = SessionConfig::default();
    if let Some(raw) = args.get(1) {
        config.max_steps = raw
            .parse()
            .ok()
            .filter(|n: &u32| *n > 0)
            .with_context(|| format!("invalid max_steps '{raw}'\n\n{USAGE}"))?;
    }
    info!("Journey length: {} steps + epilogue", config.max_steps);

    let mut text = text_backend()?;
    let studio = AssetStudio::new(GeminiClient::from_env(), RetryConfig::default());

    play::run(text.as_mut(), studio, config)
}

#[cfg(feature = "local-model")]
fn text_backend() -> Result<Box<dyn TextGenerator>> {
    use monomyth::llm::local::{LocalModel, ModelConfig};

    match std::env::var("MONOMYTH_LOCAL_MODEL") {
        Ok(path) if !path.trim().is_empty() => {
            println!("Loading model: {path}");
            let model = LocalModel::load(path.trim(), ModelConfig::default())
                .context("failed to load model")?;
            Ok(Box::new(model))
        }
        _ => Ok(Box::new(GeminiClient::from_env())),
    }
}

#[cfg(not(feature = "local-model"))]
fn text_backend() -> Result<Box<dyn TextGenerator>> {
    Ok(Box::new(GeminiClient::from_env()))
}
