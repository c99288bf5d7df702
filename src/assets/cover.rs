use log::info;

use crate::assets::retry::{AssetOutcome, RetryConfig, RetryPolicy, Sleeper, ThreadSleeper};
use crate::llm::{ImageAsset, ImageGenerator};
use crate::story::node::StoryNode;

/// Shown in place of a cover that could not be generated.
pub const PLACEHOLDER_IMAGE: &str = "https://picsum.photos/seed/mono/800/600";
pub const UNAVAILABLE_LABEL: &str = "IMAGE DATA CORRUPTED";

/// Style suffix appended to every cover prompt.
const COVER_STYLE: &str = "classical oil painting style, masterpiece, highly detailed, NO text, NO neon";

pub fn cover_prompt(base: &str) -> String {
    format!("{}, {COVER_STYLE}", base.trim())
}

/// Prompt for a 3x2 sprite sheet of motif icons themed on the seed.
pub fn icon_sheet_prompt(keyword: &str) -> String {
    format!(
        "A set of 6 distinct minimalist line art icons inspired by the concept keyword '{}', \
         designed as cyberpunk UI elements. Black background, monochrome light grey lines (#CCCCCC). \
         The icons should be simple, geometric, and look like digital blueprints or HUD elements. \
         No text, no gradients. Layout: 3 columns by 2 rows grid.",
        keyword.trim()
    )
}

/// The cover prompt for an epilogue: the generated one, else one built from the grand title.
pub fn epilogue_cover_base(node: &StoryNode) -> Option<String> {
    if let Some(prompt) = &node.cover_art_prompt {
        return Some(prompt.clone());
    }
    node.grand_title
        .as_ref()
        .map(|title| format!("A classical mythological oil painting titled '{title}', a hero at the end of the journey"))
}

/// What the presentation layer should show for an asset slot.
pub fn display_source(outcome: &AssetOutcome<ImageAsset>) -> String {
    match outcome {
        AssetOutcome::Ready(asset) => asset.data_url(),
        _ => PLACEHOLDER_IMAGE.to_string(),
    }
}

/// Cover and icon generation, each behind its own retry/de-duplication policy.
pub struct AssetStudio<G: ImageGenerator, S: Sleeper = ThreadSleeper> {
    generator: G,
    covers: RetryPolicy<S>,
    icons: RetryPolicy<S>,
}

impl<G: ImageGenerator> AssetStudio<G> {
    pub fn new(generator: G, config: RetryConfig) -> Self {
        Self {
            generator,
            covers: RetryPolicy::new(config.clone()),
            icons: RetryPolicy::new(config),
        }
    }
}

impl<G: ImageGenerator, S: Sleeper> AssetStudio<G, S> {
    pub fn with_policies(generator: G, covers: RetryPolicy<S>, icons: RetryPolicy<S>) -> Self {
        Self {
            generator,
            covers,
            icons,
        }
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Generate the epilogue cover for `base_prompt`. An empty prompt is never sent.
    pub fn cover(&self, base_prompt: &str) -> AssetOutcome<ImageAsset> {
        if base_prompt.trim().is_empty() {
            return AssetOutcome::Unavailable {
                attempts: 0,
                reason: "no cover prompt".into(),
            };
        }
        let prompt = cover_prompt(base_prompt);
        info!("Generating cover");
        self.covers
            .run(&prompt, |_| self.generator.generate_image(&prompt))
    }

    pub fn epilogue_cover(&self, node: &StoryNode) -> AssetOutcome<ImageAsset> {
        match epilogue_cover_base(node) {
            Some(base) => self.cover(&base),
            None => AssetOutcome::Unavailable {
                attempts: 0,
                reason: "epilogue carries no cover prompt".into(),
            },
        }
    }

    /// Generate the motif sprite sheet for a seed keyword.
    pub fn icon_sheet(&self, keyword: &str) -> AssetOutcome<ImageAsset> {
        if keyword.trim().is_empty() {
            return AssetOutcome::Skipped;
        }
        let prompt = icon_sheet_prompt(keyword);
        info!("Generating icon sheet for \"{}\"", keyword.trim());
        self.icons
            .run(&prompt, |_| self.generator.generate_image(&prompt))
    }

    /// Allow both prompts to be requested again, e.g. after a session reset.
    pub fn forget(&self) {
        self.covers.forget();
        self.icons.forget();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::assets::retry::tests::RecordingSleeper;
    use crate::error::{Result, StoryError};

    struct FlakyImages {
        failures_left: Mutex<u32>,
        prompts: Mutex<Vec<String>>,
    }

    impl FlakyImages {
        fn failing(times: u32) -> Self {
            Self {
                failures_left: Mutex::new(times),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    impl ImageGenerator for FlakyImages {
        fn generate_image(&self, prompt: &str) -> Result<ImageAsset> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(StoryError::AssetGenerationFailure("no image data".into()));
            }
            Ok(ImageAsset::from_bytes(b"png", "image/png"))
        }
    }

    fn studio(failures: u32) -> AssetStudio<FlakyImages, RecordingSleeper> {
        AssetStudio::with_policies(
            FlakyImages::failing(failures),
            RetryPolicy::with_sleeper(RetryConfig::default(), RecordingSleeper::default()),
            RetryPolicy::with_sleeper(RetryConfig::default(), RecordingSleeper::default()),
        )
    }

    #[test]
    fn test_cover_prompt_is_styled_and_deduplicated() {
        let studio = studio(1);
        let outcome = studio.cover("A hero ascending Olympus");
        assert!(matches!(outcome, AssetOutcome::Ready(_)));
        assert!(display_source(&outcome).starts_with("data:image/png;base64,"));

        let prompts = studio.generator().prompts.lock().unwrap().clone();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].starts_with("A hero ascending Olympus, classical oil painting style"));

        assert_eq!(studio.cover("A hero ascending Olympus"), AssetOutcome::Skipped);
        assert_eq!(studio.generator().prompts.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_cover_failure_falls_back_to_placeholder() {
        let studio = studio(10);
        let outcome = studio.cover("A storm over Ithaca");
        assert!(outcome.is_unavailable());
        assert_eq!(display_source(&outcome), PLACEHOLDER_IMAGE);
        assert_eq!(studio.generator().prompts.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_icons_and_covers_have_separate_keys() {
        let studio = studio(0);
        assert!(studio.icon_sheet("freedom").ready().is_some());
        assert!(studio.cover("freedom").ready().is_some());
        assert_eq!(studio.icon_sheet("freedom"), AssetOutcome::Skipped);

        studio.forget();
        assert!(studio.icon_sheet("freedom").ready().is_some());
    }

    #[test]
    fn test_empty_prompt_is_never_sent() {
        let studio = studio(0);
        assert!(studio.cover("   ").is_unavailable());
        assert_eq!(studio.icon_sheet(""), AssetOutcome::Skipped);
        assert!(studio.generator().prompts.lock().unwrap().is_empty());
    }
}
