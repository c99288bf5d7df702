use serde::Serialize;

/// Stage label stamped on the epilogue node.
pub const END_STAGE: &str = "THE END";

/// One of the two paths offered at a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Choice {
    /// Stable label, "A" or "B" by convention.
    pub id: String,
    /// Short imperative label shown on the control.
    pub short_desc: String,
    /// Consequence prose revealed after the choice is committed.
    pub text: String,
}

/// A single generated narrative beat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryNode {
    /// 1-indexed position in the session history.
    pub step: u32,
    /// Advisory phase label (e.g. "Separation"), or [`END_STAGE`] on the epilogue.
    pub stage: Option<String>,
    pub title: Option<String>,
    pub narrative: String,
    /// Either empty (terminal node) or exactly two entries.
    pub choices: Vec<Choice>,
    selected_id: Option<String>,
    pub grand_title: Option<String>,
    pub cover_art_prompt: Option<String>,
}

impl StoryNode {
    pub(crate) fn new(narrative: String, choices: Vec<Choice>) -> Self {
        Self {
            step: 0,
            stage: None,
            title: None,
            narrative,
            choices,
            selected_id: None,
            grand_title: None,
            cover_art_prompt: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.choices.is_empty()
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected_id.as_deref()
    }

    pub fn choice(&self, id: &str) -> Option<&Choice> {
        self.choices.iter().find(|c| c.id == id)
    }

    /// The committed choice, whose `text` is the consequence to reveal.
    pub fn selected_choice(&self) -> Option<&Choice> {
        self.selected_id.as_deref().and_then(|id| self.choice(id))
    }

    /// Record the user's choice. Returns `false` when a choice was already recorded;
    /// the first one always wins.
    pub(crate) fn select(&mut self, id: &str) -> bool {
        if self.selected_id.is_some() {
            return false;
        }
        self.selected_id = Some(id.to_string());
        true
    }

    /// Backfill the fields every epilogue must carry.
    pub(crate) fn seal_epilogue(&mut self, hero_name: &str) {
        if self.stage.as_deref() != Some(END_STAGE) {
            self.stage = Some(END_STAGE.to_string());
        }
        if self.grand_title.is_none() {
            self.grand_title = Some(fallback_grand_title(hero_name));
        }
    }
}

/// Deterministic closing title used when the generator does not supply one.
pub fn fallback_grand_title(hero_name: &str) -> String {
    format!("THE LEGEND OF {}", hero_name.trim().to_uppercase())
}
