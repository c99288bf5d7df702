use std::sync::LazyLock;

use log::debug;
use regex::Regex;
use serde::Deserialize;

use crate::error::{Result, StoryError};
use crate::story::node::{Choice, StoryNode};

static RE_THINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("think pattern"));
static RE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json|JSON)?").expect("fence pattern"));

// ---------------------------------------------------------------------------
// Wire shape
// ---------------------------------------------------------------------------

/// What the generator is asked to produce. Every field is optional here; presence is
/// checked explicitly below so the error names what is missing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNode {
    narrative: Option<String>,
    title: Option<String>,
    stage: Option<String>,
    choices: Option<Vec<RawChoice>>,
    grand_title: Option<String>,
    cover_art_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChoice {
    id: Option<String>,
    short_desc: Option<String>,
    text: Option<String>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Remove reasoning blocks and code fences, then cut down to the outermost JSON object.
pub fn strip_markup(raw: &str) -> String {
    for cap in RE_THINK.captures_iter(raw) {
        let thought = cap.get(1).map_or("", |m| m.as_str()).trim();
        if !thought.is_empty() {
            debug!("Model thinking:\n{thought}");
        }
    }
    let without_think = RE_THINK.replace_all(raw, "");
    let unfenced = RE_FENCE.replace_all(&without_think, "");
    let trimmed = unfenced.trim();

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => trimmed[start..=end].to_string(),
        _ => trimmed.to_string(),
    }
}

/// Parse one raw text-service reply into a [`StoryNode`].
///
/// The returned node has `step == 0`; the session stamps the real step number.
pub fn parse_story_node(raw: &str) -> Result<StoryNode> {
    let json_str = strip_markup(raw);
    debug!("Extracted JSON: {json_str}");

    if json_str.is_empty() {
        return Err(StoryError::MalformedResponse("reply was empty".into()));
    }

    let parsed: RawNode = serde_json::from_str(&json_str)
        .map_err(|e| StoryError::MalformedResponse(format!("reply is not a valid story object: {e}")))?;

    let narrative = non_blank(parsed.narrative)
        .ok_or_else(|| StoryError::MalformedResponse("`narrative` missing or empty".into()))?;

    let raw_choices = parsed.choices.unwrap_or_default();
    if !(raw_choices.is_empty() || raw_choices.len() == 2) {
        return Err(StoryError::MalformedResponse(format!(
            "expected 0 or 2 choices, got {}",
            raw_choices.len()
        )));
    }

    let choices = raw_choices
        .into_iter()
        .enumerate()
        .map(|(i, c)| validate_choice(i, c))
        .collect::<Result<Vec<_>>>()?;

    if let [first, second] = choices.as_slice() {
        if first.id == second.id {
            return Err(StoryError::MalformedResponse(format!(
                "both choices share the id '{}'",
                first.id
            )));
        }
    }

    let mut node = StoryNode::new(narrative, choices);
    node.title = non_blank(parsed.title);
    node.stage = non_blank(parsed.stage);
    node.grand_title = non_blank(parsed.grand_title);
    node.cover_art_prompt = non_blank(parsed.cover_art_prompt);
    Ok(node)
}

fn validate_choice(index: usize, raw: RawChoice) -> Result<Choice> {
    let missing =
        |field: &str| StoryError::MalformedResponse(format!("choice {index} is missing `{field}`"));
    Ok(Choice {
        id: non_blank(raw.id).ok_or_else(|| missing("id"))?,
        short_desc: non_blank(raw.short_desc).ok_or_else(|| missing("shortDesc"))?,
        text: non_blank(raw.text).ok_or_else(|| missing("text"))?,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
