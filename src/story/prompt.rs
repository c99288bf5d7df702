// ---------------------------------------------------------------------------
// Prompt construction
// ---------------------------------------------------------------------------

/// Narrator instruction sent as the system turn of every conversation. The pacing guide is
/// appended per session, see [`pacing_guide`].
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "\
You are the MONOMYTH NARRATOR, an omniscient storyteller guiding a soul through the Hero's \
Journey as described by Joseph Campbell.

Hero: you receive a hero name. Narrate strictly in the third person using that name. \
Never address the reader as \"you\".

Setting: ancient Greek myth only. Gods, monsters, prophecy, curses. No digital or technical \
vocabulary. Never state the user's seed word; show its absence or a symbol of it.

Style: show, don't tell. Every step carries at least one sensory detail. Keep each narrative \
under 120 words.

Choices: never a yes/no pair. Option A is the Lion (direct, forceful, physical, high risk). \
Option B is the Fox (subtle, observant, mystical, gains insight). Both must move the story \
forward.

Language: detect the language of the seed and write every narrative, choice and title in that \
language. JSON keys always stay in English.

Output strictly one JSON object:
{\"title\": \"<short chapter title>\", \"stage\": \"<journey phase>\", \"narrative\": \"<prose>\",
 \"choices\": [{\"id\": \"A\", \"shortDesc\": \"<2-5 words>\", \"text\": \"<consequence>\"},
               {\"id\": \"B\", \"shortDesc\": \"<2-5 words>\", \"text\": \"<consequence>\"}]}
For the epilogue return \"choices\": [], \"stage\": \"THE END\", a \"grandTitle\" for the whole \
myth, and a \"coverArtPrompt\" describing a classical Renaissance oil painting of the ending.";

/// Spread the three journey phases over `max_steps` steps and name the epilogue step.
pub fn pacing_guide(max_steps: u32) -> String {
    let separation_end = max_steps.div_ceil(3);
    let initiation_end = (2 * max_steps).div_ceil(3);

    let mut guide = format!("Pacing ({max_steps} steps, then an epilogue):\n");
    push_phase(
        &mut guide,
        1,
        separation_end,
        "Separation",
        "the Call to Adventure, the Refusal, Crossing the First Threshold.",
    );
    push_phase(
        &mut guide,
        separation_end + 1,
        initiation_end,
        "Initiation",
        "the Road of Trials; the last of these is the Ordeal, the darkest point.",
    );
    push_phase(
        &mut guide,
        initiation_end + 1,
        max_steps,
        "Return",
        "the Ultimate Boon, the Magic Flight, Master of Two Worlds.",
    );
    guide.push_str(&format!(
        "- Step {} (THE END): the epilogue. No choices, only the closing reflection and a grand title.",
        max_steps + 1
    ));
    guide
}

fn push_phase(guide: &mut String, first: u32, last: u32, phase: &str, beats: &str) {
    if first > last {
        return;
    }
    let span = if first == last {
        format!("Step {first}")
    } else {
        format!("Steps {first}-{last}")
    };
    guide.push_str(&format!("- {span} ({phase}): {beats}\n"));
}

pub fn opening_prompt(seed: &str, hero_name: &str) -> String {
    format!(
        "User Seed: \"{seed}\". Hero Name: \"{hero_name}\". Begin the story at Step 1. Output JSON."
    )
}

/// Prompt for steps 2..=max_steps. The final pre-epilogue step is told to bring the arc home.
pub fn continuation_prompt(
    choice_id: &str,
    short_desc: &str,
    next_step: u32,
    max_steps: u32,
) -> String {
    let directive = if next_step == max_steps {
        "**IMPORTANT: This is the FINAL STEP before the epilogue. Bring the story to a close, \
         but still offer two choices.**"
    } else {
        "Keep the narrative going, do NOT end the story yet."
    };
    format!(
        "User choice: {choice_id} ({short_desc}).\n\
         MISSION: Generate **Step {next_step}** of {max_steps}.\n\
         {directive}\n\
         Output JSON."
    )
}

pub fn epilogue_prompt(choice_id: &str, short_desc: &str, hero_name: &str) -> String {
    format!(
        "User choice: {choice_id} ({short_desc}).\n\
         MISSION: The journey is complete. Generate the EPILOGUE for {hero_name}.\n\
         Set \"stage\" to \"THE END\" and return an empty \"choices\" array: [].\n\
         Include a majestic \"grandTitle\" for the whole myth and a \"coverArtPrompt\" describing \
         a classical mythological oil painting of the ending.\n\
         Output JSON."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opening_embeds_inputs() {
        let p = opening_prompt("freedom", "Orion");
        assert!(p.contains("\"freedom\""));
        assert!(p.contains("\"Orion\""));
        assert!(p.contains("Step 1"));
    }

    #[test]
    fn test_continuation_flags_last_step() {
        let mid = continuation_prompt("A", "Seize the gate", 3, 6);
        assert!(mid.contains("Step 3** of 6"));
        assert!(mid.contains("do NOT end"));

        let last = continuation_prompt("B", "Read the omens", 6, 6);
        assert!(last.contains("FINAL STEP"));
        assert!(last.contains("B (Read the omens)"));
    }

    #[test]
    fn test_pacing_guide_follows_journey_length() {
        let six = pacing_guide(6);
        assert!(six.starts_with("Pacing (6 steps"));
        assert!(six.contains("- Steps 1-2 (Separation)"));
        assert!(six.contains("- Steps 3-4 (Initiation)"));
        assert!(six.contains("- Steps 5-6 (Return)"));
        assert!(six.contains("- Step 7 (THE END)"));

        let three = pacing_guide(3);
        assert!(three.contains("- Step 1 (Separation)"));
        assert!(three.contains("- Step 2 (Initiation)"));
        assert!(three.contains("- Step 3 (Return)"));
        assert!(three.contains("- Step 4 (THE END)"));
        assert!(!three.contains("Step 7"));

        let one = pacing_guide(1);
        assert!(one.contains("- Step 1 (Separation)"));
        assert!(!one.contains("Initiation"));
        assert!(!one.contains("Return)"));
        assert!(one.contains("- Step 2 (THE END)"));
    }

    #[test]
    fn test_default_instruction_leaves_pacing_to_the_session() {
        assert!(!DEFAULT_SYSTEM_INSTRUCTION.contains("Pacing"));
        assert!(DEFAULT_SYSTEM_INSTRUCTION.contains("grandTitle"));
    }

    #[test]
    fn test_epilogue_requests_empty_choices() {
        let p = epilogue_prompt("A", "Seize the gate", "Orion");
        assert!(p.contains("\"choices\" array: []"));
        assert!(p.contains("grandTitle"));
        assert!(p.contains("Orion"));
    }
}
