use std::io::{self, Write};

use anyhow::Result;
use log::{info, warn};

use monomyth::assets::{
    display_source, AssetOutcome, AssetStudio, MotifAccumulator, Viewport,
    UNAVAILABLE_LABEL,
};
use monomyth::llm::{ImageGenerator, TextGenerator};
use monomyth::story::{Session, SessionConfig, SessionState, StepOutcome, StoryNode};
use monomyth::StoryError;

const TERMINAL_VIEWPORT: Viewport = Viewport {
    width: 1280.0,
    height: 720.0,
};

// ---------------------------------------------------------------------------
// Console helpers
// ---------------------------------------------------------------------------

fn read_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn read_non_empty(prompt: &str) -> Result<String> {
    loop {
        let value = read_line(prompt)?;
        if !value.is_empty() {
            return Ok(value);
        }
        println!("(The oracle needs an answer.)");
    }
}

fn show_node(node: &StoryNode) {
    println!("\n----------------------------------------");
    println!(
        "  Step {} · {}",
        node.step,
        node.stage.as_deref().unwrap_or("NARRATIVE")
    );
    if let Some(title) = &node.title {
        println!("  {title}");
    }
    println!("----------------------------------------");
    println!("{}", node.narrative);
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

enum Recovery {
    Retry,
    Abandon,
}

fn prompt_recovery(err: &StoryError) -> Result<Recovery> {
    println!("\n  [!] {err}");
    if !err.is_retriable() {
        println!("  This cannot be retried.");
        return Ok(Recovery::Abandon);
    }
    loop {
        match read_line("  [r] Retry    [q] Abandon journey\n> ")?
            .to_lowercase()
            .as_str()
        {
            "r" => return Ok(Recovery::Retry),
            "q" => return Ok(Recovery::Abandon),
            _ => println!("  Press [r] to retry or [q] to abandon."),
        }
    }
}

/// Keep retrying a failed step until it lands or the player gives up.
fn recover<G>(session: &mut Session, text: &mut G, mut err: StoryError) -> Result<Option<StepOutcome>>
where
    G: TextGenerator + ?Sized,
{
    loop {
        match prompt_recovery(&err)? {
            Recovery::Abandon => return Ok(None),
            Recovery::Retry => {
                println!("\n(The oracle listens again...)");
                match session.retry_with(text) {
                    Ok(outcome) => return Ok(Some(outcome)),
                    Err(e) => err = e,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Single journey
// ---------------------------------------------------------------------------

enum JourneyOutcome {
    Concluded { grand_title: String, steps: u32 },
    Abandoned,
}

fn play_round<G, I>(
    session: &mut Session,
    text: &mut G,
    studio: &AssetStudio<I>,
) -> Result<JourneyOutcome>
where
    G: TextGenerator + ?Sized,
    I: ImageGenerator,
{
    session.reset();
    studio.forget();

    let seed = read_non_empty("\n> Speak a word of power (the seed): ")?;
    let hero = read_non_empty("> The name of the hero is? ")?;

    let mut motif = MotifAccumulator::new(TERMINAL_VIEWPORT);
    match studio.icon_sheet(&seed) {
        AssetOutcome::Ready(sheet) => info!("Motif sheet ready ({} base64 chars)", sheet.base64.len()),
        AssetOutcome::Unavailable { reason, .. } => warn!("Motif sheet unavailable: {reason}"),
        AssetOutcome::Skipped => {}
    }

    println!("\n(Consulting the threads of fate...)");
    if let Err(err) = session.start(text, &seed, &hero) {
        if recover(session, text, err)?.is_none() {
            return Ok(JourneyOutcome::Abandoned);
        }
    }

    loop {
        let added = motif.observe_step(session.step_count());
        if added > 0 {
            info!(
                "Background motif: +{added} sprites ({} total)",
                motif.placements().len()
            );
        }

        let Some(node) = session.current_node().cloned() else {
            return Ok(JourneyOutcome::Abandoned);
        };
        show_node(&node);

        if session.state() == SessionState::Terminal {
            let grand_title = node.grand_title.clone().unwrap_or_default();
            return Ok(JourneyOutcome::Concluded {
                grand_title,
                steps: node.step,
            });
        }

        session.finish_reading()?;
        println!();
        for choice in &node.choices {
            println!("  [{}] {}", choice.id, choice.short_desc);
        }

        let choice = loop {
            let input = read_line("\n[You]: ")?;
            if input.eq_ignore_ascii_case("quit") || input.eq_ignore_ascii_case("exit") {
                return Ok(JourneyOutcome::Abandoned);
            }
            match node.choices.iter().find(|c| c.id.eq_ignore_ascii_case(&input)) {
                Some(choice) => break choice.clone(),
                None => println!("(Choose one of the paths shown, or type quit.)"),
            }
        };

        println!("\n{}", choice.text);
        println!("\n(The story unfolds...)");
        if let Err(err) = session.commit(text, &choice) {
            if recover(session, text, err)?.is_none() {
                return Ok(JourneyOutcome::Abandoned);
            }
        }
    }
}

fn show_epilogue<I: ImageGenerator>(session: &Session, studio: &AssetStudio<I>, outcome: &JourneyOutcome) {
    println!("\n========================================");
    match outcome {
        JourneyOutcome::Concluded { grand_title, steps } => {
            println!("  {grand_title}");
            println!("  A myth in {steps} steps");
            if let Some(node) = session.epilogue() {
                let cover = studio.epilogue_cover(node);
                let source = display_source(&cover);
                match cover {
                    AssetOutcome::Ready(asset) => {
                        println!("  Cover painted ({} base64 chars)", asset.base64.len());
                        info!("Cover source: {} bytes of data URL", source.len());
                    }
                    _ => println!("  Cover: [{UNAVAILABLE_LABEL}] showing {source}"),
                }
            }
        }
        JourneyOutcome::Abandoned => {
            println!("  The hero turned back from the threshold.");
        }
    }
    println!("========================================\n");
    println!("  [r] New journey    [t] Transcript    [q] Quit\n");
}

/// Read the player's post-journey choice. Returns `true` to start again.
fn prompt_restart(session: &Session) -> Result<bool> {
    loop {
        match read_line("> ")?.to_lowercase().as_str() {
            "r" => return Ok(true),
            "q" => return Ok(false),
            "t" => println!("\n{}", session.transcript()),
            _ => println!("  Press [r] to begin again, [t] for the transcript, or [q] to quit."),
        }
    }
}

// ---------------------------------------------------------------------------
// Public entry point: journeys in a loop until the player quits
// ---------------------------------------------------------------------------

pub fn run<G, I>(text: &mut G, studio: AssetStudio<I>, config: SessionConfig) -> Result<()>
where
    G: TextGenerator + ?Sized,
    I: ImageGenerator,
{
    let mut session = Session::new(config);
    loop {
        println!("\n========================================");
        println!("              MONOMYTH");
        println!("========================================");
        println!("Every hero begins with a single word.");

        let outcome = play_round(&mut session, text, &studio)?;
        show_epilogue(&session, &studio, &outcome);

        if !prompt_restart(&session)? {
            println!("The threads of fate fall still.");
            break;
        }
        info!("Player chose a new journey");
    }
    Ok(())
}
