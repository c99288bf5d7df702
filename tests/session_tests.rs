/// Session integration tests: a scripted generator drives full journeys through the public API.
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use monomyth::assets::{AssetOutcome, AssetStudio, RetryConfig, RetryPolicy, Sleeper};
use monomyth::gesture::{GestureConfig, GestureTracker, Landmark, Zone, INDEX_FINGERTIP};
use monomyth::llm::{ChatMessage, ImageAsset, ImageGenerator, TextGenerator};
use monomyth::story::{SessionConfig, SessionState, StepOutcome, END_STAGE};
use monomyth::story::Session;
use monomyth::{Result, StoryError};

struct ScriptedText {
    replies: VecDeque<Result<String>>,
    prompts: Vec<String>,
}

impl ScriptedText {
    fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: replies.into_iter().map(|r| Ok(r.to_string())).collect(),
            prompts: Vec::new(),
        }
    }
}

impl TextGenerator for ScriptedText {
    fn send_step(&mut self, _context: &[ChatMessage], prompt: &str) -> Result<String> {
        self.prompts.push(prompt.to_string());
        self.replies
            .pop_front()
            .unwrap_or_else(|| Err(StoryError::NetworkFailure("no more replies".into())))
    }
}

const STEP_ONE: &str = r#"```json
{
  "title": "THE SILENT FORGE",
  "stage": "Separation",
  "narrative": "Orion wakes to a forge gone cold, chains rusting on the anvil.",
  "choices": [
    {"id": "A", "shortDesc": "Seize the gate", "text": "Orion hurls the bars aside."},
    {"id": "B", "shortDesc": "Study the chains", "text": "The links bear a god's mark."}
  ]
}
```"#;

const EARLY_EPILOGUE: &str =
    r#"{"narrative": "The gate yields; the myth is sung before it began.", "choices": []}"#;

#[test]
fn freedom_orion_scenario_reaches_terminal_with_fallback_title() {
    let mut text = ScriptedText::new(vec![STEP_ONE, EARLY_EPILOGUE]);
    let mut session = Session::new(SessionConfig {
        max_steps: 6,
        ..SessionConfig::default()
    });

    session.start(&mut text, "freedom", "Orion").unwrap();
    assert_eq!(session.history().len(), 1);
    assert_eq!(session.history()[0].step, 1);
    assert!(session.history()[0].selected_id().is_none());

    session.finish_reading().unwrap();
    let outcome = session
        .commit_choice(&mut text, "A", "Seize the gate")
        .unwrap();
    assert_eq!(outcome, StepOutcome::Concluded { step: 2 });
    assert!(text.prompts[1].contains("Step 2** of 6"));

    let last = session.epilogue().unwrap();
    assert_eq!(last.stage.as_deref(), Some(END_STAGE));
    assert_eq!(last.grand_title.as_deref(), Some("THE LEGEND OF ORION"));
    assert_eq!(session.state(), SessionState::Terminal);
    assert_eq!(session.history()[0].selected_id(), Some("A"));
}

#[test]
fn gesture_commit_advances_the_session_once() {
    let mut text = ScriptedText::new(vec![STEP_ONE, EARLY_EPILOGUE]);
    let mut session = Session::default();
    session.start(&mut text, "freedom", "Orion").unwrap();
    session.finish_reading().unwrap();

    // fingertip at camera-space 0.05 is the user's far right
    let mut frame = vec![Landmark::new(0.5, 0.5); 21];
    frame[INDEX_FINGERTIP] = Landmark::new(0.05, 0.5);

    let mut tracker = GestureTracker::new(GestureConfig::default());
    let committed = (0..60).find_map(|_| tracker.update(&frame)).unwrap();
    assert_eq!(committed, Zone::Right);

    let choice = session.open_node().unwrap().choices[1].clone();
    assert_eq!(choice.id, "B");

    // a tap racing the gesture on the same node
    let pending = match session.begin_commit(&choice.id, &choice.short_desc).unwrap() {
        monomyth::story::Commit::Pending(p) => p,
        other => panic!("expected a pending request, got {other:?}"),
    };
    assert_eq!(
        session.begin_commit("A", "Seize the gate").unwrap(),
        monomyth::story::Commit::AlreadyCommitted
    );

    let reply = text.send_step(session.conversation(), pending.prompt());
    assert_eq!(
        session.complete(&pending, reply).unwrap(),
        StepOutcome::Concluded { step: 2 }
    );
    assert_eq!(session.history().len(), 2);
    assert_eq!(session.history()[0].selected_id(), Some("B"));
}

#[derive(Default)]
struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&self, _duration: Duration) {}
}

struct CountingImages {
    calls: Mutex<u32>,
}

impl ImageGenerator for CountingImages {
    fn generate_image(&self, _prompt: &str) -> Result<ImageAsset> {
        *self.calls.lock().unwrap() += 1;
        Err(StoryError::AssetGenerationFailure("safety filter".into()))
    }
}

#[test]
fn cover_failure_never_touches_the_session() {
    let mut text = ScriptedText::new(vec![STEP_ONE, EARLY_EPILOGUE]);
    let mut session = Session::default();
    session.start(&mut text, "freedom", "Orion").unwrap();
    session.finish_reading().unwrap();
    session.commit_choice(&mut text, "B", "Study the chains").unwrap();

    let policy = || {
        RetryPolicy::with_sleeper(
            RetryConfig {
                max_retries: 2,
                delay: Duration::from_millis(1500),
            },
            NoSleep,
        )
    };
    let studio = AssetStudio::with_policies(
        CountingImages {
            calls: Mutex::new(0),
        },
        policy(),
        policy(),
    );

    let epilogue = session.epilogue().unwrap();
    let outcome = studio.epilogue_cover(epilogue);
    assert!(matches!(outcome, AssetOutcome::Unavailable { attempts: 3, .. }));
    assert_eq!(*studio.generator().calls.lock().unwrap(), 3);
    assert_eq!(session.state(), SessionState::Terminal);
    assert!(session.failure().is_none());
}
