//! The narrative session state machine.
//!
//! Every generation call is modelled as an explicit request/response pair: a `begin_*`
//! operation moves the machine into a waiting state and hands back a [`PendingStep`], the
//! caller sends its prompt through a [`TextGenerator`] (on whatever thread or loop it likes),
//! and [`Session::complete`] applies the reply. Each pending step carries the session epoch
//! it was issued under; a reply for an abandoned epoch is discarded instead of applied.

use std::fmt;

use log::{debug, info, warn};

use crate::error::{Result, StoryError};
use crate::llm::{ChatMessage, TextGenerator};
use crate::story::node::{Choice, StoryNode};
use crate::story::prompt::{
    continuation_prompt, epilogue_prompt, opening_prompt, pacing_guide,
    DEFAULT_SYSTEM_INSTRUCTION,
};
use crate::story::validator::parse_story_node;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Number of choice-bearing steps before the epilogue.
    pub max_steps: u32,
    pub system_instruction: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_steps: 6,
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
        }
    }
}

impl SessionConfig {
    /// A journey needs at least one choice-bearing step before its epilogue.
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(StoryError::InvalidInput(
                "max_steps must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// The system turn that opens every conversation: the narrator instruction followed by
    /// a pacing guide sized to `max_steps`.
    pub fn system_turn(&self) -> String {
        format!(
            "{}\n\n{}",
            self.system_instruction.trim_end(),
            pacing_guide(self.max_steps)
        )
    }
}

// ---------------------------------------------------------------------------
// States and requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingOpening,
    /// The open node's prose is being revealed.
    Reading,
    /// The open node's choices are live.
    Choosing,
    Processing,
    Terminal,
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "IDLE",
            SessionState::AwaitingOpening => "AWAITING_OPENING",
            SessionState::Reading => "READING",
            SessionState::Choosing => "CHOOSING",
            SessionState::Processing => "PROCESSING",
            SessionState::Terminal => "TERMINAL",
            SessionState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Opening,
    Continuation { last_before_epilogue: bool },
    Epilogue,
}

/// A generation request the session is waiting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStep {
    epoch: u64,
    step: u32,
    kind: StepKind,
    prompt: String,
}

impl PendingStep {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Step number the reply will be stamped with.
    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn kind(&self) -> StepKind {
        self.kind
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }
}

/// Result of a commit request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Commit {
    /// The choice was recorded; send this request next.
    Pending(PendingStep),
    /// The open node already carried a choice; nothing changed.
    AlreadyCommitted,
}

/// What applying a reply (or a commit) did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A choice-bearing node was appended; the session is `READING`.
    Advanced { step: u32 },
    /// The epilogue was appended; the session is `TERMINAL`.
    Concluded { step: u32 },
    /// The reply belonged to an abandoned request and was dropped.
    Discarded,
    /// A second commit on an already-decided node; history was left untouched.
    Duplicate,
}

/// The failure that put the session into `ERROR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
    pub error: StoryError,
    pub retriable: bool,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct Session {
    config: SessionConfig,
    state: SessionState,
    seed: String,
    hero_name: String,
    history: Vec<StoryNode>,
    /// System instruction followed by every validated user/assistant exchange.
    conversation: Vec<ChatMessage>,
    epoch: u64,
    in_flight: Option<PendingStep>,
    failure: Option<SessionFailure>,
    /// The request that failed, kept so `retry` can re-send the exact prompt.
    failed_request: Option<PendingStep>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Idle,
            seed: String::new(),
            hero_name: String::new(),
            history: Vec::new(),
            conversation: Vec::new(),
            epoch: 0,
            in_flight: None,
            failure: None,
            failed_request: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }

    pub fn hero_name(&self) -> &str {
        &self.hero_name
    }

    pub fn history(&self) -> &[StoryNode] {
        &self.history
    }

    pub fn conversation(&self) -> &[ChatMessage] {
        &self.conversation
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Number of nodes generated so far; drives the background motif.
    pub fn step_count(&self) -> u32 {
        self.history.len() as u32
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        self.failure.as_ref()
    }

    pub fn in_flight(&self) -> Option<&PendingStep> {
        self.in_flight.as_ref()
    }

    /// The last node, if it still awaits a choice.
    pub fn open_node(&self) -> Option<&StoryNode> {
        self.history
            .last()
            .filter(|node| !node.is_terminal() && node.selected_id().is_none())
    }

    pub fn current_node(&self) -> Option<&StoryNode> {
        self.history.last()
    }

    pub fn epilogue(&self) -> Option<&StoryNode> {
        self.history.last().filter(|node| node.is_terminal())
    }

    pub fn is_terminal(&self) -> bool {
        self.state == SessionState::Terminal
    }

    // -- lifecycle ----------------------------------------------------------

    /// Open a fresh conversation and request step 1.
    ///
    /// Allowed from `IDLE`, and from `ERROR` while no step has ever been generated.
    pub fn begin_start(&mut self, seed: &str, hero_name: &str) -> Result<PendingStep> {
        let restartable = self.state == SessionState::Idle
            || (self.state == SessionState::Error && self.history.is_empty());
        if !restartable {
            return Err(StoryError::invalid_transition(self.state, "start a session"));
        }
        self.config.validate()?;
        let seed = seed.trim();
        let hero_name = hero_name.trim();
        if seed.is_empty() {
            return Err(StoryError::InvalidInput("seed must not be empty".into()));
        }
        if hero_name.is_empty() {
            return Err(StoryError::InvalidInput("hero name must not be empty".into()));
        }

        self.epoch += 1;
        self.seed = seed.to_string();
        self.hero_name = hero_name.to_string();
        self.history.clear();
        self.conversation = vec![ChatMessage::system(self.config.system_turn())];
        self.failure = None;
        self.failed_request = None;
        self.state = SessionState::AwaitingOpening;

        info!(
            "Session started (epoch {}): seed=\"{}\", hero=\"{}\"",
            self.epoch, self.seed, self.hero_name
        );
        Ok(self.issue(1, StepKind::Opening, opening_prompt(seed, hero_name)))
    }

    /// Presentation signal: the open node's prose has been fully revealed.
    pub fn finish_reading(&mut self) -> Result<()> {
        if self.state != SessionState::Reading {
            return Err(StoryError::invalid_transition(self.state, "finish reading"));
        }
        self.state = SessionState::Choosing;
        debug!("Step {} choices are live", self.step_count());
        Ok(())
    }

    /// Record the user's choice on the open node and build the next request.
    ///
    /// Tap and gesture input may race; the loser of the race sees
    /// [`Commit::AlreadyCommitted`] and nothing is mutated.
    pub fn begin_commit(&mut self, choice_id: &str, short_desc: &str) -> Result<Commit> {
        let already_decided = self
            .history
            .last()
            .is_some_and(|node| node.selected_id().is_some());
        if already_decided
            && matches!(self.state, SessionState::Processing | SessionState::Error)
        {
            warn!(
                "Ignoring duplicate commit of '{choice_id}' on step {}",
                self.step_count()
            );
            return Ok(Commit::AlreadyCommitted);
        }
        if self.state != SessionState::Choosing {
            return Err(StoryError::invalid_transition(self.state, "commit a choice"));
        }

        let node = self
            .history
            .last_mut()
            .ok_or_else(|| StoryError::invalid_transition(SessionState::Choosing, "commit a choice"))?;
        if node.choice(choice_id).is_none() {
            let offered: Vec<&str> = node.choices.iter().map(|c| c.id.as_str()).collect();
            return Err(StoryError::InvalidInput(format!(
                "choice '{choice_id}' is not offered at step {} (valid: {offered:?})",
                node.step
            )));
        }
        if !node.select(choice_id) {
            return Ok(Commit::AlreadyCommitted);
        }
        info!("Step {} committed: {choice_id} ({short_desc})", node.step);

        self.state = SessionState::Processing;
        let next_step = self.history.len() as u32 + 1;
        let max_steps = self.config.max_steps;
        let pending = if next_step > max_steps {
            self.issue(
                next_step,
                StepKind::Epilogue,
                epilogue_prompt(choice_id, short_desc, &self.hero_name),
            )
        } else {
            self.issue(
                next_step,
                StepKind::Continuation {
                    last_before_epilogue: next_step == max_steps,
                },
                continuation_prompt(choice_id, short_desc, next_step, max_steps),
            )
        };
        Ok(Commit::Pending(pending))
    }

    /// Re-issue the request that failed, with the identical prompt.
    pub fn retry(&mut self) -> Result<PendingStep> {
        if self.state != SessionState::Error {
            return Err(StoryError::invalid_transition(self.state, "retry"));
        }
        let retriable = self.failure.as_ref().is_some_and(|f| f.retriable);
        let failed = match (retriable, self.failed_request.take()) {
            (true, Some(failed)) => failed,
            (_, failed) => {
                self.failed_request = failed;
                return Err(StoryError::invalid_transition(self.state, "retry a fatal failure"));
            }
        };

        self.failure = None;
        self.state = match failed.kind {
            StepKind::Opening => SessionState::AwaitingOpening,
            _ => SessionState::Processing,
        };
        info!("Retrying step {} (epoch {})", failed.step, self.epoch);
        Ok(self.issue(failed.step, failed.kind, failed.prompt))
    }

    /// Drop everything and return to `IDLE`. Replies to earlier requests are discarded.
    pub fn reset(&mut self) {
        self.epoch += 1;
        self.state = SessionState::Idle;
        self.seed.clear();
        self.hero_name.clear();
        self.history.clear();
        self.conversation.clear();
        self.in_flight = None;
        self.failure = None;
        self.failed_request = None;
        info!("Session reset (epoch {})", self.epoch);
    }

    /// Apply the generator's reply to `pending`.
    ///
    /// Errors move the session to `ERROR` and are returned verbatim. A reply whose request
    /// is no longer in flight yields [`StepOutcome::Discarded`].
    pub fn complete(
        &mut self,
        pending: &PendingStep,
        reply: Result<String>,
    ) -> Result<StepOutcome> {
        if pending.epoch != self.epoch || self.in_flight.as_ref() != Some(pending) {
            warn!(
                "Discarding stale reply for step {} (epoch {}, current epoch {})",
                pending.step, pending.epoch, self.epoch
            );
            return Ok(StepOutcome::Discarded);
        }
        self.in_flight = None;

        let raw = match reply {
            Ok(raw) => raw,
            Err(e) => return Err(self.fail(pending, e)),
        };
        let mut node = match parse_story_node(&raw) {
            Ok(node) => node,
            Err(e) => return Err(self.fail(pending, e)),
        };

        if pending.kind == StepKind::Epilogue && !node.is_terminal() {
            let e = StoryError::MalformedResponse(format!(
                "epilogue at step {} offered {} choices",
                pending.step,
                node.choices.len()
            ));
            return Err(self.fail(pending, e));
        }

        node.step = pending.step;
        if node.is_terminal() {
            node.seal_epilogue(&self.hero_name);
        }

        self.conversation.push(ChatMessage::user(pending.prompt.clone()));
        self.conversation.push(ChatMessage::assistant(raw));

        let terminal = node.is_terminal();
        let step = node.step;
        self.history.push(node);

        if terminal {
            self.state = SessionState::Terminal;
            info!(
                "Epilogue reached at step {step}: {}",
                self.history
                    .last()
                    .and_then(|n| n.grand_title.as_deref())
                    .unwrap_or_default()
            );
            Ok(StepOutcome::Concluded { step })
        } else {
            self.state = SessionState::Reading;
            info!("Step {step} appended");
            Ok(StepOutcome::Advanced { step })
        }
    }

    // -- blocking drivers ---------------------------------------------------

    /// Send `pending` through `generator` and apply the reply.
    pub fn run_pending<G>(&mut self, generator: &mut G, pending: &PendingStep) -> Result<StepOutcome>
    where
        G: TextGenerator + ?Sized,
    {
        debug!("Prompt for step {}:\n{}", pending.step, pending.prompt);
        let reply = generator.send_step(&self.conversation, &pending.prompt);
        self.complete(pending, reply)
    }

    pub fn start<G>(&mut self, generator: &mut G, seed: &str, hero_name: &str) -> Result<StepOutcome>
    where
        G: TextGenerator + ?Sized,
    {
        let pending = self.begin_start(seed, hero_name)?;
        self.run_pending(generator, &pending)
    }

    pub fn commit_choice<G>(
        &mut self,
        generator: &mut G,
        choice_id: &str,
        short_desc: &str,
    ) -> Result<StepOutcome>
    where
        G: TextGenerator + ?Sized,
    {
        match self.begin_commit(choice_id, short_desc)? {
            Commit::Pending(pending) => self.run_pending(generator, &pending),
            Commit::AlreadyCommitted => Ok(StepOutcome::Duplicate),
        }
    }

    /// Commit one of the open node's choices as given, e.g. from a gesture.
    pub fn commit<G>(&mut self, generator: &mut G, choice: &Choice) -> Result<StepOutcome>
    where
        G: TextGenerator + ?Sized,
    {
        self.commit_choice(generator, &choice.id, &choice.short_desc)
    }

    pub fn retry_with<G>(&mut self, generator: &mut G) -> Result<StepOutcome>
    where
        G: TextGenerator + ?Sized,
    {
        let pending = self.retry()?;
        self.run_pending(generator, &pending)
    }

    // -- export -------------------------------------------------------------

    /// Plain-text rendering of the journey so far, for export collaborators.
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        if let Some(title) = self.epilogue().and_then(|n| n.grand_title.as_deref()) {
            out.push_str(&format!("{title}\n\n"));
        }
        for node in &self.history {
            let stage = node.stage.as_deref().unwrap_or("NARRATIVE");
            out.push_str(&format!("Step {} · {stage}\n", node.step));
            if let Some(title) = &node.title {
                out.push_str(&format!("{title}\n"));
            }
            out.push_str(&node.narrative);
            out.push('\n');
            if let Some(choice) = node.selected_choice() {
                out.push_str(&format!(
                    "> [{}] {}\n{}\n",
                    choice.id, choice.short_desc, choice.text
                ));
            }
            out.push('\n');
        }
        out
    }

    // -- internals ----------------------------------------------------------

    fn issue(&mut self, step: u32, kind: StepKind, prompt: String) -> PendingStep {
        let pending = PendingStep {
            epoch: self.epoch,
            step,
            kind,
            prompt,
        };
        self.in_flight = Some(pending.clone());
        pending
    }

    fn fail(&mut self, pending: &PendingStep, error: StoryError) -> StoryError {
        let retriable = error.is_retriable();
        warn!(
            "Step {} failed ({}): {error}",
            pending.step,
            if retriable { "retriable" } else { "fatal" }
        );
        self.state = SessionState::Error;
        self.failure = Some(SessionFailure {
            error: error.clone(),
            retriable,
        });
        self.failed_request = retriable.then(|| pending.clone());
        error
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}
