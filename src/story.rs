//! Story data model, prompt construction, reply validation and the session state machine.

pub mod node;
pub mod prompt;
pub mod session;
pub mod validator;

pub use node::{fallback_grand_title, Choice, StoryNode, END_STAGE};
pub use session::{
    Commit, PendingStep, Session, SessionConfig, SessionFailure, SessionState, StepKind,
    StepOutcome,
};
pub use validator::parse_story_node;
