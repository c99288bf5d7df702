use thiserror::Error;

use crate::story::session::SessionState;

/// Everything that can go wrong while driving a narrative session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoryError {
    /// No API key (or equivalent) for the generation service. Retrying cannot help.
    #[error("generation credential missing: {0}")]
    CredentialMissing(String),
    /// The generation service could not be reached or answered with a failure status.
    #[error("generation service failure: {0}")]
    NetworkFailure(String),
    /// The service replied, but the reply does not satisfy the story node contract.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// Cover or icon generation failed. Never surfaced as a session failure.
    #[error("asset generation failed: {0}")]
    AssetGenerationFailure(String),
    /// The caller asked for an operation the session cannot perform in its current state.
    #[error("invalid transition: cannot {action} while {state}")]
    InvalidTransition {
        state: SessionState,
        action: &'static str,
    },
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl StoryError {
    /// Whether re-sending the same pending prompt may succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            StoryError::NetworkFailure(_) | StoryError::MalformedResponse(_) => true,
            StoryError::CredentialMissing(_)
            | StoryError::AssetGenerationFailure(_)
            | StoryError::InvalidTransition { .. }
            | StoryError::InvalidInput(_) => false,
        }
    }

    pub(crate) fn invalid_transition(state: SessionState, action: &'static str) -> Self {
        StoryError::InvalidTransition { state, action }
    }
}

pub type Result<T> = std::result::Result<T, StoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        assert!(StoryError::NetworkFailure("timeout".into()).is_retriable());
        assert!(StoryError::MalformedResponse("no narrative".into()).is_retriable());
        assert!(!StoryError::CredentialMissing("GEMINI_API_KEY".into()).is_retriable());
        assert!(!StoryError::invalid_transition(SessionState::Idle, "commit a choice").is_retriable());
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = StoryError::invalid_transition(SessionState::Reading, "commit a choice");
        assert_eq!(
            err.to_string(),
            "invalid transition: cannot commit a choice while READING"
        );
    }
}
