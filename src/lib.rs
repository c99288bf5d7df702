//! Monomyth: a branching Hero's Journey narrated by a generative text model.
//!
//! A [`Session`](story::Session) sequences generated steps, each offering two choices, until
//! an epilogue closes the myth. Choices arrive from explicit input or from the dwell-based
//! [`GestureTracker`](gesture::GestureTracker); cover art and background motifs are produced
//! under a bounded, de-duplicated retry policy.

pub mod assets;
pub mod error;
pub mod gesture;
pub mod llm;
pub mod story;

pub use error::{Result, StoryError};
