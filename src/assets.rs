//! Cover art, the icon motif sheet, and the background they decorate.
//!
//! Asset failures never reach the session: every request resolves to an [`AssetOutcome`].

pub mod cover;
pub mod motif;
pub mod retry;

pub use cover::{display_source, AssetStudio, PLACEHOLDER_IMAGE, UNAVAILABLE_LABEL};
pub use motif::{MotifAccumulator, SpritePlacement, Viewport};
pub use retry::{AssetOutcome, RetryConfig, RetryPolicy, Sleeper, ThreadSleeper};
