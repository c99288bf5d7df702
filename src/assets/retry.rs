use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::Result;

/// Configuration for asset retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 = a single attempt).
    pub max_retries: u32,
    /// Fixed pause between attempts.
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay: Duration::from_millis(1500),
        }
    }
}

/// Pause between attempts. Swapped out in tests.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// How an asset request resolved. Failure is a value, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetOutcome<T> {
    Ready(T),
    /// Every attempt failed; render the "unavailable" state and carry on.
    Unavailable { attempts: u32, reason: String },
    /// The key is already in flight or was the last one completed.
    Skipped,
}

impl<T> AssetOutcome<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            AssetOutcome::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, AssetOutcome::Unavailable { .. })
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> AssetOutcome<U> {
        match self {
            AssetOutcome::Ready(value) => AssetOutcome::Ready(f(value)),
            AssetOutcome::Unavailable { attempts, reason } => {
                AssetOutcome::Unavailable { attempts, reason }
            }
            AssetOutcome::Skipped => AssetOutcome::Skipped,
        }
    }
}

#[derive(Debug, Default)]
struct Dedup {
    in_flight: HashSet<String>,
    last_completed: Option<String>,
}

fn lock_dedup(dedup: &Mutex<Dedup>) -> MutexGuard<'_, Dedup> {
    // Only plain inserts and removals happen under the lock, so a poisoned set is still usable.
    dedup.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Holds a key in the in-flight set until dropped, including while unwinding.
struct InFlight<'a> {
    dedup: &'a Mutex<Dedup>,
    key: &'a str,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock_dedup(self.dedup).in_flight.remove(self.key);
    }
}

/// Bounded fixed-delay retry with request de-duplication, keyed by prompt text.
pub struct RetryPolicy<S: Sleeper = ThreadSleeper> {
    config: RetryConfig,
    sleeper: S,
    dedup: Mutex<Dedup>,
}

impl RetryPolicy<ThreadSleeper> {
    pub fn new(config: RetryConfig) -> Self {
        Self::with_sleeper(config, ThreadSleeper)
    }
}

impl Default for RetryPolicy<ThreadSleeper> {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl<S: Sleeper> RetryPolicy<S> {
    pub fn with_sleeper(config: RetryConfig, sleeper: S) -> Self {
        Self {
            config,
            sleeper,
            dedup: Mutex::new(Dedup::default()),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    /// Forget the last completed key so the same prompt may be requested again.
    pub fn forget(&self) {
        self.lock().last_completed = None;
    }

    /// Run `generate` under the policy. `generate` receives the 1-based attempt number.
    pub fn run<T, F>(&self, key: &str, mut generate: F) -> AssetOutcome<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        {
            let mut dedup = self.lock();
            if dedup.in_flight.contains(key) || dedup.last_completed.as_deref() == Some(key) {
                debug!("Skipping duplicate asset request: {key}");
                return AssetOutcome::Skipped;
            }
            dedup.in_flight.insert(key.to_string());
        }
        let _in_flight = InFlight {
            dedup: &self.dedup,
            key,
        };

        let total = self.config.max_retries + 1;
        let mut outcome = AssetOutcome::Skipped;
        for attempt in 1..=total {
            match generate(attempt) {
                Ok(value) => {
                    if attempt > 1 {
                        info!("Asset request succeeded on attempt {attempt}/{total}");
                    }
                    outcome = AssetOutcome::Ready(value);
                    break;
                }
                Err(e) if attempt < total => {
                    warn!(
                        "Asset attempt {attempt}/{total} failed: {e}; retrying in {:?}",
                        self.config.delay
                    );
                    self.sleeper.sleep(self.config.delay);
                }
                Err(e) => {
                    warn!("Asset request gave up after {total} attempts: {e}");
                    outcome = AssetOutcome::Unavailable {
                        attempts: total,
                        reason: e.to_string(),
                    };
                }
            }
        }

        self.lock().last_completed = Some(key.to_string());
        outcome
    }

    fn lock(&self) -> MutexGuard<'_, Dedup> {
        lock_dedup(&self.dedup)
    }
}
