//! Deferred release primitives.
//!
//! This library provides the pieces the reconciler uses to release held
//! resources after a delay. Key concepts:
//!
//! - **Deferred check**: a one-shot task that re-reads a resource after the
//!   wait interval and clears its hold markers with an optimistic write.
//! - **Outcome**: every check ends in exactly one terminal [`ReleaseOutcome`].
//! - **Convergence**: decided by the store's compare-and-swap, never by
//!   in-process coordination.
//!
//! # Invariants
//!
//! - A check never reuses the event-time snapshot for its write
//! - A check against an already clear resource performs no write
//! - Retries are opt-in; the default policy makes exactly one attempt

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;

/// Release errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReleaseError {
    /// The retry policy is unusable.
    #[error("invalid retry policy: {0}")]
    InvalidPolicy(String),
}

/// Terminal state of one deferred check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReleaseOutcome {
    /// Markers were cleared by this check.
    Cleared,

    /// Markers were already gone when the check ran.
    AlreadyClear,

    /// The resource could not be fetched (e.g. deleted meanwhile).
    Abandoned,

    /// The clearing write was rejected (conflict or other error).
    Failed,

    /// Suppressed because an identical check was already pending.
    Deduplicated,
}

impl ReleaseOutcome {
    /// Returns true if the resource is known to be schedulable afterwards.
    pub fn is_released(&self) -> bool {
        matches!(self, Self::Cleared | Self::AlreadyClear)
    }

    /// Returns true if this check wrote to the store.
    pub fn wrote(&self) -> bool {
        matches!(self, Self::Cleared)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cleared => "cleared",
            Self::AlreadyClear => "already_clear",
            Self::Abandoned => "abandoned",
            Self::Failed => "failed",
            Self::Deduplicated => "deduplicated",
        }
    }
}

impl fmt::Display for ReleaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry policy for the clearing write.
///
/// The default makes a single attempt: a rejected write is logged and the
/// check ends as [`ReleaseOutcome::Failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,

    /// Backoff before the second attempt.
    pub initial_backoff: Duration,

    /// Upper bound on a single backoff.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// A policy making exactly one attempt.
    pub fn no_retry() -> Self {
        Self::default()
    }

    /// A bounded exponential backoff policy.
    pub fn bounded(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
        }
    }

    pub fn validate(&self) -> Result<(), ReleaseError> {
        if self.max_attempts == 0 {
            return Err(ReleaseError::InvalidPolicy(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(ReleaseError::InvalidPolicy(
                "initial_backoff exceeds max_backoff".into(),
            ));
        }
        Ok(())
    }

    /// Returns true if another attempt may follow attempt number `attempt` (1-based).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Backoff before attempt `attempt + 1`, without jitter.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    /// Backoff with up to 25% random jitter added, still capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_backoff(attempt);
        let jitter_ms = (base.as_millis() / 4) as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        };
        (base + jitter).min(self.max_backoff)
    }
}

/// Tracks pending deferred checks by key for optional deduplication.
///
/// Keys are typically `namespace/name@version`, so a resync delivering the
/// same version collapses onto the pending check while a newer version still
/// gets its own.
#[derive(Debug, Clone, Default)]
pub struct PendingChecks {
    pending: BTreeSet<String>,
}

impl PendingChecks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the dedup key for a resource identity and observed version.
    pub fn key(identity: &str, version: Option<&str>) -> String {
        format!("{}@{}", identity, version.unwrap_or("-"))
    }

    /// Claim a key. Returns false if a check for it is already pending.
    pub fn try_claim(&mut self, key: &str) -> bool {
        self.pending.insert(key.to_string())
    }

    /// Release a key once its check has finished.
    pub fn release(&mut self, key: &str) {
        self.pending.remove(key);
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Default number of clearing attempts (no retry).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1;

/// Default first backoff when retries are enabled.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Default backoff cap.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);
