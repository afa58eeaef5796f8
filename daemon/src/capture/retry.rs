//! Retry policy for uploads
//!
//! Pure policy: counts attempts and decides which outcomes deserve another
//! try. Only failures to get a usable answer out of the server are
//! retried; a well-formed answer that is semantically empty is final.

use super::outcome::UploadOutcome;

/// What to do after an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Retry { next_attempt: u32 },
    /// Report the outcome as it stands
    Settle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Whether an outcome is worth another attempt
pub fn is_retryable(outcome: &UploadOutcome) -> bool {
    matches!(
        outcome,
        UploadOutcome::TransportError | UploadOutcome::ServerError { .. }
    )
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Decide after `attempt` (1-based) produced `outcome`
    pub fn verdict(&self, attempt: u32, outcome: &UploadOutcome) -> Verdict {
        if is_retryable(outcome) && attempt < self.max_attempts {
            Verdict::Retry {
                next_attempt: attempt + 1,
            }
        } else {
            Verdict::Settle
        }
    }
}
