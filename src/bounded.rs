//! Bounded external calls.
//!
//! Every call to the graph store, embedding service or language model goes
//! through [`bounded_call`]: each attempt gets a timeout, attempts are capped,
//! and the request deadline shortens or skips attempts. Exhaustion is reported
//! as a [`CallFailure`] which callers turn into a degraded outcome.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Extra attempts after the first.
    pub retries: u32,
}

impl CallPolicy {
    pub fn new(timeout: Duration, retries: u32) -> Self {
        Self { timeout, retries }
    }

    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallFailure {
    #[error("{service} timed out after {attempts} attempt(s)")]
    TimedOut { service: &'static str, attempts: u32 },

    #[error("{service} failed after {attempts} attempt(s): {message}")]
    Failed { service: &'static str, attempts: u32, message: String },

    #[error("{service} skipped: request deadline already passed")]
    DeadlineExceeded { service: &'static str },
}

impl CallFailure {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CallFailure::TimedOut { .. } | CallFailure::DeadlineExceeded { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            CallFailure::TimedOut { attempts, .. } | CallFailure::Failed { attempts, .. } => {
                *attempts
            }
            CallFailure::DeadlineExceeded { .. } => 0,
        }
    }
}

/// Run `op` under `policy`, never past `deadline`.
///
/// `op` receives the zero-based attempt number so callers can vary the
/// payload between attempts (e.g. a shortened prompt on retry).
pub async fn bounded_call<T, E, F, Fut>(
    service: &'static str,
    policy: CallPolicy,
    deadline: Option<Instant>,
    mut op: F,
) -> Result<T, CallFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut last = CallFailure::DeadlineExceeded { service };

    for attempt in 0..policy.attempts() {
        let Some(timeout) = attempt_timeout(policy.timeout, deadline) else {
            debug!(service, attempt, "deadline reached, no further attempts");
            break;
        };

        match tokio::time::timeout(timeout, op(attempt)).await {
            Ok(Ok(value)) => {
                if attempt > 0 {
                    debug!(service, attempt, "succeeded on retry");
                }
                return Ok(value);
            }
            Ok(Err(e)) => {
                warn!(service, attempt, error = %e, "external call failed");
                last = CallFailure::Failed {
                    service,
                    attempts: attempt + 1,
                    message: e.to_string(),
                };
            }
            Err(_) => {
                warn!(service, attempt, timeout_ms = timeout.as_millis() as u64, "external call timed out");
                last = CallFailure::TimedOut { service, attempts: attempt + 1 };
            }
        }
    }

    Err(last)
}

/// Attempt timeout clipped to the remaining deadline; `None` once it has passed.
fn attempt_timeout(timeout: Duration, deadline: Option<Instant>) -> Option<Duration> {
    match deadline {
        None => Some(timeout),
        Some(deadline) => {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() { None } else { Some(timeout.min(remaining)) }
        }
    }
}
