//! Bounded exponential-backoff retry around calls to the reasoning service.
//!
//! The retry loop is a small state machine: [`Backoff`] tracks how many attempts have
//! failed and how long to wait next, and [`Backoff::on_failure`] is the only
//! transition. Exhaustion is reported as a value ([`RetryOutcome::Exhausted`]) so
//! callers skip the item instead of aborting the run.

use crate::error::ClassificationError;
use crate::llm::provider::{LLMProvider, LLMRequest, LLMResponse};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

pub const BACKOFF_MULTIPLIER: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_wait: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_wait: Duration) -> Self {
        Self {
            max_retries,
            initial_wait,
        }
    }

    /// At least one attempt is always made.
    fn attempt_budget(&self) -> u32 {
        self.max_retries.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Success(T),
    Exhausted { attempts: u32, last_error: String },
}

impl<T> RetryOutcome<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            Self::Exhausted { .. } => None,
        }
    }

    pub fn into_result(self, stage: &str) -> Result<T, ClassificationError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Exhausted {
                attempts,
                last_error,
            } => Err(ClassificationError::RetriesExhausted {
                stage: stage.to_string(),
                attempts,
                last_error,
            }),
        }
    }
}

/// Position in the backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub failed_attempts: u32,
    pub wait: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Wait { wait: Duration, next: Backoff },
    GiveUp { attempts: u32 },
}

impl Backoff {
    pub fn new(initial_wait: Duration) -> Self {
        Self {
            failed_attempts: 0,
            wait: initial_wait,
        }
    }

    pub fn on_failure(self, max_attempts: u32) -> Transition {
        let failed_attempts = self.failed_attempts + 1;
        if failed_attempts >= max_attempts {
            return Transition::GiveUp {
                attempts: failed_attempts,
            };
        }

        Transition::Wait {
            wait: self.wait,
            next: Backoff {
                failed_attempts,
                wait: self.wait.saturating_mul(BACKOFF_MULTIPLIER),
            },
        }
    }
}

/// Owned by exactly one worker; holds no state between invocations.
#[derive(Debug, Clone, Default)]
pub struct RetryingInvoker {
    policy: RetryPolicy,
}

impl RetryingInvoker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn invoke<T, E, F, Fut>(&self, operation: &str, mut call: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.policy.attempt_budget();
        let mut backoff = Backoff::new(self.policy.initial_wait);

        loop {
            debug!(
                "{}: attempt {}/{}",
                operation,
                backoff.failed_attempts + 1,
                max_attempts
            );

            let err = match call().await {
                Ok(value) => return RetryOutcome::Success(value),
                Err(err) => err,
            };

            match backoff.on_failure(max_attempts) {
                Transition::Wait { wait, next } => {
                    warn!(
                        "{}: {}. Retrying in {:.2} seconds...",
                        operation,
                        err,
                        wait.as_secs_f64()
                    );
                    tokio::time::sleep(wait).await;
                    backoff = next;
                }
                Transition::GiveUp { attempts } => {
                    error!(
                        "{}: max retries reached after {} attempts. Request failed: {}",
                        operation, attempts, err
                    );
                    return RetryOutcome::Exhausted {
                        attempts,
                        last_error: err.to_string(),
                    };
                }
            }
        }
    }

    pub async fn invoke_llm(
        &self,
        operation: &str,
        provider: &dyn LLMProvider,
        request: &LLMRequest,
    ) -> RetryOutcome<LLMResponse> {
        self.invoke(operation, || provider.analyze(request.clone()))
            .await
    }
}
