//! Retry, backoff and per-attempt timeout around a single model call

use crate::error::InvocationError;
use crate::models::ModelResponse;
use crate::providers::{ChatMessage, ChatModel};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Client errors are final, except 429
pub fn default_retryable_status(status: u16) -> bool {
    !(400..500).contains(&status) || status == 429
}

/// Backoff and error classification shared by every adapter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Length of one backoff step; attempt `n` waits `min(2^(n-1), cap)` steps
    pub backoff_unit: Duration,
    pub max_backoff_units: u32,
    retryable_status: fn(u16) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_unit: Duration::from_secs(1),
            max_backoff_units: 10,
            retryable_status: default_retryable_status,
        }
    }
}

impl RetryPolicy {
    #[cfg(test)]
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    #[cfg(test)]
    pub fn with_retryable_status(mut self, predicate: fn(u16) -> bool) -> Self {
        self.retryable_status = predicate;
        self
    }

    /// Wait after failed attempt `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let units = 2u32.saturating_pow(exponent).min(self.max_backoff_units);
        self.backoff_unit * units
    }

    pub fn is_retryable(&self, err: &InvocationError) -> bool {
        match err {
            InvocationError::Authentication(_) | InvocationError::Rejected(_) => false,
            InvocationError::Http { status, .. } => (self.retryable_status)(*status),
            InvocationError::Exhausted { .. } => false,
            _ => true,
        }
    }
}

/// Seconds from configuration; zero or negative means unbounded
pub fn timeout_from_secs(secs: i64) -> Option<Duration> {
    u64::try_from(secs)
        .ok()
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success,
    /// `backoff` is `None` when no further attempt follows
    Failure {
        error: String,
        backoff: Option<Duration>,
    },
}

#[derive(Debug, Clone)]
pub struct AttemptEvent<'a> {
    pub model: &'a str,
    pub attempt: u32,
    pub max_retries: u32,
    pub outcome: AttemptOutcome,
}

/// Receives every attempt and its outcome
pub trait InvocationObserver: Send + Sync {
    fn on_attempt(&self, event: &AttemptEvent<'_>);
}

/// Logs attempts through `tracing`
#[derive(Debug, Default)]
pub struct TracingObserver;

impl InvocationObserver for TracingObserver {
    fn on_attempt(&self, event: &AttemptEvent<'_>) {
        match &event.outcome {
            AttemptOutcome::Success => tracing::debug!(
                model = event.model,
                attempt = event.attempt,
                "model call succeeded"
            ),
            AttemptOutcome::Failure {
                error,
                backoff: Some(delay),
            } => tracing::warn!(
                model = event.model,
                attempt = event.attempt,
                max_retries = event.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "invoke error, retrying"
            ),
            AttemptOutcome::Failure { error, backoff: None } => tracing::error!(
                model = event.model,
                attempt = event.attempt,
                max_retries = event.max_retries,
                error = %error,
                "model call failed"
            ),
        }
    }
}

/// Runs model calls under a [`RetryPolicy`]
#[derive(Clone)]
pub struct Invoker {
    policy: RetryPolicy,
    observer: Arc<dyn InvocationObserver>,
}

impl Default for Invoker {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl Invoker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            observer: Arc::new(TracingObserver),
        }
    }

    #[cfg(test)]
    pub fn with_observer(mut self, observer: Arc<dyn InvocationObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Same messages on every attempt
    pub async fn invoke(
        &self,
        model: Arc<dyn ChatModel>,
        messages: &[ChatMessage],
        max_retries: u32,
        max_timeout: Option<Duration>,
    ) -> Result<ModelResponse, InvocationError> {
        self.invoke_with(model, max_retries, max_timeout, |_| messages.to_vec())
            .await
    }

    /// `messages_for(attempt)` builds the payload for each attempt, which lets
    /// callers shrink an image after a failure
    pub async fn invoke_with<F>(
        &self,
        model: Arc<dyn ChatModel>,
        max_retries: u32,
        max_timeout: Option<Duration>,
        mut messages_for: F,
    ) -> Result<ModelResponse, InvocationError>
    where
        F: FnMut(u32) -> Vec<ChatMessage>,
    {
        let attempts = max_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let messages = messages_for(attempt);
            let result = attempt_once(Arc::clone(&model), messages, max_timeout).await;

            let error = match result {
                Ok(response) => {
                    self.observer.on_attempt(&AttemptEvent {
                        model: model.model_id(),
                        attempt,
                        max_retries: attempts,
                        outcome: AttemptOutcome::Success,
                    });
                    return Ok(response);
                }
                Err(error) => error,
            };

            let retryable = self.policy.is_retryable(&error);
            let backoff = (retryable && attempt < attempts).then(|| self.policy.backoff_for(attempt));

            self.observer.on_attempt(&AttemptEvent {
                model: model.model_id(),
                attempt,
                max_retries: attempts,
                outcome: AttemptOutcome::Failure {
                    error: error.to_string(),
                    backoff,
                },
            });

            if !retryable {
                return Err(error);
            }

            last_error = Some(error);
            if let Some(delay) = backoff {
                sleep(delay).await;
            }
        }

        Err(InvocationError::Exhausted {
            attempts,
            last: Box::new(
                last_error.unwrap_or_else(|| InvocationError::Other("no attempt was made".into())),
            ),
        })
    }
}

/// One call on a detached task; past the bound the task is abandoned
async fn attempt_once(
    model: Arc<dyn ChatModel>,
    messages: Vec<ChatMessage>,
    max_timeout: Option<Duration>,
) -> Result<ModelResponse, InvocationError> {
    let handle = tokio::spawn(async move { model.invoke(&messages).await });

    let joined = match max_timeout {
        Some(limit) => match tokio::time::timeout(limit, handle).await {
            Ok(joined) => joined,
            Err(_) => return Err(InvocationError::Timeout(limit)),
        },
        None => handle.await,
    };

    joined.unwrap_or_else(|e| Err(InvocationError::Other(format!("invocation task failed: {}", e))))
}
