//! Bounded exponential backoff around a single remote call.
//!
//! The executor never surfaces an error past itself: the caller always gets a
//! [`RetryOutcome`] and decides what an empty result means. Attempt logs are
//! emitted inside whatever span the caller opened, so city/source context is
//! attached by the caller rather than threaded through here.

use std::{fmt::Display, future::Future, time::Duration};

use futures::future::BoxFuture;
use tokio::{
    sync::Mutex,
    time::{Interval, MissedTickBehavior},
};

use crate::config::RetryConfig;

/// How the executor should react to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connection reset, timeout, 5xx gateway trouble.
    Transient,
    /// HTTP 429. Backs off like a transient error but is not logged as a failure.
    RateLimited,
    /// Malformed body, auth failure, other 4xx. Never retried.
    Fatal,
}

pub trait Retryable {
    fn class(&self) -> ErrorClass;
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out")]
    Timeout,
    #[error("rate limited (HTTP 429)")]
    RateLimited,
    #[error("server error: HTTP {0}")]
    Server(u16),
    #[error("not authorized: HTTP {0}")]
    Unauthorized(u16),
    #[error("unexpected status: HTTP {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("no endpoint registered for route '{0}'")]
    NoRoute(String),
}

impl FetchError {
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimited,
            401 | 403 => Self::Unauthorized(status),
            408 | 500 | 502 | 503 | 504 => Self::Server(status),
            _ => Self::Status(status),
        }
    }
}

impl Retryable for FetchError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Connect(_) | Self::Timeout | Self::Server(_) => ErrorClass::Transient,
            Self::RateLimited => ErrorClass::RateLimited,
            Self::Unauthorized(_) | Self::Status(_) | Self::Malformed(_) | Self::NoRoute(_) => {
                ErrorClass::Fatal
            }
        }
    }
}

#[derive(Debug)]
pub enum RetryOutcome<T, E = FetchError> {
    Success { value: T, attempts: u32 },
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, last_error: E },
    /// A non-retryable error stopped the sequence early.
    Aborted { attempts: u32, error: E },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Aborted { attempts, .. } => *attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn error(&self) -> Option<&E> {
        match self {
            Self::Success { .. } => None,
            Self::Exhausted { last_error, .. } => Some(last_error),
            Self::Aborted { error, .. } => Some(error),
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Success { value, .. } => Some(value),
            _ => None,
        }
    }

    /// The "no data" degradation: failures become `T::default()`.
    pub fn into_value_or_default(self) -> T
    where
        T: Default,
    {
        self.into_option().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            backoff_factor: cfg.backoff_factor.max(1.0),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Wait after the `attempt`-th failure (1-based): `initial * factor^(attempt-1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }

    /// Upper bound on time spent sleeping across one full retry sequence.
    pub fn max_total_wait(&self) -> Duration {
        (1..self.max_attempts).map(|a| self.delay_for(a)).sum()
    }

    pub async fn execute<T, E, F, Fut>(&self, mut op: F) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "request succeeded after retry");
                    }
                    return RetryOutcome::Success {
                        value,
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    let class = e.class();
                    if class == ErrorClass::Fatal {
                        tracing::error!(error = %e, attempt, "non-retryable failure, giving up");
                        return RetryOutcome::Aborted {
                            attempts: attempt,
                            error: e,
                        };
                    }
                    if attempt >= self.max_attempts {
                        tracing::error!(
                            error = %e,
                            attempts = attempt,
                            rate_limited = class == ErrorClass::RateLimited,
                            "retry budget exhausted, returning no data"
                        );
                        return RetryOutcome::Exhausted {
                            attempts: attempt,
                            last_error: e,
                        };
                    }

                    let sleep_for = self.delay_for(attempt);
                    let backoff_ms = sleep_for.as_millis() as u64;
                    if class == ErrorClass::RateLimited {
                        tracing::info!(attempt, backoff_ms, "rate limited, pausing before retry");
                    } else {
                        tracing::warn!(
                            error = %e,
                            attempt,
                            max_attempts = self.max_attempts,
                            backoff_ms,
                            "request failed, retrying with backoff"
                        );
                    }
                    tokio::time::sleep(sleep_for).await;
                }
            }
        }
    }

    /// Turns a single-call function into one with the same argument and
    /// bounded-retry semantics.
    pub fn wrap<A, T, E, F, Fut>(&self, op: F) -> impl Fn(A) -> BoxFuture<'static, RetryOutcome<T, E>>
    where
        A: Clone + Send + Sync + 'static,
        F: Fn(A) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Retryable + Display + Send + 'static,
    {
        let policy = self.clone();
        move |arg: A| {
            let policy = policy.clone();
            let op = op.clone();
            Box::pin(async move { policy.execute(|| op(arg.clone())).await })
        }
    }
}

/// Global spacing between outbound requests.
///
/// Shared by every source so the spacing holds even if cities are ever
/// fetched concurrently.
pub struct Pacer {
    spacing: Duration,
    interval: Mutex<Option<Interval>>,
}

impl Pacer {
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            interval: Mutex::new(None),
        }
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    pub async fn wait(&self) {
        if self.spacing.is_zero() {
            return;
        }
        let mut guard = self.interval.lock().await;
        let interval = guard.get_or_insert_with(|| {
            let mut iv = tokio::time::interval(self.spacing);
            iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
            iv
        });
        interval.tick().await;
    }
}
