// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Retry logic with exponential backoff
//!
//! One wrapper for every retried call site. The policy is an explicit value;
//! callers observe each retry through an async notice callback so they can
//! surface `rate_limit` / `timeout` progress events before the sleep.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::settings::ResilienceConfig;
use crate::error::{AgentError, ApiError, Result};

/// Retry policy: delays are `base_delay * backoff_factor^(n-1)` for retry `n`
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier applied per retry
    pub backoff_factor: f64,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Jitter fraction (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ResilienceConfig::default())
    }
}

impl From<&ResilienceConfig> for RetryPolicy {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            backoff_factor: config.backoff_factor,
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let raw_ms = self.base_delay.as_millis() as f64 * self.backoff_factor.powi(exponent);
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as f64);

        if self.jitter <= 0.0 {
            return Duration::from_millis(capped_ms as u64);
        }

        let jitter_range = (capped_ms * self.jitter) as i64;
        let jitter_ms = rand::rng().random_range(-jitter_range..=jitter_range);
        Duration::from_millis((capped_ms as i64 + jitter_ms).max(0) as u64)
    }
}

/// Why a call is being retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    RateLimited,
    TimedOut,
}

/// Reported once per retry, before sleeping
#[derive(Debug, Clone, PartialEq)]
pub struct RetryNotice {
    pub operation: String,
    pub reason: RetryReason,
    /// 1-based retry number
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay: Duration,
}

/// Classify transient provider failures: HTTP 429 and timeouts.
pub fn transient_reason(error: &AgentError) -> Option<RetryReason> {
    match error {
        AgentError::Api(ApiError::RateLimited { .. }) => Some(RetryReason::RateLimited),
        AgentError::Api(ApiError::Timeout) => Some(RetryReason::TimedOut),
        _ => None,
    }
}

/// Retry `operation` on transient provider failures.
pub async fn with_retry<T, F, Fut, N, NFut>(
    policy: &RetryPolicy,
    operation_name: &str,
    operation: F,
    on_retry: N,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    N: FnMut(RetryNotice) -> NFut,
    NFut: Future<Output = ()>,
{
    with_retry_if(policy, operation_name, operation, transient_reason, on_retry).await
}

/// Retry `operation` whenever `classify` names a reason for the error.
pub async fn with_retry_if<T, F, Fut, C, N, NFut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
    classify: C,
    mut on_retry: N,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    C: Fn(&AgentError) -> Option<RetryReason>,
    N: FnMut(RetryNotice) -> NFut,
    NFut: Future<Output = ()>,
{
    let mut retries = 0u32;

    loop {
        match operation().await {
            Ok(value) => {
                if retries > 0 {
                    tracing::info!(
                        target: "toolstream.llm.retry",
                        operation = operation_name,
                        retries,
                        "succeeded after retrying"
                    );
                }
                return Ok(value);
            }
            Err(error) => {
                let Some(reason) = classify(&error) else {
                    tracing::debug!(
                        target: "toolstream.llm.retry",
                        operation = operation_name,
                        error = %error,
                        "non-retryable error"
                    );
                    return Err(error);
                };

                if retries >= policy.max_attempts {
                    tracing::warn!(
                        target: "toolstream.llm.retry",
                        operation = operation_name,
                        max_attempts = policy.max_attempts,
                        error = %error,
                        "retries exhausted"
                    );
                    return Err(error);
                }

                retries += 1;
                let delay = policy.delay_for(retries);
                tracing::warn!(
                    target: "toolstream.llm.retry",
                    operation = operation_name,
                    attempt = retries,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient failure, retrying"
                );

                on_retry(RetryNotice {
                    operation: operation_name.to_string(),
                    reason,
                    attempt: retries,
                    max_attempts: policy.max_attempts,
                    delay,
                })
                .await;

                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(100),
            jitter: 0.0,
        }
    }

    async fn ignore(_notice: RetryNotice) {}

    #[test]
    fn test_default_policy_matches_documented_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_capped_by_max_delay() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(5),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(3), Duration::from_secs(5));
        assert_eq!(policy.delay_for(30), Duration::from_secs(5));
    }

    #[test]
    fn test_delay_with_jitter_stays_in_range() {
        let policy = RetryPolicy {
            jitter: 0.5,
            ..RetryPolicy::default()
        };
        let millis = policy.delay_for(1).as_millis();
        assert!((1000..=3000).contains(&millis));
    }

    #[test]
    fn test_transient_reason() {
        assert_eq!(
            transient_reason(&AgentError::Api(ApiError::RateLimited { retry_after: None })),
            Some(RetryReason::RateLimited)
        );
        assert_eq!(
            transient_reason(&AgentError::Api(ApiError::Timeout)),
            Some(RetryReason::TimedOut)
        );
        assert_eq!(
            transient_reason(&AgentError::Api(ApiError::AuthenticationFailed)),
            None
        );
        assert_eq!(
            transient_reason(&AgentError::Api(ApiError::ServerError {
                status: 500,
                message: "boom".into()
            })),
            None
        );
        assert_eq!(transient_reason(&AgentError::UnknownTool("x".into())), None);
    }

    #[tokio::test]
    async fn test_success_first_try_sends_no_notice() {
        let counter = AtomicU32::new(0);
        let notices = Arc::new(Mutex::new(Vec::new()));

        let result = with_retry(
            &fast_policy(3),
            "open",
            || async {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AgentError>(7)
            },
            |notice| {
                let notices = notices.clone();
                async move { notices.lock().unwrap().push(notice) }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(notices.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_three_rate_limits_then_success() {
        let counter = AtomicU32::new(0);
        let notices = Arc::new(Mutex::new(Vec::new()));

        let result = with_retry(
            &fast_policy(3),
            "open",
            || async {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 3 {
                    Err(AgentError::Api(ApiError::RateLimited { retry_after: None }))
                } else {
                    Ok("stream")
                }
            },
            |notice| {
                let notices = notices.clone();
                async move { notices.lock().unwrap().push(notice) }
            },
        )
        .await;

        assert_eq!(result.unwrap(), "stream");
        assert_eq!(counter.load(Ordering::SeqCst), 4);

        let notices = notices.lock().unwrap();
        assert_eq!(notices.len(), 3);
        assert!(notices.iter().all(|n| n.reason == RetryReason::RateLimited));
        assert_eq!(
            notices.iter().map(|n| n.attempt).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(notices[0].delay < notices[1].delay);
        assert!(notices[1].delay < notices[2].delay);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_error() {
        let counter = AtomicU32::new(0);

        let result = with_retry(
            &fast_policy(3),
            "open",
            || async {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(AgentError::Api(ApiError::Timeout))
            },
            ignore,
        )
        .await;

        assert!(matches!(result, Err(AgentError::Api(ApiError::Timeout))));
        // Initial call + 3 retries.
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let counter = AtomicU32::new(0);

        let result = with_retry(
            &fast_policy(3),
            "open",
            || async {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(AgentError::Api(ApiError::AuthenticationFailed))
            },
            ignore,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_never_retries() {
        let counter = AtomicU32::new(0);

        let result = with_retry(
            &fast_policy(0),
            "open",
            || async {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(AgentError::Api(ApiError::RateLimited { retry_after: Some(1) }))
            },
            ignore,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_custom_classifier() {
        let counter = AtomicU32::new(0);

        let result = with_retry_if(
            &fast_policy(1),
            "tool",
            || async {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(AgentError::ToolExecution("flaky".into()))
                } else {
                    Ok(())
                }
            },
            |e| matches!(e, AgentError::ToolExecution(_)).then_some(RetryReason::TimedOut),
            ignore,
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
