//! 上游瞬时失败的指数退避重试，整个序列受总超时约束

use std::future::Future;
use std::time::Duration;

use serde::Serialize;

use crate::config::ProxySection;
use crate::core::error::BackendError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub overall: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &ProxySection) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            overall: Duration::from_secs(settings.request_timeout_secs),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&ProxySection::default())
    }
}

/// 实际发生的尝试次数与每次等待
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    pub attempts: u32,
    pub delays: Vec<Duration>,
}

/// 执行 op，瞬时失败时按 1s、2s、4s… 退避重试；非瞬时失败立即返回
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    mut op: F,
) -> (Result<T, BackendError>, RetryReport)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut report = RetryReport::default();
    let sequence = async {
        let mut delay = policy.initial_backoff;
        let mut attempt = 0;
        loop {
            attempt += 1;
            report.attempts = attempt;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                    tracing::warn!(
                        "upstream attempt {}/{} failed: {}; retrying in {}s",
                        attempt,
                        policy.max_attempts,
                        e,
                        delay.as_secs_f64()
                    );
                    report.delays.push(delay);
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(policy.max_backoff);
                }
                Err(e) if e.is_transient() => {
                    return Err(BackendError::Exhausted {
                        attempts: attempt,
                        last: e.to_string(),
                    })
                }
                Err(e) => return Err(e),
            }
        }
    };
    let result = match tokio::time::timeout(policy.overall, sequence).await {
        Ok(r) => r,
        Err(_) => Err(BackendError::Deadline(policy.overall)),
    };
    (result, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_four_transient_failures_then_success() {
        let calls = AtomicU32::new(0);
        let (result, report) = with_retry(RetryPolicy::default(), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n <= 4 {
                    Err(BackendError::Transient(format!("boom {n}")))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(report.attempts, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(
            report.delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_is_fatal() {
        let (result, report) = with_retry::<(), _, _>(RetryPolicy::default(), |_| async {
            Err(BackendError::Transient("down".into()))
        })
        .await;
        assert!(matches!(result, Err(BackendError::Exhausted { attempts: 5, .. })));
        assert_eq!(report.delays.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_not_retried() {
        let (result, report) = with_retry::<(), _, _>(RetryPolicy::default(), |_| async {
            Err(BackendError::Fatal {
                status: 400,
                detail: "bad".into(),
            })
        })
        .await;
        assert!(matches!(result, Err(BackendError::Fatal { status: 400, .. })));
        assert_eq!(report.attempts, 1);
        assert!(report.delays.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_deadline_bounds_sequence() {
        let policy = RetryPolicy {
            overall: Duration::from_secs(5),
            ..RetryPolicy::default()
        };
        let (result, report) = with_retry::<(), _, _>(policy, |_| async {
            Err(BackendError::Transient("slow".into()))
        })
        .await;
        assert!(matches!(result, Err(BackendError::Deadline(_))));
        assert!(report.attempts >= 3);
    }
}
