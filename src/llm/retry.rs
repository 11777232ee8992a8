//! Bounded retry with a fixed interval, used while model servers warm up.
//!
//! This only guards initialization. Calls made during a session are never retried.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::RetryConfig;
use crate::error::{RagError, RagResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wall-clock budget measured from the first attempt.
    pub timeout: Duration,
    /// Pause between a failed attempt and the next one.
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryConfig::default().into()
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(cfg: RetryConfig) -> Self {
        Self {
            timeout: cfg.timeout(),
            interval: cfg.interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitState {
    Uninitialized,
    Initializing,
    Ready,
    Failed { message: String },
}

/// Drives one backend through `Uninitialized -> Initializing -> Ready | Failed`.
#[derive(Debug)]
pub struct Initializer {
    name: String,
    policy: RetryPolicy,
    state: InitState,
    attempts: u32,
}

impl Initializer {
    pub fn new(name: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            state: InitState::Uninitialized,
            attempts: 0,
        }
    }

    pub fn state(&self) -> &InitState {
        &self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Run `op` until it succeeds or the next attempt would start at or after the deadline.
    pub async fn run<T, F, Fut>(&mut self, mut op: F) -> RagResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.state = InitState::Initializing;
        self.attempts = 0;
        let start = Instant::now();

        loop {
            self.attempts += 1;
            tracing::debug!("{}: initialization attempt {}", self.name, self.attempts);

            match op().await {
                Ok(value) => {
                    tracing::info!(
                        "{} ready after {} attempt(s)",
                        self.name,
                        self.attempts
                    );
                    self.state = InitState::Ready;
                    return Ok(value);
                }
                Err(e) => {
                    let elapsed = start.elapsed();
                    tracing::warn!(
                        "{} not ready (attempt {}, elapsed {:.0}s): {e:#}",
                        self.name,
                        self.attempts,
                        elapsed.as_secs_f64()
                    );
                    if elapsed + self.policy.interval >= self.policy.timeout {
                        let message = format!("{e:#}");
                        tracing::error!(
                            "{}: giving up after {} attempts",
                            self.name,
                            self.attempts
                        );
                        self.state = InitState::Failed {
                            message: message.clone(),
                        };
                        return Err(RagError::BackendUnavailable {
                            attempts: self.attempts,
                            message,
                        });
                    }
                    tokio::time::sleep(self.policy.interval).await;
                }
            }
        }
    }
}

/// Convenience wrapper around [`Initializer::run`].
pub async fn retry_with_timeout<T, F, Fut>(
    name: &str,
    policy: RetryPolicy,
    op: F,
) -> RagResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    Initializer::new(name, policy).run(op).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(60), Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_twelve_attempts() {
        // Server stays down for 70s, longer than the 60s budget.
        let start = Instant::now();
        let mut init = Initializer::new("llm", policy());
        let result: RagResult<()> = init
            .run(|| async move {
                if start.elapsed() < Duration::from_secs(70) {
                    anyhow::bail!("connection refused")
                }
                Ok(())
            })
            .await;

        match result {
            Err(RagError::BackendUnavailable { attempts, message }) => {
                assert_eq!(attempts, 12);
                assert!(message.contains("connection refused"));
            }
            other => panic!("expected BackendUnavailable, got {other:?}"),
        }
        assert_eq!(init.attempts(), 12);
        assert!(matches!(init.state(), InitState::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_once_server_warms_up() {
        let start = Instant::now();
        let mut init = Initializer::new("embedder", policy());
        let value = init
            .run(|| async move {
                if start.elapsed() < Duration::from_secs(12) {
                    anyhow::bail!("warming up")
                }
                Ok(42)
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        // Attempts at t=0, 5, 10 fail; t=15 succeeds.
        assert_eq!(init.attempts(), 4);
        assert_eq!(init.state(), &InitState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success_does_not_sleep() {
        let start = Instant::now();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let value = retry_with_timeout("llm", policy(), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok("up")
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "up");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_initial_state_is_uninitialized() {
        let init = Initializer::new("llm", RetryPolicy::default());
        assert_eq!(init.state(), &InitState::Uninitialized);
        assert_eq!(init.attempts(), 0);
    }
}
