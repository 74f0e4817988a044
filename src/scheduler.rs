//! Bounded retry loop around a single-shot pod lookup

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::clock::Clock;
use crate::error::{AttestorError, Result};

/// Where one attestation call stands in its poll loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState<T> {
    Polling { attempt: u32 },
    Matched(T),
    Exhausted,
    Cancelled,
}

/// Drives a lookup until it matches, runs out of attempts or is cancelled.
///
/// The lookup returns `Ok(None)` for "not found yet"; any error it returns
/// ends the loop immediately.
#[derive(Debug, Clone)]
pub struct PollScheduler {
    clock: Arc<dyn Clock>,
    max_attempts: u32,
    retry_interval: Duration,
}

impl PollScheduler {
    pub fn new(clock: Arc<dyn Clock>, max_attempts: u32, retry_interval: Duration) -> Self {
        Self {
            clock,
            max_attempts,
            retry_interval,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut lookup: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let mut state = PollState::Polling { attempt: 0 };
        loop {
            state = match state {
                PollState::Polling { attempt } => self.tick(attempt, cancel, &mut lookup).await?,
                PollState::Matched(value) => return Ok(value),
                PollState::Exhausted => return Err(AttestorError::PollAttemptsExhausted),
                PollState::Cancelled => return Err(AttestorError::Cancelled),
            };
        }
    }

    async fn tick<T, F, Fut>(
        &self,
        attempt: u32,
        cancel: &CancellationToken,
        lookup: &mut F,
    ) -> Result<PollState<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        if cancel.is_cancelled() {
            return Ok(PollState::Cancelled);
        }
        if let Some(value) = lookup(attempt).await? {
            return Ok(PollState::Matched(value));
        }

        let attempt = attempt + 1;
        if attempt >= self.max_attempts {
            return Ok(PollState::Exhausted);
        }
        debug!(
            attempt,
            max_attempts = self.max_attempts,
            "No match yet, waiting before next poll"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(PollState::Cancelled),
            _ = self.clock.sleep(self.retry_interval) => Ok(PollState::Polling { attempt }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn scheduler(clock: Arc<ManualClock>, max_attempts: u32) -> PollScheduler {
        PollScheduler::new(clock, max_attempts, Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_match_on_first_attempt() {
        let clock = Arc::new(ManualClock::new());
        let result = scheduler(clock.clone(), 3)
            .run(&CancellationToken::new(), |_| async { Ok(Some("pod")) })
            .await
            .unwrap();
        assert_eq!(result, "pod");
        assert_eq!(clock.pending_sleepers(), 0);
    }

    #[tokio::test]
    async fn test_match_after_retries() {
        let clock = Arc::new(ManualClock::new());
        let scheduler = scheduler(clock.clone(), 5);
        let cancel = CancellationToken::new();

        let run = tokio::spawn(async move {
            scheduler
                .run(&cancel, |attempt| async move {
                    Ok((attempt == 2).then_some(attempt))
                })
                .await
        });
        for _ in 0..2 {
            clock.wait_for_sleepers(1).await;
            clock.advance(Duration::from_millis(500));
        }
        assert_eq!(run.await.unwrap().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_after_max_attempts() {
        let clock = Arc::new(ManualClock::new());
        let scheduler = scheduler(clock.clone(), 3);
        let lookups = Arc::new(AtomicU32::new(0));
        let counter = lookups.clone();

        let run = tokio::spawn(async move {
            scheduler
                .run(&CancellationToken::new(), move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok(None::<()>) }
                })
                .await
        });
        for _ in 0..2 {
            clock.wait_for_sleepers(1).await;
            clock.advance(Duration::from_millis(500));
        }

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, AttestorError::PollAttemptsExhausted));
        assert_eq!(lookups.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let clock = Arc::new(ManualClock::new());
        let scheduler = scheduler(clock.clone(), 60);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let run = tokio::spawn(async move {
            scheduler
                .run(&token, |_| async { Ok(None::<()>) })
                .await
        });
        clock.wait_for_sleepers(1).await;
        cancel.cancel();

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, AttestorError::Cancelled));
        assert_eq!(clock.pending_sleepers(), 0);
    }

    #[tokio::test]
    async fn test_lookup_error_is_terminal() {
        let clock = Arc::new(ManualClock::new());
        let lookups = AtomicU32::new(0);
        let err = scheduler(clock, 10)
            .run(&CancellationToken::new(), |_| {
                lookups.fetch_add(1, Ordering::SeqCst);
                async { Err::<Option<()>, _>(AttestorError::Kubelet("403 Forbidden".into())) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AttestorError::Kubelet(_)));
        assert_eq!(lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_skips_lookup() {
        let clock = Arc::new(ManualClock::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = scheduler(clock, 10)
            .run(&cancel, |_| async { Ok(Some(())) })
            .await
            .unwrap_err();
        assert!(matches!(err, AttestorError::Cancelled));
    }
}
