//! Backoff policy for source failures.
//!
//! Retries are unbounded: a source outage only ever delays the scan. The
//! cursor does not move while retrying, so no records are lost.

use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Fixed-interval backoff with optional jitter and no attempt limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    interval: Duration,
    jitter: Duration,
}

impl RetryPolicy {
    /// One minute between attempts.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            jitter: Duration::ZERO,
        }
    }

    /// Zero-delay policy for tests.
    pub fn immediate() -> Self {
        Self::fixed(Duration::ZERO)
    }

    /// Add up to `jitter` of random extra delay to each wait.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn jitter(&self) -> Duration {
        self.jitter
    }

    /// Delay before retry number `attempt` (1-based). The interval is fixed;
    /// `attempt` is accepted so callers log and compute delays uniformly.
    pub fn delay(&self, _attempt: u32) -> Duration {
        if self.jitter.is_zero() {
            return self.interval;
        }
        let extra_ms = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        self.interval + Duration::from_millis(extra_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Self::DEFAULT_INTERVAL)
    }
}

/// Sleep for `delay` unless cancelled first. Returns `false` on cancellation.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_policy_is_constant() {
        let policy = RetryPolicy::fixed(Duration::from_secs(5));
        assert_eq!(policy.delay(1), Duration::from_secs(5));
        assert_eq!(policy.delay(1_000), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy =
            RetryPolicy::fixed(Duration::from_millis(100)).with_jitter(Duration::from_millis(50));
        for attempt in 1..200 {
            let delay = policy.delay(attempt);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_default_matches_one_minute() {
        assert_eq!(RetryPolicy::default().interval(), Duration::from_secs(60));
        assert!(RetryPolicy::immediate().delay(1).is_zero());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_cancel() {
        let cancel = CancellationToken::new();
        assert!(sleep_or_cancel(Duration::from_secs(30), &cancel).await);
    }

    #[tokio::test]
    async fn test_sleep_interrupted_by_cancel() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let started = std::time::Instant::now();
        assert!(!sleep_or_cancel(Duration::from_secs(3600), &cancel).await);
        assert!(started.elapsed() < Duration::from_secs(60));
    }
}
