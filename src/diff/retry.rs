use std::time::Duration;

pub const MAX_RETRIES_CAP: u32 = 5;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Linear backoff: retry `n` waits `n × backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries: max_retries.min(MAX_RETRIES_CAP),
            backoff,
        }
    }

    /// Retry count as configured, which may be negative; clamped to `0..=5`.
    pub fn from_config(max_retries: i64, backoff: Duration) -> Self {
        let clamped = max_retries.clamp(0, i64::from(MAX_RETRIES_CAP)) as u32;
        Self::new(clamped, backoff)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Delay before retry `retry` (1-based); zero for the first attempt.
    pub fn delay(&self, retry: u32) -> Duration {
        self.backoff.saturating_mul(retry.min(self.max_retries))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_BACKOFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_retry_count() {
        assert_eq!(RetryPolicy::from_config(-3, DEFAULT_BACKOFF).max_retries(), 0);
        assert_eq!(RetryPolicy::from_config(9, DEFAULT_BACKOFF).max_retries(), 5);
        assert_eq!(RetryPolicy::default().max_attempts(), 3);
    }

    #[test]
    fn delays_grow_linearly_and_stay_bounded() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.delay(0), Duration::ZERO);
        let delays: Vec<_> = (1..=policy.max_retries()).map(|n| policy.delay(n)).collect();
        assert!(delays.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(policy.delay(50), Duration::from_millis(500));
    }
}
