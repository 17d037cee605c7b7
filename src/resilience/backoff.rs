//! Exponential backoff with jitter for child restarts.

use std::time::Duration;

use rand::Rng;

use crate::config::SupervisorConfig;

/// Delay schedule between consecutive restarts of a supervised child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartBackoff {
    base: Duration,
    max: Duration,
}

impl RestartBackoff {
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_max_ms),
        )
    }

    /// Delay before restart number `attempt` (1-based). Attempt 0 restarts immediately.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 2u32.saturating_pow(attempt - 1);
        let capped = self.base.saturating_mul(factor).min(self.max);

        // Up to 10% jitter so restarts of sibling children spread out.
        let jitter_ms = capped.as_millis() as u64 / 10;
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..jitter_ms)
        } else {
            0
        };

        capped + Duration::from_millis(jitter)
    }
}

impl Default for RestartBackoff {
    fn default() -> Self {
        Self::from_config(&SupervisorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_exponentially_and_caps() {
        let backoff = RestartBackoff::new(Duration::from_millis(100), Duration::from_millis(1_000));

        assert_eq!(backoff.delay(0), Duration::ZERO);
        assert!(backoff.delay(1) >= Duration::from_millis(100));
        assert!(backoff.delay(1) < Duration::from_millis(110));
        assert!(backoff.delay(2) >= Duration::from_millis(200));

        let capped = backoff.delay(20);
        assert!(capped >= Duration::from_millis(1_000));
        assert!(capped < Duration::from_millis(1_100));
    }

    #[test]
    fn zero_base_never_waits() {
        let backoff = RestartBackoff::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(backoff.delay(5), Duration::ZERO);
    }
}
