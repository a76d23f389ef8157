//! Exponential backoff between reconnection attempts

use std::time::Duration;

use crate::config::RetryConfig;

/// Doubling delay with a ceiling: the Nth wait is `min(base * 2^(N-1), max)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base_ms = base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = max.as_millis().min(u128::from(u64::MAX)) as u64;
        Self {
            base_ms,
            max_ms: max_ms.max(base_ms),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Delay before the attempt following `failures` consecutive failures
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64.checked_shl(failures - 1).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_ms.saturating_mul(factor).min(self.max_ms))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_until_capped() {
        let backoff = Backoff::default();
        let delays: Vec<u64> = (1..=8)
            .map(|n| backoff.delay_for(n).as_millis() as u64)
            .collect();
        assert_eq!(
            delays,
            vec![5_000, 10_000, 20_000, 40_000, 80_000, 160_000, 300_000, 300_000]
        );
    }

    #[test]
    fn test_formula_holds_for_large_counts() {
        let backoff = Backoff::new(Duration::from_millis(3), Duration::from_millis(1_000));
        for n in 1..200u32 {
            let expected = if n <= 20 {
                (3u64 << (n - 1)).min(1_000)
            } else {
                1_000
            };
            assert_eq!(backoff.delay_for(n), Duration::from_millis(expected));
        }
        assert_eq!(backoff.delay_for(0), Duration::ZERO);
    }
}
