//! Retry delay calculation

use std::time::Duration;

/// Exponential backoff with jitter for transfer retries
pub struct BackoffCalculator;

impl BackoffCalculator {
    /// Calculate retry delay with exponential backoff
    ///
    /// `base * multiplier^(retry_count - 1)`, capped at `max_delay`, so the
    /// first retry waits `base_delay`.
    pub fn calculate_retry_delay(
        retry_count: u32,
        base_delay: Duration,
        max_delay: Duration,
        multiplier: u32,
    ) -> Duration {
        let exponent = retry_count.saturating_sub(1);
        let factor = u64::from(multiplier).saturating_pow(exponent);
        let delay_millis = u64::try_from(base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_millis = u64::try_from(max_delay.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(delay_millis.saturating_mul(factor).min(max_millis))
    }

    /// Retry delay with symmetric jitter to avoid synchronized retries
    ///
    /// The result stays within `±jitter_percentage` of the exponential delay
    /// and never exceeds `max_delay`.
    pub fn calculate_jittered_delay(
        retry_count: u32,
        base_delay: Duration,
        max_delay: Duration,
        multiplier: u32,
        jitter_percentage: f64,
    ) -> Duration {
        let delay = Self::calculate_retry_delay(retry_count, base_delay, max_delay, multiplier);
        let millis = delay.as_millis() as u64;

        let jitter_range = (millis as f64 * jitter_percentage.clamp(0.0, 1.0)) as u64;
        if jitter_range == 0 {
            return delay;
        }

        let jittered = (millis + fastrand::u64(0..=jitter_range * 2)).saturating_sub(jitter_range);
        Duration::from_millis(jittered).min(max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_grows_exponentially() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(30);

        assert_eq!(
            BackoffCalculator::calculate_retry_delay(1, base, max, 2),
            Duration::from_millis(100)
        );
        assert_eq!(
            BackoffCalculator::calculate_retry_delay(2, base, max, 2),
            Duration::from_millis(200)
        );
        assert_eq!(
            BackoffCalculator::calculate_retry_delay(3, base, max, 2),
            Duration::from_millis(400)
        );
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let delay = BackoffCalculator::calculate_retry_delay(
            60,
            Duration::from_secs(1),
            Duration::from_secs(60),
            2,
        );
        assert_eq!(delay, Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let base = Duration::from_millis(1000);
        let max = Duration::from_secs(60);

        for _ in 0..100 {
            let delay = BackoffCalculator::calculate_jittered_delay(1, base, max, 2, 0.2);
            assert!(delay >= Duration::from_millis(800), "{:?}", delay);
            assert!(delay <= Duration::from_millis(1200), "{:?}", delay);
        }

        assert_eq!(
            BackoffCalculator::calculate_jittered_delay(1, base, max, 2, 0.0),
            base
        );
    }
}
