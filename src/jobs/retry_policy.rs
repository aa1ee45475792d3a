use std::time::Duration;

/// Exponential backoff with symmetric jitter and a hard cap.
///
/// The nominal delay for attempt `n` is `base * 2^n`, clamped to `max_delay`.
/// Jitter moves it by up to `jitter_ratio` of itself in either direction and
/// the result is clamped to `max_delay` again, so it never drops below
/// [`RetryPolicy::floor`] or rises above `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
    jitter_ratio: f64,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration, jitter_ratio: f64) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter_ratio: jitter_ratio.clamp(0.0, 0.99),
        }
    }

    /// Un-jittered delay for the given attempt count.
    #[must_use]
    pub fn nominal(&self, attempts: i32) -> Duration {
        let exponent = u32::try_from(attempts.max(0)).unwrap_or(0);
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);

        let delay_ms = 2u64
            .checked_pow(exponent)
            .and_then(|factor| base_ms.checked_mul(factor))
            .unwrap_or(u64::MAX)
            .min(max_ms);

        Duration::from_millis(delay_ms)
    }

    /// Smallest delay [`RetryPolicy::backoff`] can return for this attempt count.
    #[must_use]
    pub fn floor(&self, attempts: i32) -> Duration {
        self.nominal(attempts).mul_f64(1.0 - self.jitter_ratio)
    }

    /// Delay before a job that failed on attempt `attempts` may be claimed again.
    #[must_use]
    pub fn backoff(&self, attempts: i32) -> Duration {
        let nominal = self.nominal(attempts);

        // Uniform in [-jitter_ratio, +jitter_ratio]
        let jitter = (fastrand::f64() * 2.0 - 1.0) * self.jitter_ratio;
        let jittered = nominal.mul_f64(1.0 + jitter);

        jittered.clamp(self.floor(attempts), self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(3600), 0.2)
    }
}
