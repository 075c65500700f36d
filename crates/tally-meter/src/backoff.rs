//! Exponential backoff for delivery retries.

use std::time::Duration;

/// Exponential backoff: the delay doubles each attempt up to a cap, with a
/// small jitter to avoid retry storms against a rate-limited provider.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    jitter: f64,
}

impl ExponentialBackoff {
    /// Create a backoff doubling from `initial` up to `max`.
    #[must_use]
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            jitter: 0.1,
        }
    }

    /// Set the jitter fraction (clamped to `0.0..=1.0`).
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before the given attempt (1-based).
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial.as_millis() as f64
            * 2f64.powi(attempt.saturating_sub(1).min(24) as i32);
        let clamped = base.min(self.max.as_millis() as f64);

        let jittered = if self.jitter > 0.0 {
            let range = clamped * self.jitter;
            let offset = rand::random::<f64>() * range * 2.0 - range;
            (clamped + offset).max(0.0)
        } else {
            clamped
        };

        Duration::from_millis(jittered as u64)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(60),
            jitter: 0.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_per_attempt() {
        let backoff =
            ExponentialBackoff::new(Duration::from_millis(500), Duration::from_secs(60))
                .with_jitter(0.0);

        assert_eq!(backoff.delay_for(1), Duration::from_millis(500));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(1000));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(2000));
        assert_eq!(backoff.delay_for(4), Duration::from_millis(4000));
    }

    #[test]
    fn delay_caps_at_max() {
        let backoff =
            ExponentialBackoff::new(Duration::from_millis(500), Duration::from_secs(2))
                .with_jitter(0.0);

        assert_eq!(backoff.delay_for(10), Duration::from_secs(2));
        // Very large attempt counts must not overflow.
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_secs(2));
    }

    #[test]
    fn jitter_stays_near_base() {
        let backoff =
            ExponentialBackoff::new(Duration::from_millis(1000), Duration::from_secs(60))
                .with_jitter(0.1);

        let delay = backoff.delay_for(1).as_millis();
        assert!((900..=1100).contains(&delay));
    }
}
