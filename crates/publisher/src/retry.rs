//! Retry policy: exponential backoff with jitter, DLQ threshold.

use chrono::Duration;
use rand::Rng;

/// Backoff parameters. `delay(n) = min(base · 2^n, max) + U(0, 10% · delay)`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::seconds(1),
            max: Duration::hours(1),
            max_attempts: 10,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next try after `attempt` failed attempts.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.num_milliseconds() as f64;
        let max_ms = self.max.num_milliseconds() as f64;
        let delay_ms = (base_ms * 2f64.powi(attempt.min(63) as i32)).min(max_ms);

        // Jitter keeps a burst of failures from retrying in lockstep.
        let jitter_ms = delay_ms * 0.1 * rand::thread_rng().r#gen::<f64>();
        Duration::milliseconds((delay_ms + jitter_ms) as i64)
    }

    /// Whether an event with this many attempts belongs in the DLQ.
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy::default();

        for attempt in 0..12 {
            let delay = policy.delay(attempt);
            let floor = (1000f64 * 2f64.powi(attempt as i32)).min(3_600_000.0) as i64;
            let ceiling = (floor as f64 * 1.1) as i64 + 1;
            assert!(
                delay.num_milliseconds() >= floor && delay.num_milliseconds() <= ceiling,
                "attempt {attempt}: {}ms outside [{floor}, {ceiling}]",
                delay.num_milliseconds()
            );
        }

        // Far past the cap the delay stays bounded by max + jitter.
        let capped = policy.delay(40).num_milliseconds();
        assert!(capped <= 3_960_000);
    }

    #[test]
    fn threshold() {
        let policy = RetryPolicy::default();
        assert!(!policy.exhausted(9));
        assert!(policy.exhausted(10));
        assert!(policy.exhausted(11));
    }
}
