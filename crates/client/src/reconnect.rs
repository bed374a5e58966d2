//! Reconnect policy with jittered exponential back-off.

use std::time::Duration;

/// Controls how the client reconnects after losing the connection.
///
/// `backoff_factor` 1.0 with `jitter` 0.0 gives a fixed delay between
/// attempts. The attempt counter resets only after a completed handshake,
/// so a flapping link keeps backing off.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Cap on the delay between attempts.
    pub max_delay: Duration,
    /// Growth factor from one attempt to the next.
    pub backoff_factor: f64,
    /// Jitter fraction applied symmetrically around the computed delay,
    /// `0.0` disables.
    pub jitter: f64,
    /// Consecutive failures before giving up. `0` means retry forever.
    pub max_attempts: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            jitter: 0.25,
            max_attempts: 0, // unlimited
        }
    }
}

impl ReconnectBackoff {
    /// Delay to sleep before reconnect `attempt` (counted from 0).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let floor = self.initial_delay.as_millis() as f64;
        let ceiling = self.max_delay.as_millis() as f64;
        let capped = (floor * self.backoff_factor.powi(attempt as i32)).min(ceiling);

        // Spread attempts over [capped * (1 - jitter), capped * (1 + jitter)].
        let offset = 2.0 * jitter_fraction(attempt) - 1.0;
        let jittered = capped + capped * self.jitter * offset;
        Duration::from_millis(jittered.max(0.0) as u64)
    }

    /// True once `attempt` has used up the configured budget.
    pub fn should_give_up(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Hash of the attempt number mapped into [0, 1). Deterministic, so a
/// given attempt always lands on the same point in the jitter band.
fn jitter_fraction(attempt: u32) -> f64 {
    let hashed = attempt.wrapping_mul(0x9E37_79B9);
    f64::from(hashed) / f64::from(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_starts_at_a_second_and_tops_out_at_a_minute() {
        let policy = ReconnectBackoff::default();
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
        assert_eq!(policy.backoff_factor, 2.0);
        assert_eq!(policy.jitter, 0.25);
        assert_eq!(policy.max_attempts, 0);
    }

    #[test]
    fn growth_dominates_jitter_at_default_settings() {
        let policy = ReconnectBackoff::default();
        let delays: Vec<Duration> = (0..4).map(|n| policy.delay_for_attempt(n)).collect();
        assert!(
            delays.windows(2).all(|pair| pair[0] < pair[1]),
            "schedule went backwards: {delays:?}"
        );
    }

    #[test]
    fn jitter_stays_inside_the_configured_band() {
        let policy = ReconnectBackoff {
            initial_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(5),
            backoff_factor: 1.0,
            jitter: 0.5,
            max_attempts: 0,
        };
        // Flat curve at 400ms, so every delay must land in 400 ± 200.
        for attempt in 0..64 {
            let ms = policy.delay_for_attempt(attempt).as_millis();
            assert!((200..=600).contains(&ms), "attempt {attempt}: {ms}ms");
        }
    }

    #[test]
    fn same_attempt_always_gets_the_same_delay() {
        let policy = ReconnectBackoff::default();
        assert_eq!(policy.delay_for_attempt(6), policy.delay_for_attempt(6));
    }

    #[test]
    fn cap_bounds_the_exponential_curve() {
        let policy = ReconnectBackoff {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
            backoff_factor: 3.0,
            jitter: 0.1,
            max_attempts: 0,
        };
        for attempt in [5, 9, 30] {
            let delay = policy.delay_for_attempt(attempt);
            assert!(
                delay <= Duration::from_millis(8_800),
                "attempt {attempt}: {delay:?}"
            );
        }
    }

    #[test]
    fn zero_jitter_is_exactly_reproducible() {
        let policy = ReconnectBackoff {
            initial_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            jitter: 0.0,
            max_attempts: 0,
        };
        let schedule: Vec<u128> = (0..5)
            .map(|n| policy.delay_for_attempt(n).as_millis())
            .collect();
        assert_eq!(schedule, vec![300, 600, 1200, 2000, 2000]);
    }

    #[test]
    fn retry_budget_is_spent_after_max_attempts() {
        let policy = ReconnectBackoff {
            max_attempts: 3,
            ..Default::default()
        };
        let verdicts: Vec<bool> = (0..5).map(|n| policy.should_give_up(n)).collect();
        assert_eq!(verdicts, vec![false, false, false, true, true]);
    }

    #[test]
    fn zero_max_attempts_means_retry_forever() {
        let policy = ReconnectBackoff::default();
        assert!(!policy.should_give_up(0));
        assert!(!policy.should_give_up(u32::MAX));
    }
}
