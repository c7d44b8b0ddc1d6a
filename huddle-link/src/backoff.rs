//! Capped exponential reconnect backoff with additive jitter.
//!
//! ```text
//! delay(n) = min(base · multiplier^min(n, max_attempts), cap) + U[0, jitter]
//! ```
//!
//! With the defaults the exponential part reaches the 15s cap after
//! eight failures and stays there.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub multiplier: f64,
    /// Attempt count after which the exponent stops growing.
    pub max_attempts: u32,
    /// Upper bound of the random addition.
    pub jitter_ms: u64,
    /// Upper bound of the exponential part.
    pub cap_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 350,
            multiplier: 1.6,
            max_attempts: 12,
            jitter_ms: 450,
            cap_ms: 15_000,
        }
    }
}

impl BackoffConfig {
    /// Jitter-free delay for a given attempt count.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(self.max_attempts) as i32;
        let raw = self.base_ms as f64 * self.multiplier.powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.cap_ms as f64)
        } else {
            self.cap_ms as f64
        };
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

/// Attempt counter plus the policy that turns it into delays.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next reconnect, advancing the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with(&mut rand::thread_rng())
    }

    /// Same as [`next_delay`](Self::next_delay) with a caller-supplied RNG.
    pub fn next_delay_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let jitter = if self.config.jitter_ms > 0 {
            rng.gen_range(0..=self.config.jitter_ms)
        } else {
            0
        };
        let delay = self.config.base_delay(self.attempt) + Duration::from_millis(jitter);
        if self.attempt < self.config.max_attempts {
            self.attempt += 1;
        }
        delay
    }

    /// Forget past failures. Called after a successful open.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            jitter_ms: 0,
            ..BackoffConfig::default()
        }
    }

    #[test]
    fn test_first_delay_is_base() {
        let mut backoff = Backoff::new(no_jitter());
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(560));
        assert_eq!(backoff.attempt(), 2);
    }

    #[test]
    fn test_delays_non_decreasing_and_capped() {
        let mut backoff = Backoff::new(no_jitter());
        let mut previous = Duration::ZERO;
        for _ in 0..40 {
            let delay = backoff.next_delay();
            assert!(delay >= previous, "{delay:?} < {previous:?}");
            assert!(delay <= Duration::from_millis(15_000));
            previous = delay;
        }
        assert_eq!(previous, Duration::from_millis(15_000));
    }

    #[test]
    fn test_attempt_counter_plateaus() {
        let mut backoff = Backoff::new(no_jitter());
        for _ in 0..100 {
            backoff.next_delay();
        }
        assert_eq!(backoff.attempt(), 12);
    }

    #[test]
    fn test_plateau_below_cap() {
        // Exponent stops at max_attempts even when the cap is out of reach.
        let config = BackoffConfig {
            base_ms: 10,
            multiplier: 2.0,
            max_attempts: 3,
            jitter_ms: 0,
            cap_ms: 1_000_000,
        };
        let mut backoff = Backoff::new(config);
        let delays: Vec<_> = (0..6).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![10, 20, 40, 80, 80, 80]);
    }

    #[test]
    fn test_jitter_bounded() {
        let config = BackoffConfig::default();
        let mut backoff = Backoff::new(config.clone());
        for _ in 0..200 {
            let delay = backoff.next_delay();
            // Cap bounds the exponential part; jitter rides on top.
            assert!(delay <= Duration::from_millis(config.cap_ms + config.jitter_ms));
        }
        let mut fresh = Backoff::new(config);
        let first = fresh.next_delay();
        assert!(first >= Duration::from_millis(350) && first <= Duration::from_millis(800));
    }

    #[test]
    fn test_jitter_uses_supplied_rng() {
        let mut backoff = Backoff::new(BackoffConfig::default());
        let mut rng = StepRng::new(0, 0);
        assert_eq!(backoff.next_delay_with(&mut rng), Duration::from_millis(350));
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(no_jitter());
        for _ in 0..5 {
            backoff.next_delay();
        }
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
    }
}
