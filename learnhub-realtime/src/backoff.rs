//! Exponential reconnect backoff with symmetric jitter.

// Delay arithmetic goes through f64; values are bounded by `max_delay`.
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

use std::time::Duration;

use rand::{Rng, SeedableRng, rngs::StdRng};
use shared::config::ReconnectConfig;

/// Reconnect delay schedule for one connection.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
    max_attempts: Option<u32>,
    attempt: u32,
    rng: StdRng,
}

impl Backoff {
    /// Policy from config with an entropy-seeded jitter source.
    #[must_use]
    pub fn new(config: &ReconnectConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Deterministic variant for tests.
    #[must_use]
    pub fn with_rng(config: &ReconnectConfig, rng: StdRng) -> Self {
        Self {
            initial: config.initial_delay(),
            max: config.max_delay(),
            multiplier: config.multiplier.max(1.0),
            jitter: config.jitter.clamp(0.0, 1.0),
            max_attempts: config.max_attempts,
            attempt: 0,
            rng,
        }
    }

    /// Attempts made since the last successful connection.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether the attempt budget is spent.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.max_attempts.is_some_and(|max| self.attempt >= max)
    }

    /// Delay before the next attempt, or `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }
        let base = self.base_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        if self.jitter == 0.0 || base.is_zero() {
            return Some(base);
        }
        let spread = base.as_millis() as f64 * self.jitter;
        let offset = self.rng.random_range(-spread..=spread);
        let millis = (base.as_millis() as f64 + offset).max(0.0) as u64;
        Some(Duration::from_millis(millis).min(self.max))
    }

    /// Starts over after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(63) as i32;
        let millis = self.initial.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(jitter: f64, max_attempts: Option<u32>) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            jitter,
            max_attempts,
        }
    }

    #[test]
    fn grows_exponentially_up_to_cap() {
        let mut backoff = Backoff::with_rng(&config(0.0, None), StdRng::seed_from_u64(7));
        let delays: Vec<u64> = (0..6)
            .filter_map(|_| backoff.next_delay())
            .map(|delay| delay.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut backoff = Backoff::with_rng(&config(0.5, None), StdRng::seed_from_u64(42));
        for expected in [100_u64, 200, 400, 800] {
            let delay = backoff.next_delay().unwrap().as_millis() as u64;
            assert!(delay >= expected / 2, "{delay} below {expected}");
            assert!(delay <= (expected * 3 / 2).min(1_000), "{delay} above {expected}");
        }
    }

    #[test]
    fn attempt_budget_and_reset() {
        let mut backoff = Backoff::with_rng(&config(0.0, Some(2)), StdRng::seed_from_u64(1));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.exhausted());
        assert!(backoff.next_delay().is_none());

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }
}
