//! Exponential backoff.
//!
//! [`Backoff`] is a [`DelayPolicy`] computing
//! `initial * multiplier^(attempt - 1)`, capped at `max`. With jitter enabled
//! the delay is drawn uniformly from `[0, computed]` ("full jitter"), which
//! spreads out clients that failed at the same moment.

use std::time::Duration;

use rand::Rng;

use crate::retry::{DelayPolicy, Outcome};

/// Exponential backoff with an upper bound and optional full jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    initial: Duration,
    multiplier: f64,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    /// Creates a backoff starting at `initial`, doubling each attempt, capped
    /// at 30 seconds, without jitter.
    #[must_use]
    pub const fn exponential(initial: Duration) -> Self {
        Self {
            initial,
            multiplier: 2.0,
            max: Duration::from_secs(30),
            jitter: false,
        }
    }

    /// Creates a backoff that always waits `delay`.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            initial: delay,
            multiplier: 1.0,
            max: delay,
            jitter: false,
        }
    }

    /// Sets the growth factor. Values below 1 are treated as 1.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Sets the upper bound.
    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    /// Enables or disables full jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns the un-jittered delay after failed attempt number `attempt`
    /// (1-based).
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(secs)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(200)).with_max(Duration::from_secs(3))
    }
}

impl DelayPolicy for Backoff {
    fn name(&self) -> &'static str {
        "backoff"
    }

    fn delay(&self, _outcome: Outcome<'_>, attempt: u32) -> Option<Duration> {
        let base = self.base_delay(attempt);
        if !self.jitter || base.is_zero() {
            return Some(base);
        }
        let factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
        Some(base.mul_f64(factor))
    }
}
