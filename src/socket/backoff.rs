//! Reconnect delay policies.

use std::time::Duration;

use rand::Rng;

/// Delay before reconnect attempt `attempt` (1-based).
pub trait Backoff: Send + Sync + std::fmt::Debug {
    fn delay(&self, attempt: u32) -> Duration;
}

/// Same delay before every attempt.
#[derive(Debug, Clone, Copy)]
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Backoff for FixedBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// `base * 2^(attempt-1)`, capped at `max`, then stretched by up to
/// `jitter_factor` of itself.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    jitter_factor: f64,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration, jitter_factor: f64) -> Self {
        Self {
            base,
            max,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
        }
    }

    /// The capped exponential delay before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let capped = self.base_delay(attempt);
        if self.jitter_factor == 0.0 {
            return capped;
        }
        let random: f64 = rand::thread_rng().r#gen();
        capped.mul_f64(1.0 + random * self.jitter_factor)
    }
}
