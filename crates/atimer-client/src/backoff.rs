use std::time::Duration;

use rand::Rng;

pub const INITIAL_RETRY_DELAY_MS: u64 = 1000;
pub const MAX_RETRY_DELAY_MS: u64 = 30_000;
pub const MAX_RETRY_ATTEMPTS: u32 = 10;
pub const BACKOFF_MULTIPLIER: u64 = 2;
/// Uniform spread applied around each delay (0.2 = ±20%).
pub const JITTER_RATIO: f64 = 0.2;

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub multiplier: u64,
    pub jitter_ratio: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            initial_delay_ms: INITIAL_RETRY_DELAY_MS,
            max_delay_ms: MAX_RETRY_DELAY_MS,
            max_attempts: MAX_RETRY_ATTEMPTS,
            multiplier: BACKOFF_MULTIPLIER,
            jitter_ratio: JITTER_RATIO,
        }
    }
}

impl BackoffPolicy {
    /// `min(initial * multiplier^retry, max)`, without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(retry);
        let ms = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Base delay spread uniformly by ±`jitter_ratio`, floored to whole milliseconds.
    pub fn jittered<R: Rng + ?Sized>(&self, retry: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(retry).as_millis() as f64;
        let spread = if self.jitter_ratio > 0.0 {
            rng.random_range(-self.jitter_ratio..=self.jitter_ratio)
        } else {
            0.0
        };
        Duration::from_millis((base * (1.0 + spread)).floor().max(0.0) as u64)
    }

    pub fn allows_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_attempts
    }
}
