use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
pub const MAX_JITTER_MS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
        }
    }
}

/// Per-call adjustments layered over the client defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryOverrides {
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
}

impl RetryConfig {
    pub fn merged(self, overrides: &RetryOverrides) -> Self {
        Self {
            timeout_ms: overrides.timeout_ms.unwrap_or(self.timeout_ms),
            max_retries: overrides.max_retries.unwrap_or(self.max_retries),
            base_delay_ms: overrides.base_delay_ms.unwrap_or(self.base_delay_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to wait after the failed attempt `attempt` (0-based) before the next one.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        backoff_delay(self.base_delay(), attempt, random_jitter())
    }
}

/// `base * 2^attempt + jitter`, saturating instead of overflowing.
pub fn backoff_delay(base: Duration, attempt: u32, jitter: Duration) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
        .saturating_add(jitter)
}

pub fn random_jitter() -> Duration {
    Duration::from_micros(rand::thread_rng().gen_range(0..MAX_JITTER_MS * 1_000))
}
