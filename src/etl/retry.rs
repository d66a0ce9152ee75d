use crate::etl::error::{EtlError, Result};
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Delay between retries in milliseconds
    pub retry_delay_ms: u64,
    /// Whether to use exponential backoff
    pub use_backoff: bool,
    /// Upper bound of the random jitter added to backoff delays
    pub jitter_ms: u64,
    /// Only retry errors classified as transient
    pub retry_transient_only: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            use_backoff: true,
            jitter_ms: 100,
            retry_transient_only: false,
        }
    }
}

impl RetryConfig {
    pub fn from_json(input: &Value) -> Result<Self> {
        serde_json::from_value(input.clone()).map_err(EtlError::from_serde)
    }

    /// Delay before the retry following failed attempt `attempt` (0-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if !self.use_backoff {
            return Duration::from_millis(self.retry_delay_ms);
        }
        let factor = 2_u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(self.retry_delay_ms.saturating_mul(factor).saturating_add(jitter))
    }

    /// Sleep for the appropriate delay
    pub async fn sleep(&self, attempt: u32) {
        tokio::time::sleep(self.calculate_delay(attempt)).await;
    }
}
