//! Client-wide defaults.
//!
//! [`ClientConfig`] carries the values a call falls back to when its own
//! options leave a setting open, plus the background sweeper period.
//!
//! ```
//! use std::time::Duration;
//! use callbox::ClientConfig;
//!
//! let config = ClientConfig::builder()
//!     .batch_interval(Duration::from_millis(20))
//!     .build();
//! assert_eq!(config.concurrency.get(), 4);
//! assert_eq!(config.batch_size, 10);
//! ```

use std::time::Duration;

use bounded_integer::bounded_integer;
use serde::{Deserialize, Serialize};

use crate::options::Backoff;

bounded_integer! {
    /// Default admission limit for parallel queues (1-255).
    #[repr(u8)]
    pub struct ConcurrencyLimit { 1..=255 }
}

const DEFAULT_CONCURRENCY: ConcurrencyLimit = match ConcurrencyLimit::new(4) {
    Some(limit) => limit,
    None => ConcurrencyLimit::MIN,
};

fn default_concurrency() -> ConcurrencyLimit {
    DEFAULT_CONCURRENCY
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_retry_base_delay() -> Duration {
    Duration::from_millis(250)
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_interval() -> Duration {
    Duration::from_millis(50)
}

/// Defaults shared by every call through one client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Limit for parallel queues that do not name their own.
    #[serde(default = "default_concurrency")]
    pub concurrency: ConcurrencyLimit,
    /// Period of the background cache sweep (e.g. "60s", "5m").
    #[serde(default = "default_cleanup_interval", with = "humantime_serde")]
    pub cleanup_interval: Duration,
    /// Base delay between retries.
    #[serde(default = "default_retry_base_delay", with = "humantime_serde")]
    pub retry_base_delay: Duration,
    /// Backoff formula for retries.
    #[serde(default)]
    pub retry_backoff: Backoff,
    /// Batch size threshold.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Batch quiet period.
    #[serde(default = "default_batch_interval", with = "humantime_serde")]
    pub batch_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            cleanup_interval: default_cleanup_interval(),
            retry_base_delay: default_retry_base_delay(),
            retry_backoff: Backoff::default(),
            batch_size: default_batch_size(),
            batch_interval: default_batch_interval(),
        }
    }
}

impl ClientConfig {
    /// Starts from the defaults.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

/// Fluent builder for [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Sets the default parallel limit.
    pub fn concurrency(mut self, limit: ConcurrencyLimit) -> Self {
        self.config.concurrency = limit;
        self
    }

    /// Sets the sweep period.
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    /// Sets the retry base delay.
    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.config.retry_base_delay = delay;
        self
    }

    /// Sets the retry backoff formula.
    pub fn retry_backoff(mut self, backoff: Backoff) -> Self {
        self.config.retry_backoff = backoff;
        self
    }

    /// Sets the batch size threshold.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Sets the batch quiet period.
    pub fn batch_interval(mut self, interval: Duration) -> Self {
        self.config.batch_interval = interval;
        self
    }

    /// Finishes the config.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}
