//! Client configuration.

use std::time::Duration;

use serde::Deserialize;

/// Default capacity of the summary notification channel.
pub const DEFAULT_SUMMARY_CHANNEL_CAPACITY: usize = 64;

/// Default capacity of the error notification channel.
pub const DEFAULT_ERROR_CHANNEL_CAPACITY: usize = 32;

/// Delay before reopening the observe-state stream.
///
/// The first reopen after a stream that delivered events happens after
/// `initial_ms` (immediately by default). Each further consecutive failure
/// doubles the delay from `min_ms` up to `max_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResubscribeBackoff {
    pub initial_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Default for ResubscribeBackoff {
    fn default() -> Self {
        Self {
            initial_ms: 0,
            min_ms: 100,
            max_ms: 5_000,
        }
    }
}

impl ResubscribeBackoff {
    /// No delay at all; used by tests.
    pub fn immediate() -> Self {
        Self {
            initial_ms: 0,
            min_ms: 0,
            max_ms: 0,
        }
    }

    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures <= 1 {
            return Duration::from_millis(self.initial_ms);
        }
        let exponent = (consecutive_failures - 2).min(20);
        let ms = self.min_ms.saturating_mul(1u64 << exponent).min(self.max_ms);
        Duration::from_millis(ms)
    }
}

/// Configuration for a [`GameClient`](crate::client::GameClient).
///
/// # Example
///
/// ```
/// use jinrou_sync::config::ClientConfig;
///
/// let config = ClientConfig::from_json_str(r#"{ "summary_channel_capacity": 16 }"#).unwrap();
/// assert_eq!(config.summary_channel_capacity, 16);
/// assert!(config.validate_game_config);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Capacity of the summary broadcast channel. Slow subscribers lag and
    /// skip old summaries.
    pub summary_channel_capacity: usize,

    /// Capacity of the error broadcast channel.
    pub error_channel_capacity: usize,

    pub resubscribe_backoff: ResubscribeBackoff,

    /// Reject invalid game configs before calling the authority.
    pub validate_game_config: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            summary_channel_capacity: DEFAULT_SUMMARY_CHANNEL_CAPACITY,
            error_channel_capacity: DEFAULT_ERROR_CHANNEL_CAPACITY,
            resubscribe_backoff: ResubscribeBackoff::default(),
            validate_game_config: true,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config.clamped())
    }

    /// Set the capacity of the summary channel. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_summary_channel_capacity(mut self, capacity: usize) -> Self {
        self.summary_channel_capacity = capacity.max(1);
        self
    }

    /// Set the capacity of the error channel. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_error_channel_capacity(mut self, capacity: usize) -> Self {
        self.error_channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_resubscribe_backoff(mut self, backoff: ResubscribeBackoff) -> Self {
        self.resubscribe_backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_game_config_validation(mut self, enabled: bool) -> Self {
        self.validate_game_config = enabled;
        self
    }

    fn clamped(mut self) -> Self {
        // tokio panics on zero-capacity broadcast channels
        self.summary_channel_capacity = self.summary_channel_capacity.max(1);
        self.error_channel_capacity = self.error_channel_capacity.max(1);
        self
    }
}
