//! Reconciler tuning, loaded from RON.
//!
//! ```ron
//! (
//!     debounce_ms: 300,
//!     max_attempts: 5,
//! )
//! ```
//!
//! Every field is optional; missing fields take the defaults below.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Write-behind and channel sizing for a reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArborConfig {
    /// Quiet period after the last local change to an id before it is written.
    pub debounce_ms: u64,
    /// How often the flush worker looks for due writes.
    pub flush_tick_ms: u64,
    /// Attempts per write before it is dropped and logged.
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt.
    pub backoff_base_ms: u64,
    /// Upper bound on the retry delay.
    pub backoff_max_ms: u64,
    /// How often an unready store is polled before hydration.
    pub hydrate_retry_ms: u64,
    /// Buffered row snapshots per store subscriber.
    pub change_channel_capacity: usize,
    /// Pending commands per reconciler before callers wait.
    pub command_queue_depth: usize,
}

impl Default for ArborConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            flush_tick_ms: 50,
            max_attempts: 5,
            backoff_base_ms: 200,
            backoff_max_ms: 10_000,
            hydrate_retry_ms: 500,
            change_channel_capacity: 64,
            command_queue_depth: 256,
        }
    }
}

impl ArborConfig {
    pub fn from_ron_str(source: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(source)?)
    }

    /// Load from a RON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron_str(&source)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn flush_tick(&self) -> Duration {
        Duration::from_millis(self.flush_tick_ms.max(1))
    }

    pub fn hydrate_retry(&self) -> Duration {
        Duration::from_millis(self.hydrate_retry_ms.max(1))
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let ms = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_takes_defaults() {
        let config = ArborConfig::from_ron_str("(debounce_ms: 10, max_attempts: 2)").unwrap();
        assert_eq!(config.debounce_ms, 10);
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.flush_tick_ms, ArborConfig::default().flush_tick_ms);
    }

    #[test]
    fn test_empty_config() {
        assert_eq!(ArborConfig::from_ron_str("()").unwrap(), ArborConfig::default());
    }

    #[test]
    fn test_bad_config() {
        assert!(matches!(
            ArborConfig::from_ron_str("(debounce_ms: \"soon\")"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ArborConfig::load("/nonexistent/arbor.ron").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = ArborConfig {
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
            ..ArborConfig::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(400));
        assert_eq!(config.backoff(10), Duration::from_millis(1_000));
    }
}
