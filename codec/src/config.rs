//! Per-session configuration.

use std::num::NonZeroUsize;

use wire::{diff_body_len, Limits, HEADER_SIZE};

use crate::diff::{mask_len, word_count};
use crate::error::ConfigError;

/// Largest history that keeps every retained id within half the sequence
/// space of the newest one.
pub const MAX_HISTORY: usize = i16::MAX as usize;

/// Configuration shared by sender and receiver sessions.
///
/// Receivers should use a history at least as large as the sender's,
/// otherwise diffs against older acknowledged snapshots cannot resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct SessionConfig {
    /// Number of snapshots retained per session (the window `N`).
    pub history: usize,
    /// Send a diff whenever a base is available, even if it is not smaller.
    pub always_diff: bool,
    /// Maximum framed snapshot size accepted or produced.
    pub max_snapshot_bytes: usize,
    /// Lag (in ticks) above which the registry logs a warning.
    pub lag_warn_threshold: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history: 32,
            always_diff: false,
            max_snapshot_bytes: 32 * 1024,
            lag_warn_threshold: 20,
        }
    }
}

impl SessionConfig {
    /// Creates a configuration suitable for testing with a small window.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            history: 4,
            always_diff: false,
            max_snapshot_bytes: 4096,
            lag_warn_threshold: 8,
        }
    }

    /// Sets the history capacity.
    #[must_use]
    pub const fn with_history(mut self, history: usize) -> Self {
        self.history = history;
        self
    }

    /// Sets the always-diff policy.
    #[must_use]
    pub const fn with_always_diff(mut self, always_diff: bool) -> Self {
        self.always_diff = always_diff;
        self
    }

    /// Sets the maximum snapshot size.
    #[must_use]
    pub const fn with_max_snapshot_bytes(mut self, max_snapshot_bytes: usize) -> Self {
        self.max_snapshot_bytes = max_snapshot_bytes;
        self
    }

    /// Sets the lag warning threshold.
    #[must_use]
    pub const fn with_lag_warn_threshold(mut self, lag_warn_threshold: u32) -> Self {
        self.lag_warn_threshold = lag_warn_threshold;
        self
    }

    /// Validates the configuration and returns the history as a non-zero size.
    pub fn validate(&self) -> Result<NonZeroUsize, ConfigError> {
        let history = NonZeroUsize::new(self.history).ok_or(ConfigError::EmptyHistory)?;
        if self.history > MAX_HISTORY {
            return Err(ConfigError::HistoryTooLarge {
                history: self.history,
                max: MAX_HISTORY,
            });
        }
        if self.max_snapshot_bytes == 0 {
            return Err(ConfigError::ZeroSnapshotLimit);
        }
        if !self.history.is_power_of_two() {
            tracing::warn!(
                history = self.history,
                "history is not a power of two, ring slots will not be continuous across sequence wraparound"
            );
        }
        Ok(history)
    }

    /// Wire limits admitting every message a peer with this configuration
    /// may produce, including a diff that flags every word.
    #[must_use]
    pub fn wire_limits(&self) -> Limits {
        let words = word_count(self.max_snapshot_bytes);
        let mask_bytes = mask_len(words);
        Limits {
            max_message_bytes: HEADER_SIZE
                + diff_body_len(mask_bytes, words).max(self.max_snapshot_bytes),
            max_mask_bytes: mask_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SessionConfig::default();
        assert_eq!(config.validate().unwrap().get(), 32);
        assert!(!config.always_diff);
    }

    #[test]
    fn testing_config_is_smaller() {
        let test_config = SessionConfig::for_testing();
        let default_config = SessionConfig::default();
        assert!(test_config.history < default_config.history);
        assert!(test_config.max_snapshot_bytes < default_config.max_snapshot_bytes);
        assert!(test_config.validate().is_ok());
    }

    #[test]
    fn rejects_empty_history() {
        let config = SessionConfig::default().with_history(0);
        assert_eq!(config.validate(), Err(ConfigError::EmptyHistory));
    }

    #[test]
    fn rejects_history_beyond_half_space() {
        let config = SessionConfig::default().with_history(MAX_HISTORY + 1);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::HistoryTooLarge { .. })
        ));
        assert!(SessionConfig::default()
            .with_history(MAX_HISTORY)
            .validate()
            .is_ok());
    }

    #[test]
    fn rejects_zero_snapshot_limit() {
        let config = SessionConfig::default().with_max_snapshot_bytes(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroSnapshotLimit));
    }

    #[test]
    fn accepts_odd_history() {
        let config = SessionConfig::default().with_history(3);
        assert_eq!(config.validate().unwrap().get(), 3);
    }

    #[test]
    fn wire_limits_cover_full_and_diff() {
        let config = SessionConfig::for_testing();
        let limits = config.wire_limits();
        assert_eq!(limits.max_mask_bytes, 128);
        assert!(limits.max_message_bytes > HEADER_SIZE + config.max_snapshot_bytes);
    }

    #[test]
    fn builder_setters_chain() {
        let config = SessionConfig::for_testing()
            .with_always_diff(true)
            .with_lag_warn_threshold(2);
        assert!(config.always_diff);
        assert_eq!(config.lag_warn_threshold, 2);
    }
}
