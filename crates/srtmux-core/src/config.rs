//! Multiplexer configuration.

use crate::error::{MuxError, MuxResult};
use serde::Deserialize;
use std::time::Duration;

/// Events fetched from the engine per poll.
pub const DEFAULT_BATCH_CAPACITY: usize = 512;

/// Upper bound on one poll, and so on shutdown and failure-detection latency.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Name of the dispatch thread.
pub const DEFAULT_THREAD_NAME: &str = "srtmux-poll";

/// Configuration of a `PollRegistry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxConfig {
    /// Maximum events handled per dispatch cycle.
    pub batch_capacity: usize,
    /// Timeout of each engine poll. Never infinite.
    pub poll_timeout: Duration,
    /// Dispatch thread name.
    pub thread_name: String,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            batch_capacity: DEFAULT_BATCH_CAPACITY,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    batch_capacity: Option<usize>,
    poll_timeout_ms: Option<u64>,
    thread_name: Option<String>,
}

impl MuxConfig {
    /// Set the batch capacity.
    #[must_use]
    pub fn with_batch_capacity(mut self, batch_capacity: usize) -> Self {
        self.batch_capacity = batch_capacity;
        self
    }

    /// Set the poll timeout.
    #[must_use]
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Set the dispatch thread name.
    #[must_use]
    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns `MuxError::InvalidConfig` if the batch capacity is zero or
    /// the poll timeout is zero or longer than an engine can express.
    pub fn validate(&self) -> MuxResult<()> {
        if self.batch_capacity == 0 {
            return Err(MuxError::InvalidConfig(
                "batch_capacity must be at least 1".into(),
            ));
        }
        if self.poll_timeout.is_zero() {
            return Err(MuxError::InvalidConfig(
                "poll_timeout must be non-zero".into(),
            ));
        }
        if self.poll_timeout.as_millis() > i32::MAX as u128 {
            return Err(MuxError::InvalidConfig(
                "poll_timeout must be finite".into(),
            ));
        }
        Ok(())
    }

    /// Parse a TOML document. Missing keys keep their defaults.
    ///
    /// ```
    /// use srtmux_core::MuxConfig;
    /// use std::time::Duration;
    ///
    /// let config = MuxConfig::from_toml_str("poll_timeout_ms = 250").unwrap();
    /// assert_eq!(config.poll_timeout, Duration::from_millis(250));
    /// assert_eq!(config.batch_capacity, 512);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `MuxError::InvalidConfig` for malformed TOML, unknown keys,
    /// or values rejected by `validate`.
    pub fn from_toml_str(input: &str) -> MuxResult<Self> {
        let raw: RawConfig =
            toml::from_str(input).map_err(|e| MuxError::InvalidConfig(e.to_string()))?;
        let defaults = Self::default();
        let config = Self {
            batch_capacity: raw.batch_capacity.unwrap_or(defaults.batch_capacity),
            poll_timeout: raw
                .poll_timeout_ms
                .map_or(defaults.poll_timeout, Duration::from_millis),
            thread_name: raw.thread_name.unwrap_or(defaults.thread_name),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MuxConfig::default();
        assert_eq!(config.batch_capacity, 512);
        assert_eq!(config.poll_timeout, Duration::from_millis(100));
        assert_eq!(config.thread_name, "srtmux-poll");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = MuxConfig::default()
            .with_batch_capacity(8)
            .with_poll_timeout(Duration::from_millis(5))
            .with_thread_name("poll-test");
        assert_eq!(config.batch_capacity, 8);
        assert_eq!(config.thread_name, "poll-test");
    }

    #[test]
    fn test_validate_rejects_zero() {
        assert!(MuxConfig::default().with_batch_capacity(0).validate().is_err());
        assert!(
            MuxConfig::default()
                .with_poll_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            MuxConfig::default()
                .with_poll_timeout(Duration::MAX)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_from_toml() {
        let config = MuxConfig::from_toml_str(
            r#"
            batch_capacity = 64
            poll_timeout_ms = 20
            thread_name = "mux"
            "#,
        )
        .unwrap();
        assert_eq!(config.batch_capacity, 64);
        assert_eq!(config.poll_timeout, Duration::from_millis(20));
        assert_eq!(config.thread_name, "mux");

        assert_eq!(MuxConfig::from_toml_str("").unwrap(), MuxConfig::default());
    }

    #[test]
    fn test_from_toml_rejects_bad_input() {
        assert!(matches!(
            MuxConfig::from_toml_str("poll_timeout_ms = 0"),
            Err(MuxError::InvalidConfig(_))
        ));
        assert!(matches!(
            MuxConfig::from_toml_str("bogus = 1"),
            Err(MuxError::InvalidConfig(_))
        ));
        assert!(matches!(
            MuxConfig::from_toml_str("batch_capacity = \"many\""),
            Err(MuxError::InvalidConfig(_))
        ));
    }
}
