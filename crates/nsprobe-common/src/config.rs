//! Timing and sizing configuration for cross-namespace operations.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{NsprobeError, Result};

/// Budgets and chunk sizes governing one worker exchange.
///
/// All durations are stored in milliseconds so the JSON form stays flat;
/// use the `Duration` accessors in code. Missing fields fall back to the
/// defaults in [`constants`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NsprobeConfig {
    /// Longest single wait for the result channel to become readable.
    pub poll_interval_ms: u64,
    /// Maximum bytes per pipe read or write.
    pub chunk_size: usize,
    /// Budget for the read header.
    pub read_header_timeout_ms: u64,
    /// Budget for the read payload.
    pub read_payload_timeout_ms: u64,
    /// Budget for the complete stat frame.
    pub stat_timeout_ms: u64,
    /// Ceiling on waiting for the worker to exit before killing it.
    pub reap_timeout_ms: u64,
    /// Interval between exit-status checks.
    pub reap_interval_ms: u64,
}

impl Default for NsprobeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: constants::DEFAULT_POLL_INTERVAL_MS,
            chunk_size: constants::DEFAULT_CHUNK_SIZE,
            read_header_timeout_ms: constants::DEFAULT_READ_HEADER_TIMEOUT_MS,
            read_payload_timeout_ms: constants::DEFAULT_READ_PAYLOAD_TIMEOUT_MS,
            stat_timeout_ms: constants::DEFAULT_STAT_TIMEOUT_MS,
            reap_timeout_ms: constants::DEFAULT_REAP_TIMEOUT_MS,
            reap_interval_ms: constants::DEFAULT_REAP_INTERVAL_MS,
        }
    }
}

impl NsprobeConfig {
    /// Loads a configuration from a JSON file and validates it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON,
    /// or contains invalid values.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| NsprobeError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), config = ?config, "loaded configuration");
        Ok(config)
    }

    /// Checks that every budget and the chunk size are non-zero.
    ///
    /// # Errors
    ///
    /// Returns [`NsprobeError::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(NsprobeError::Config {
                message: "chunk_size must be greater than zero".into(),
            });
        }
        let budgets = [
            ("poll_interval_ms", self.poll_interval_ms),
            ("read_header_timeout_ms", self.read_header_timeout_ms),
            ("read_payload_timeout_ms", self.read_payload_timeout_ms),
            ("stat_timeout_ms", self.stat_timeout_ms),
            ("reap_timeout_ms", self.reap_timeout_ms),
            ("reap_interval_ms", self.reap_interval_ms),
        ];
        if let Some((name, _)) = budgets.iter().find(|(_, ms)| *ms == 0) {
            return Err(NsprobeError::Config {
                message: format!("{name} must be greater than zero"),
            });
        }
        Ok(())
    }

    /// Longest single wait for channel readiness.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Budget for the read header.
    #[must_use]
    pub const fn read_header_timeout(&self) -> Duration {
        Duration::from_millis(self.read_header_timeout_ms)
    }

    /// Budget for the read payload.
    #[must_use]
    pub const fn read_payload_timeout(&self) -> Duration {
        Duration::from_millis(self.read_payload_timeout_ms)
    }

    /// Budget for the stat frame.
    #[must_use]
    pub const fn stat_timeout(&self) -> Duration {
        Duration::from_millis(self.stat_timeout_ms)
    }

    /// Ceiling on waiting for worker exit.
    #[must_use]
    pub const fn reap_timeout(&self) -> Duration {
        Duration::from_millis(self.reap_timeout_ms)
    }

    /// Interval between exit-status checks.
    #[must_use]
    pub const fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }
}
