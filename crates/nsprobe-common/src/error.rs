//! Unified error types for the nsprobe workspace.
//!
//! Every failure of a cross-namespace operation ends up as exactly one
//! [`NsprobeError`]; no partial data is ever returned alongside one.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::{CollectPhase, NamespacePath};

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum NsprobeError {
    /// The worker could not open the namespace descriptor.
    #[error("cannot open namespace descriptor {namespace}: {source}")]
    NamespaceOpen {
        /// Descriptor path that failed to open.
        namespace: NamespacePath,
        /// OS error reported by the worker.
        source: std::io::Error,
    },

    /// The worker opened the descriptor but `setns(2)` rejected it.
    #[error("cannot join namespace {namespace}: {source}")]
    NamespaceJoin {
        /// Descriptor path that could not be joined.
        namespace: NamespacePath,
        /// OS error reported by the worker.
        source: std::io::Error,
    },

    /// The target file could not be opened or stat'ed inside the namespace.
    #[error("cannot access {path} in namespace {namespace}: {source}")]
    TargetOpen {
        /// Target path as seen inside the namespace.
        path: PathBuf,
        /// Namespace the worker had joined.
        namespace: NamespacePath,
        /// OS error reported by the worker.
        source: std::io::Error,
    },

    /// A collection budget expired before the worker delivered its frame.
    #[error("timed out after {budget:?} waiting for {phase}")]
    Timeout {
        /// Collection stage that ran out of time.
        phase: CollectPhase,
        /// Budget that was exceeded.
        budget: Duration,
    },

    /// Reading from the result channel failed or ended early.
    #[error("result channel I/O failed: {source}")]
    PipeIo {
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The payload buffer could not be allocated.
    #[error("cannot allocate {size} bytes for file payload")]
    OutOfMemory {
        /// Requested payload size.
        size: usize,
    },

    /// The worker process or its channel could not be created.
    #[error("cannot spawn namespace worker: {source}")]
    Spawn {
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// The worker sent a frame that does not follow the wire format.
    #[error("malformed result frame: {message}")]
    Protocol {
        /// Description of the violation.
        message: String,
    },

    /// An I/O operation on a local path failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl NsprobeError {
    /// Returns the OS error code behind this error, if there is one.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::NamespaceOpen { source, .. }
            | Self::NamespaceJoin { source, .. }
            | Self::TargetOpen { source, .. }
            | Self::PipeIo { source }
            | Self::Spawn { source }
            | Self::Io { source, .. } => source.raw_os_error(),
            Self::Timeout { .. } => Some(libc::ETIME),
            Self::OutOfMemory { .. } => Some(libc::ENOMEM),
            Self::Protocol { .. } | Self::Config { .. } | Self::Serialization { .. } => None,
        }
    }

    /// Returns whether this error is a collection timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, NsprobeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_open_exposes_errno() {
        let err = NsprobeError::TargetOpen {
            path: "/etc/missing".into(),
            namespace: NamespacePath::new("/proc/1/ns/mnt"),
            source: std::io::Error::from_raw_os_error(2),
        };
        assert_eq!(err.raw_os_error(), Some(2));
        assert!(err.to_string().contains("/etc/missing"));
        assert!(err.to_string().contains("/proc/1/ns/mnt"));
    }

    #[test]
    fn timeout_reports_phase_and_etime() {
        let err = NsprobeError::Timeout {
            phase: CollectPhase::ReadHeader,
            budget: Duration::from_secs(20),
        };
        assert!(err.is_timeout());
        assert_eq!(err.raw_os_error(), Some(libc::ETIME));
        assert!(err.to_string().contains("read header"));
    }

    #[test]
    fn out_of_memory_maps_to_enomem() {
        let err = NsprobeError::OutOfMemory { size: usize::MAX };
        let errno = err.raw_os_error().expect("errno");
        assert_eq!(errno, libc::ENOMEM);
        assert_eq!(
            std::io::Error::from_raw_os_error(errno).kind(),
            std::io::ErrorKind::OutOfMemory
        );
    }

    #[test]
    fn protocol_error_has_no_errno() {
        let err = NsprobeError::Protocol {
            message: "unknown stage".into(),
        };
        assert_eq!(err.raw_os_error(), None);
        assert!(!err.is_timeout());
    }
}
