//! # nsprobe-core
//!
//! Reads files and stats paths inside another Linux mount namespace
//! without moving the calling process.
//!
//! Each call forks a short-lived worker that:
//! - opens the namespace descriptors and joins them in order with `setns(2)`,
//! - performs exactly one operation on the target path,
//! - writes one fixed-layout frame to a pipe and exits.
//!
//! The parent reads that frame with non-blocking, deadline-bounded reads
//! and always reaps the worker, killing it if it does not exit in time.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! proper error handling and `// SAFETY:` documentation.
#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

#[cfg(not(target_os = "linux"))]
compile_error!("nsprobe-core requires Linux namespaces");

pub mod channel;
pub mod client;
pub mod dispatch;
pub mod namespace;
pub mod operation;
pub mod protocol;
pub mod reaper;
pub mod request;
pub mod worker;

use std::path::Path;

use nsprobe_common::error::Result;
use nsprobe_common::types::{FileMetadata, NamespacePath};

pub use crate::client::NsProbe;
pub use crate::dispatch::PendingOperation;
pub use crate::request::{NamespaceFileRequest, Outcome};

/// Reads the whole of `filename` inside the namespace at `namespace`,
/// using the default configuration.
///
/// # Errors
///
/// Returns the namespace, target, timeout, channel or allocation failure
/// that ended the call. No partial contents are ever returned.
pub fn ns_read(filename: impl AsRef<Path>, namespace: impl Into<NamespacePath>) -> Result<Vec<u8>> {
    NsProbe::new().read(filename, namespace)
}

/// Stats `filename` inside the namespace at `namespace`, using the default
/// configuration.
///
/// # Errors
///
/// See [`ns_read`].
pub fn ns_stat(
    filename: impl AsRef<Path>,
    namespace: impl Into<NamespacePath>,
) -> Result<FileMetadata> {
    NsProbe::new().stat(filename, namespace)
}
