//! Blocking client over dispatch, collection and reaping.

use std::path::Path;

use nsprobe_common::config::NsprobeConfig;
use nsprobe_common::error::Result;
use nsprobe_common::types::{FileMetadata, NamespacePath};

use crate::dispatch::{self, PendingOperation};
use crate::operation;
use crate::request::{NamespaceFileRequest, Outcome};

/// Runs file operations inside other mount namespaces.
///
/// Every call forks its own worker; the client itself holds no state
/// besides its configuration and can be shared across threads.
#[derive(Debug, Clone, Default)]
pub struct NsProbe {
    config: NsprobeConfig,
}

impl NsProbe {
    /// Creates a client with the default timeouts and chunk size.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a client with a custom configuration.
    ///
    /// # Errors
    ///
    /// Returns [`nsprobe_common::error::NsprobeError::Config`] if a value is
    /// out of range.
    pub fn with_config(config: NsprobeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &NsprobeConfig {
        &self.config
    }

    /// Starts the worker for `request` without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker cannot be spawned.
    pub fn start(&self, request: NamespaceFileRequest) -> Result<PendingOperation> {
        let op = operation::for_kind(request.kind());
        dispatch::spawn(request, op, &self.config)
    }

    /// Performs `request` and waits for the outcome.
    ///
    /// # Errors
    ///
    /// Returns the first failure of dispatch, the worker or collection.
    pub fn execute(&self, request: &NamespaceFileRequest) -> Result<Outcome> {
        self.start(request.clone())?.finish()
    }

    /// Reads the whole of `filename` as seen from inside `namespace`.
    ///
    /// # Errors
    ///
    /// See [`NsProbe::execute`].
    pub fn read(
        &self,
        filename: impl AsRef<Path>,
        namespace: impl Into<NamespacePath>,
    ) -> Result<Vec<u8>> {
        self.execute(&NamespaceFileRequest::read(filename, namespace))?
            .into_bytes()
    }

    /// Stats `filename` as seen from inside `namespace`, following symlinks.
    ///
    /// # Errors
    ///
    /// See [`NsProbe::execute`].
    pub fn stat(
        &self,
        filename: impl AsRef<Path>,
        namespace: impl Into<NamespacePath>,
    ) -> Result<FileMetadata> {
        self.execute(&NamespaceFileRequest::stat(filename, namespace))?
            .into_metadata()
    }
}
