//! What to do, where, and what came back.

use std::path::{Path, PathBuf};

use nsprobe_common::error::{NsprobeError, Result};
use nsprobe_common::types::{FileMetadata, NamespacePath, OperationKind};

/// One file operation to perform inside a mount namespace.
///
/// Other namespaces can be joined ahead of the mount namespace, e.g. the
/// user namespace that owns it in a rootless container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceFileRequest {
    filename: PathBuf,
    namespace: NamespacePath,
    preceding: Vec<NamespacePath>,
    kind: OperationKind,
}

impl NamespaceFileRequest {
    /// Creates a request for `kind` on `filename`, resolved inside `namespace`.
    #[must_use]
    pub fn new(
        kind: OperationKind,
        filename: impl AsRef<Path>,
        namespace: impl Into<NamespacePath>,
    ) -> Self {
        Self {
            filename: filename.as_ref().to_path_buf(),
            namespace: namespace.into(),
            preceding: Vec::new(),
            kind,
        }
    }

    /// Adds a namespace to join before the mount namespace.
    ///
    /// Namespaces are joined in the order they were added. A user namespace
    /// should come first: it grants the capabilities the later joins need.
    #[must_use]
    pub fn joining_first(mut self, namespace: impl Into<NamespacePath>) -> Self {
        self.preceding.push(namespace.into());
        self
    }

    /// Creates a read request.
    #[must_use]
    pub fn read(filename: impl AsRef<Path>, namespace: impl Into<NamespacePath>) -> Self {
        Self::new(OperationKind::Read, filename, namespace)
    }

    /// Creates a stat request.
    #[must_use]
    pub fn stat(filename: impl AsRef<Path>, namespace: impl Into<NamespacePath>) -> Self {
        Self::new(OperationKind::Stat, filename, namespace)
    }

    /// The target path, as seen from inside the namespace.
    #[must_use]
    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// The namespace descriptor path, as seen from the caller.
    #[must_use]
    pub const fn namespace(&self) -> &NamespacePath {
        &self.namespace
    }

    /// Every namespace the worker joins, in join order. The mount namespace
    /// comes last.
    pub fn join_order(&self) -> impl Iterator<Item = &NamespacePath> {
        self.preceding.iter().chain(std::iter::once(&self.namespace))
    }

    /// Number of namespaces the worker joins.
    #[must_use]
    pub fn join_count(&self) -> usize {
        self.preceding.len() + 1
    }

    /// The requested operation.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        self.kind
    }
}

/// The result of a successful operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// File contents from a read.
    Bytes(Vec<u8>),
    /// Metadata from a stat.
    Metadata(FileMetadata),
}

impl Outcome {
    /// Unwraps the contents of a read.
    ///
    /// # Errors
    ///
    /// Returns [`NsprobeError::Protocol`] if this is a stat outcome.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            Self::Metadata(_) => Err(NsprobeError::Protocol {
                message: "expected file contents, got metadata".into(),
            }),
        }
    }

    /// Unwraps the metadata of a stat.
    ///
    /// # Errors
    ///
    /// Returns [`NsprobeError::Protocol`] if this is a read outcome.
    pub fn into_metadata(self) -> Result<FileMetadata> {
        match self {
            Self::Metadata(meta) => Ok(meta),
            Self::Bytes(_) => Err(NsprobeError::Protocol {
                message: "expected metadata, got file contents".into(),
            }),
        }
    }
}
