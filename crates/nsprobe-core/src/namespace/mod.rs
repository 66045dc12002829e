//! Namespace identity and joining.
//!
//! A namespace is identified by the device and inode of its nsfs entry.
//! The caller's own namespaces are snapshotted before the worker forks so
//! the worker can skip a join that would be a no-op, or that the kernel
//! refuses outright (re-entering one's own user namespace).

use std::fs::{File, Metadata};
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use nix::sched::{CloneFlags, setns};

/// Device and inode pair naming one namespace instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamespaceIdentity {
    dev: u64,
    ino: u64,
}

impl NamespaceIdentity {
    /// Identity of the nsfs object described by `meta`.
    #[must_use]
    pub fn of(meta: &Metadata) -> Self {
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }
}

/// The namespaces the calling thread is a member of.
#[derive(Debug, Clone, Default)]
pub struct CurrentNamespaces(Vec<NamespaceIdentity>);

impl CurrentNamespaces {
    /// Reads the identities listed under `/proc/thread-self/ns`.
    ///
    /// Entries that cannot be stat'ed are left out; an empty snapshot only
    /// means every join is attempted.
    #[must_use]
    pub fn snapshot() -> Self {
        Self::from_dir(Path::new(nsprobe_common::constants::THREAD_SELF_NS_DIR))
    }

    fn from_dir(dir: &Path) -> Self {
        let Ok(entries) = std::fs::read_dir(dir) else {
            tracing::debug!(dir = %dir.display(), "namespace directory unreadable");
            return Self::default();
        };
        let ids = entries
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| std::fs::metadata(entry.path()).ok())
            .map(|meta| NamespaceIdentity::of(&meta))
            .collect::<Vec<_>>();
        tracing::trace!(count = ids.len(), "snapshotted current namespaces");
        Self(ids)
    }

    /// Returns whether `id` is one of the caller's namespaces.
    #[must_use]
    pub fn contains(&self, id: NamespaceIdentity) -> bool {
        self.0.contains(&id)
    }
}

/// Joins the namespace referred to by `ns`.
///
/// The join is skipped when `ns` is a namespace the caller already belongs
/// to. Returns whether `setns(2)` was actually called. Runs inside the
/// worker, so it neither logs nor allocates.
///
/// # Errors
///
/// Returns the errno from `setns(2)`, e.g. `EINVAL` when `ns` is not a
/// namespace descriptor or `EPERM` without the required capabilities.
pub fn join(ns: &File, current: &CurrentNamespaces) -> nix::Result<bool> {
    if let Ok(meta) = ns.metadata() {
        if current.contains(NamespaceIdentity::of(&meta)) {
            return Ok(false);
        }
    }
    setns(ns, CloneFlags::empty())?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_contains_own_mount_namespace() {
        let current = CurrentNamespaces::snapshot();
        let meta = std::fs::metadata("/proc/thread-self/ns/mnt").expect("stat mnt ns");
        assert!(current.contains(NamespaceIdentity::of(&meta)));
    }

    #[test]
    fn regular_file_is_not_a_current_namespace() {
        let file = tempfile::NamedTempFile::new().expect("tempfile");
        let meta = file.as_file().metadata().expect("stat tempfile");
        assert!(!CurrentNamespaces::snapshot().contains(NamespaceIdentity::of(&meta)));
    }

    #[test]
    fn joining_own_namespace_is_skipped() {
        let ns = File::open("/proc/self/ns/mnt").expect("open mnt ns");
        let joined = join(&ns, &CurrentNamespaces::snapshot()).expect("join");
        assert!(!joined);
    }

    #[test]
    fn joining_regular_file_is_rejected() {
        let file = tempfile::NamedTempFile::new().expect("tempfile");
        let err = join(file.as_file(), &CurrentNamespaces::snapshot()).unwrap_err();
        assert_eq!(err, nix::errno::Errno::EINVAL);
    }

    #[test]
    fn unreadable_directory_gives_empty_snapshot() {
        let current = CurrentNamespaces::from_dir(Path::new("/nonexistent/ns"));
        assert!(current.0.is_empty());
    }
}
