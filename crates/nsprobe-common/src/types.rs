//! Domain primitive types used across the nsprobe workspace.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::NANOS_PER_SEC;

/// Kind of Linux namespace, named the way `/proc/<pid>/ns/` names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NamespaceKind {
    /// Mount namespace (`mnt`).
    Mount,
    /// UTS namespace (`uts`).
    Uts,
    /// IPC namespace (`ipc`).
    Ipc,
    /// User namespace (`user`).
    User,
    /// PID namespace (`pid`).
    Pid,
    /// Network namespace (`net`).
    Net,
    /// Cgroup namespace (`cgroup`).
    Cgroup,
}

impl NamespaceKind {
    /// Returns the entry name under `/proc/<pid>/ns/`.
    #[must_use]
    pub const fn proc_name(self) -> &'static str {
        match self {
            Self::Mount => "mnt",
            Self::Uts => "uts",
            Self::Ipc => "ipc",
            Self::User => "user",
            Self::Pid => "pid",
            Self::Net => "net",
            Self::Cgroup => "cgroup",
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.proc_name())
    }
}

/// Path to a namespace descriptor, e.g. `/proc/1234/ns/mnt`.
///
/// The path is opaque to nsprobe: it is opened and joined as-is inside the
/// worker, and its validity is the caller's concern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespacePath(PathBuf);

impl NamespacePath {
    /// Creates a namespace path from any path-like value.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Builds `<hostfs>/proc/<pid>/ns/<kind>`.
    ///
    /// `hostfs` is the directory the host filesystem is mounted under when
    /// running inside a container; pass an empty string on the host.
    #[must_use]
    pub fn for_pid(hostfs: &str, pid: u32, kind: NamespaceKind) -> Self {
        let prefix = hostfs.trim_end_matches('/');
        Self(PathBuf::from(format!(
            "{prefix}{}/{pid}/ns/{}",
            crate::constants::PROC_ROOT,
            kind.proc_name()
        )))
    }

    /// Returns the descriptor path.
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl From<PathBuf> for NamespacePath {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

impl From<&Path> for NamespacePath {
    fn from(path: &Path) -> Self {
        Self(path.to_path_buf())
    }
}

impl From<&str> for NamespacePath {
    fn from(path: &str) -> Self {
        Self(PathBuf::from(path))
    }
}

impl fmt::Display for NamespacePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// The single filesystem operation a worker performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Read the full file contents.
    Read,
    /// Retrieve stat metadata without opening the file.
    Stat,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Stat => write!(f, "stat"),
        }
    }
}

/// Stage of result collection a timeout budget applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectPhase {
    /// Error code and payload size of a read frame.
    ReadHeader,
    /// File bytes of a read frame.
    ReadPayload,
    /// The whole fixed-size stat frame.
    StatFrame,
}

impl fmt::Display for CollectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadHeader => write!(f, "read header"),
            Self::ReadPayload => write!(f, "read payload"),
            Self::StatFrame => write!(f, "stat frame"),
        }
    }
}

/// A point in time with nanosecond precision, as reported by `stat(2)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timespec {
    /// Whole seconds since the Unix epoch.
    pub secs: i64,
    /// Nanoseconds within the second, always below one billion.
    pub nanos: u32,
}

impl Timespec {
    /// Creates a timestamp from seconds and nanoseconds, normalizing
    /// nanoseconds outside `0..1e9` into the seconds field.
    #[must_use]
    pub fn new(secs: i64, nanos: i64) -> Self {
        Self::from_packed_nanos(secs.saturating_mul(NANOS_PER_SEC).saturating_add(nanos))
    }

    /// Unpacks a single nanosecond count using floor division, so times
    /// before the epoch keep a non-negative nanosecond part.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub const fn from_packed_nanos(packed: i64) -> Self {
        Self {
            secs: packed.div_euclid(NANOS_PER_SEC),
            // rem_euclid is always in 0..1e9
            nanos: packed.rem_euclid(NANOS_PER_SEC) as u32,
        }
    }

    /// Packs the timestamp into a single nanosecond count.
    #[must_use]
    pub const fn packed_nanos(self) -> i64 {
        self.secs
            .saturating_mul(NANOS_PER_SEC)
            .saturating_add(self.nanos as i64)
    }
}

/// File metadata retrieved from inside a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Owner user ID.
    pub uid: u32,
    /// Owner group ID.
    pub gid: u32,
    /// Size in bytes.
    pub size: i64,
    /// File type and permission bits (`st_mode`).
    pub mode: u32,
    /// Inode number.
    pub inode: u64,
    /// Preferred I/O block size.
    pub block_size: i64,
    /// Number of 512-byte blocks allocated.
    pub blocks: i64,
    /// Number of hard links.
    pub links: u64,
    /// Last access time.
    pub accessed: Timespec,
    /// Last modification time.
    pub modified: Timespec,
}

impl FileMetadata {
    const S_IFMT: u32 = 0o170_000;
    const S_IFREG: u32 = 0o100_000;
    const S_IFDIR: u32 = 0o040_000;

    /// Returns the permission bits (`mode & 0o7777`).
    #[must_use]
    pub const fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    /// Returns whether the metadata describes a regular file.
    #[must_use]
    pub const fn is_file(&self) -> bool {
        self.mode & Self::S_IFMT == Self::S_IFREG
    }

    /// Returns whether the metadata describes a directory.
    #[must_use]
    pub const fn is_dir(&self) -> bool {
        self.mode & Self::S_IFMT == Self::S_IFDIR
    }
}
