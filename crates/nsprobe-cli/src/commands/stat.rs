//! `nsprobe stat`: print file metadata.

use std::path::{Path, PathBuf};

use clap::Args;
use nsprobe_common::types::{FileMetadata, OperationKind};
use nsprobe_core::{NsProbe, Outcome};
use serde::Serialize;

use super::Target;
use crate::output;

/// Arguments for the `stat` command.
#[derive(Args, Debug)]
pub struct StatArgs {
    /// Files to stat, as paths inside the namespace.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Print a readable block instead of one JSON object per file.
    #[arg(long)]
    pub human: bool,
}

/// One JSON record per file. Times are nanoseconds since the epoch.
#[derive(Debug, Serialize)]
pub struct FileInfo {
    /// Path as given on the command line.
    pub name: String,
    /// Permission string, e.g. `-rw-r--r--`.
    pub perm: String,
    /// Owner user ID.
    pub uid: u32,
    /// Owner group ID.
    pub gid: u32,
    /// Size in bytes.
    pub size: i64,
    /// Raw `st_mode`.
    pub mode: u32,
    /// Inode number.
    pub inode: u64,
    /// Preferred I/O block size.
    pub block_size: i64,
    /// Allocated 512-byte blocks.
    pub blocks: i64,
    /// Hard link count.
    pub links: u64,
    /// Last access time.
    pub access_time: i64,
    /// Last modification time.
    pub modify_time: i64,
}

impl FileInfo {
    /// Builds the record for `name` from its metadata.
    #[must_use]
    pub fn new(name: &Path, meta: &FileMetadata) -> Self {
        Self {
            name: name.display().to_string(),
            perm: output::perm_string(meta.permissions()),
            uid: meta.uid,
            gid: meta.gid,
            size: meta.size,
            mode: meta.mode,
            inode: meta.inode,
            block_size: meta.block_size,
            blocks: meta.blocks,
            links: meta.links,
            access_time: meta.accessed.packed_nanos(),
            modify_time: meta.modified.packed_nanos(),
        }
    }
}

/// Executes the `stat` command.
///
/// # Errors
///
/// Returns an error if any file failed or a record could not be serialized.
pub fn execute(probe: &NsProbe, target: &Target, args: &StatArgs) -> anyhow::Result<()> {
    let mut failed = 0;

    for file in &args.files {
        let result = probe
            .execute(&target.request(OperationKind::Stat, file))
            .and_then(Outcome::into_metadata);
        match result {
            Ok(meta) if args.human => print_human(file, &meta),
            Ok(meta) => println!("{}", serde_json::to_string(&FileInfo::new(file, &meta))?),
            Err(e) => {
                tracing::error!(file = %file.display(), error = %e, "stat failed");
                failed += 1;
            }
        }
    }

    super::summarize(failed, args.files.len(), "stat'ed")
}

fn print_human(file: &Path, meta: &FileMetadata) {
    let size = u64::try_from(meta.size).unwrap_or(0);
    println!("  File: {}", file.display());
    println!(
        "  Size: {} ({size} bytes)  Blocks: {}  IO Block: {}",
        output::format_bytes(size),
        meta.blocks,
        meta.block_size
    );
    println!("  Type: {}  Inode: {}  Links: {}", output::file_type(meta), meta.inode, meta.links);
    println!(
        "  Mode: ({:04o}/{})  Uid: {}  Gid: {}",
        meta.permissions(),
        output::perm_string(meta.permissions()),
        meta.uid,
        meta.gid
    );
    println!("Access: {}", output::format_time(meta.accessed));
    println!("Modify: {}", output::format_time(meta.modified));
}

#[cfg(test)]
mod tests {
    use nsprobe_common::types::Timespec;

    use super::*;

    #[test]
    fn file_info_uses_snake_case_fields_and_nanoseconds() {
        let meta = FileMetadata {
            uid: 1000,
            gid: 100,
            size: 42,
            mode: 0o100_640,
            inode: 7,
            block_size: 4096,
            blocks: 8,
            links: 1,
            accessed: Timespec::new(2, 5),
            modified: Timespec::new(3, 0),
        };
        let json = serde_json::to_value(FileInfo::new(Path::new("/etc/shadow"), &meta)).unwrap();

        assert_eq!(json["name"], "/etc/shadow");
        assert_eq!(json["perm"], "-rw-r-----");
        assert_eq!(json["block_size"], 4096);
        assert_eq!(json["access_time"], 2_000_000_005_i64);
        assert_eq!(json["modify_time"], 3_000_000_000_i64);
    }
}
