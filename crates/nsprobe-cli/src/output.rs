//! Formatted output helpers for CLI commands.
//!
//! Human-readable sizes, permission strings and timestamps.

use chrono::{DateTime, SecondsFormat};
use nsprobe_common::types::{FileMetadata, Timespec};

/// Formats a byte count into a human-readable string (e.g., "128 MiB").
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Renders permission bits as `-rwxr-xr-x`.
///
/// Only the nine access bits are shown; the leading character is always `-`.
#[must_use]
pub fn perm_string(perm: u32) -> String {
    const FLAGS: [char; 3] = ['r', 'w', 'x'];
    let mut out = String::with_capacity(10);
    out.push('-');
    for shift in (0..9).rev() {
        if perm & (1 << shift) == 0 {
            out.push('-');
        } else {
            out.push(FLAGS[2 - shift % 3]);
        }
    }
    out
}

/// Names the file type encoded in `st_mode`.
#[must_use]
pub const fn file_type(meta: &FileMetadata) -> &'static str {
    match meta.mode & 0o170_000 {
        0o100_000 => "regular file",
        0o040_000 => "directory",
        0o120_000 => "symbolic link",
        0o010_000 => "fifo",
        0o020_000 => "character device",
        0o060_000 => "block device",
        0o140_000 => "socket",
        _ => "unknown",
    }
}

/// Formats a timestamp as RFC 3339 UTC with nanoseconds.
#[must_use]
pub fn format_time(ts: Timespec) -> String {
    DateTime::from_timestamp(ts.secs, ts.nanos).map_or_else(
        || format!("{} ns", ts.packed_nanos()),
        |dt| dt.to_rfc3339_opts(SecondsFormat::Nanos, true),
    )
}
