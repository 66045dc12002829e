//! Wire format of the result channel between a worker and its parent.
//!
//! All integers are fixed-width and native-endian: both ends are the same
//! binary on the same host.
//!
//! ```text
//! read, failure:  | code: i32 |
//! read, success:  | 0: i32 | size: i32 | size bytes ... |
//! stat, failure:  | code: i64 |
//! stat, success:  | 0 | uid | gid | size | mode | ino | blksize | blocks | nlink | atime_ns | mtime_ns |   (11 x i64)
//! ```
//!
//! A non-zero error code is a [`FaultCode`]: the OS error number in the low
//! 16 bits, the worker stage that failed in bits 16..24 and the position of
//! the failing namespace in the join order in bits 24..31.

use nsprobe_common::error::{NsprobeError, Result};
use nsprobe_common::types::{FileMetadata, Timespec};

/// Size of the error-code field of a read frame.
pub const READ_CODE_LEN: usize = 4;

/// Size of the full success header of a read frame.
pub const READ_HEADER_LEN: usize = 8;

/// Number of `i64` slots in a stat frame.
pub const STAT_SLOTS: usize = 11;

/// Size of the error-code slot of a stat frame.
pub const STAT_CODE_LEN: usize = 8;

/// Size of a complete stat frame.
pub const STAT_FRAME_LEN: usize = STAT_SLOTS * 8;

const STAGE_SHIFT: u32 = 16;
const STAGE_MASK: i32 = 0xFF;
const INDEX_SHIFT: u32 = 24;
const INDEX_MASK: i32 = 0x7F;
const ERRNO_MASK: i32 = 0xFFFF;

/// Step of the worker's life at which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStage {
    /// Opening the namespace descriptor.
    NamespaceOpen = 1,
    /// Joining the namespace with `setns(2)`.
    NamespaceJoin = 2,
    /// Opening, stat'ing or validating the target file.
    Target = 3,
}

impl WorkerStage {
    const fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            1 => Some(Self::NamespaceOpen),
            2 => Some(Self::NamespaceJoin),
            3 => Some(Self::Target),
            _ => None,
        }
    }
}

/// Error code carried by a failure frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultCode {
    /// Stage that failed.
    pub stage: WorkerStage,
    /// OS error number captured by the worker.
    pub errno: i32,
    /// Position in the join order of the namespace that failed. Zero for
    /// target failures.
    pub namespace: u8,
}

impl FaultCode {
    /// Creates a fault code for a stage and OS error.
    #[must_use]
    pub const fn new(stage: WorkerStage, errno: i32) -> Self {
        Self {
            stage,
            errno,
            namespace: 0,
        }
    }

    /// Attributes the fault to the namespace at `index` in the join order.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub const fn in_namespace(self, index: usize) -> Self {
        Self {
            namespace: (index & INDEX_MASK as usize) as u8,
            ..self
        }
    }

    /// Encodes the fault into the wire value. Never zero.
    #[must_use]
    pub const fn encode(self) -> i32 {
        ((self.namespace as i32) << INDEX_SHIFT)
            | ((self.stage as i32) << STAGE_SHIFT)
            | (self.errno & ERRNO_MASK)
    }

    /// Decodes a non-zero wire value.
    ///
    /// # Errors
    ///
    /// Returns [`NsprobeError::Protocol`] if the stage tag is unknown.
    pub fn decode(code: i64) -> Result<Self> {
        let code = i32::try_from(code).map_err(|_| NsprobeError::Protocol {
            message: format!("error code {code} out of range"),
        })?;
        let stage = WorkerStage::from_tag((code >> STAGE_SHIFT) & STAGE_MASK).ok_or_else(|| {
            NsprobeError::Protocol {
                message: format!("error code {code:#x} has unknown worker stage"),
            }
        })?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let namespace = ((code >> INDEX_SHIFT) & INDEX_MASK) as u8;
        Ok(Self {
            stage,
            errno: code & ERRNO_MASK,
            namespace,
        })
    }
}

/// Encodes the 4-byte failure frame of a read.
#[must_use]
pub const fn encode_read_failure(fault: FaultCode) -> [u8; READ_CODE_LEN] {
    fault.encode().to_ne_bytes()
}

/// Encodes the 8-byte success header of a read announcing `size` bytes.
#[must_use]
pub fn encode_read_header(size: i32) -> [u8; READ_HEADER_LEN] {
    let mut header = [0u8; READ_HEADER_LEN];
    header[..READ_CODE_LEN].copy_from_slice(&0i32.to_ne_bytes());
    header[READ_CODE_LEN..].copy_from_slice(&size.to_ne_bytes());
    header
}

/// Decodes a 4-byte read field (error code or payload size).
#[must_use]
pub const fn decode_read_field(bytes: [u8; READ_CODE_LEN]) -> i32 {
    i32::from_ne_bytes(bytes)
}

/// Encodes the 8-byte failure frame of a stat.
#[must_use]
pub fn encode_stat_failure(fault: FaultCode) -> [u8; STAT_CODE_LEN] {
    i64::from(fault.encode()).to_ne_bytes()
}

/// Decodes the leading error-code slot of a stat frame.
#[must_use]
pub const fn decode_stat_code(bytes: [u8; STAT_CODE_LEN]) -> i64 {
    i64::from_ne_bytes(bytes)
}

/// The eleven-slot stat record, as the worker fills it from `stat(2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatFrame(pub [i64; STAT_SLOTS]);

impl StatFrame {
    /// Builds a success frame from typed metadata.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn from_metadata(meta: &FileMetadata) -> Self {
        Self([
            0,
            i64::from(meta.uid),
            i64::from(meta.gid),
            meta.size,
            i64::from(meta.mode),
            // bit pattern preserved, undone in into_metadata
            meta.inode as i64,
            meta.block_size,
            meta.blocks,
            meta.links as i64,
            meta.accessed.packed_nanos(),
            meta.modified.packed_nanos(),
        ])
    }

    /// Serializes the frame.
    #[must_use]
    pub fn encode(&self) -> [u8; STAT_FRAME_LEN] {
        let mut out = [0u8; STAT_FRAME_LEN];
        for (slot, value) in out.chunks_exact_mut(8).zip(self.0) {
            slot.copy_from_slice(&value.to_ne_bytes());
        }
        out
    }

    /// Deserializes a complete frame.
    #[must_use]
    pub fn decode(bytes: &[u8; STAT_FRAME_LEN]) -> Self {
        let mut slots = [0i64; STAT_SLOTS];
        for (value, slot) in slots.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(slot);
            *value = i64::from_ne_bytes(raw);
        }
        Self(slots)
    }

    /// Returns the error-code slot.
    #[must_use]
    pub const fn code(&self) -> i64 {
        self.0[0]
    }

    /// Converts a success frame into typed metadata.
    ///
    /// # Errors
    ///
    /// Returns [`NsprobeError::Protocol`] if a field does not fit its type.
    #[allow(clippy::cast_sign_loss)]
    pub fn into_metadata(self) -> Result<FileMetadata> {
        let [_, uid, gid, size, mode, inode, block_size, blocks, links, atime, mtime] = self.0;
        Ok(FileMetadata {
            uid: narrow("uid", uid)?,
            gid: narrow("gid", gid)?,
            size,
            mode: narrow("mode", mode)?,
            inode: inode as u64,
            block_size,
            blocks,
            links: u64::try_from(links).map_err(|_| out_of_range("links", links))?,
            accessed: Timespec::from_packed_nanos(atime),
            modified: Timespec::from_packed_nanos(mtime),
        })
    }
}

fn narrow(field: &str, value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| out_of_range(field, value))
}

fn out_of_range(field: &str, value: i64) -> NsprobeError {
    NsprobeError::Protocol {
        message: format!("stat field {field} out of range: {value}"),
    }
}
