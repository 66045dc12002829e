//! Metadata lookup.
//!
//! Frame: an 8-byte error code; on success the full 88-byte stat record,
//! whose first slot is that same zero code.

use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use nsprobe_common::config::NsprobeConfig;
use nsprobe_common::error::Result;
use nsprobe_common::types::{CollectPhase, FileMetadata, OperationKind, Timespec};

use super::{WorkerFailure, WorkerOperation, fault_error};
use crate::channel::{Deadline, ResultChannel};
use crate::protocol::{self, FaultCode, StatFrame};
use crate::request::{NamespaceFileRequest, Outcome};
use crate::worker::FrameSink;

/// Stats a path from inside the namespace, following symlinks.
///
/// The target is never opened, so special files (FIFOs, devices) answer
/// immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatFile;

impl WorkerOperation for StatFile {
    fn kind(&self) -> OperationKind {
        OperationKind::Stat
    }

    fn perform(
        &self,
        target: &Path,
        sink: &mut FrameSink,
        _chunk: &mut [u8],
    ) -> std::result::Result<(), WorkerFailure> {
        let meta = std::fs::metadata(target).map_err(WorkerFailure::Target)?;
        let frame = StatFrame::from_metadata(&metadata_of(&meta));
        sink.write_all(&frame.encode()).map_err(WorkerFailure::Channel)
    }

    fn write_fault(&self, sink: &mut FrameSink, fault: FaultCode) -> io::Result<()> {
        sink.write_all(&protocol::encode_stat_failure(fault))
    }

    fn collect(
        &self,
        channel: &mut ResultChannel,
        request: &NamespaceFileRequest,
        config: &NsprobeConfig,
    ) -> Result<Outcome> {
        let deadline = Deadline::start(CollectPhase::StatFrame, config.stat_timeout());

        let mut frame = [0u8; protocol::STAT_FRAME_LEN];
        let (code, rest) = frame.split_at_mut(protocol::STAT_CODE_LEN);
        channel.fill(code, &deadline)?;
        let mut raw = [0u8; protocol::STAT_CODE_LEN];
        raw.copy_from_slice(code);
        let code = protocol::decode_stat_code(raw);
        if code != 0 {
            return Err(fault_error(code, request));
        }
        channel.fill(rest, &deadline)?;

        let meta = StatFrame::decode(&frame).into_metadata()?;
        Ok(Outcome::Metadata(meta))
    }
}

/// Converts `std` metadata into the record sent over the wire.
#[allow(clippy::cast_possible_wrap)]
pub(crate) fn metadata_of(meta: &std::fs::Metadata) -> FileMetadata {
    FileMetadata {
        uid: meta.uid(),
        gid: meta.gid(),
        // st_size fits off_t
        size: meta.size() as i64,
        mode: meta.mode(),
        inode: meta.ino(),
        // st_blksize fits blksize_t
        block_size: meta.blksize() as i64,
        blocks: meta.blocks() as i64,
        links: meta.nlink(),
        accessed: Timespec::new(meta.atime(), meta.atime_nsec()),
        modified: Timespec::new(meta.mtime(), meta.mtime_nsec()),
    }
}
