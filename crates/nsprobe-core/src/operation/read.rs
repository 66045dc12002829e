//! Whole-file read.
//!
//! Frame: a 4-byte error code; on success followed by a 4-byte size and
//! exactly that many payload bytes.

use std::fs::File;
use std::io::{self, ErrorKind, Read};
use std::path::Path;

use nsprobe_common::config::NsprobeConfig;
use nsprobe_common::error::Result;
use nsprobe_common::types::{CollectPhase, OperationKind};

use super::{WorkerFailure, WorkerOperation, fault_error};
use crate::channel::{Deadline, ResultChannel};
use crate::protocol::{self, FaultCode};
use crate::request::{NamespaceFileRequest, Outcome};
use crate::worker::FrameSink;

/// Reads a whole file from inside the namespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadFile;

impl WorkerOperation for ReadFile {
    fn kind(&self) -> OperationKind {
        OperationKind::Read
    }

    fn perform(
        &self,
        target: &Path,
        sink: &mut FrameSink,
        chunk: &mut [u8],
    ) -> std::result::Result<(), WorkerFailure> {
        // Open first: once the header is out, an open error can no longer be reported.
        let mut file = File::open(target).map_err(WorkerFailure::Target)?;
        let meta = file.metadata().map_err(WorkerFailure::Target)?;
        if meta.is_dir() {
            return Err(WorkerFailure::Target(io::Error::from_raw_os_error(
                libc::EISDIR,
            )));
        }
        let size = i32::try_from(meta.len())
            .map_err(|_| WorkerFailure::Target(io::Error::from_raw_os_error(libc::EFBIG)))?;

        sink.write_all(&protocol::encode_read_header(size))
            .map_err(WorkerFailure::Channel)?;

        // Never more than announced, even if the file grows meanwhile.
        let mut left = usize::try_from(size).unwrap_or(0);
        while left > 0 {
            let want = left.min(chunk.len());
            let n = match file.read(&mut chunk[..want]) {
                // file shrank after the header went out
                Ok(0) => return Err(WorkerFailure::Channel(ErrorKind::UnexpectedEof.into())),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(WorkerFailure::Channel(e)),
            };
            sink.write_all(&chunk[..n]).map_err(WorkerFailure::Channel)?;
            left -= n;
        }
        Ok(())
    }

    fn write_fault(&self, sink: &mut FrameSink, fault: FaultCode) -> io::Result<()> {
        sink.write_all(&protocol::encode_read_failure(fault))
    }

    fn collect(
        &self,
        channel: &mut ResultChannel,
        request: &NamespaceFileRequest,
        config: &NsprobeConfig,
    ) -> Result<Outcome> {
        // One budget covers both header fields.
        let header = Deadline::start(CollectPhase::ReadHeader, config.read_header_timeout());

        let mut field = [0u8; protocol::READ_CODE_LEN];
        channel.fill(&mut field, &header)?;
        let code = protocol::decode_read_field(field);
        if code != 0 {
            return Err(fault_error(i64::from(code), request));
        }

        channel.fill(&mut field, &header)?;
        let size = protocol::decode_read_field(field);
        let Ok(size) = usize::try_from(size) else {
            return Ok(Outcome::Bytes(Vec::new()));
        };
        if size == 0 {
            return Ok(Outcome::Bytes(Vec::new()));
        }

        tracing::trace!(size, file = %request.filename().display(), "reading payload");
        let payload = Deadline::start(CollectPhase::ReadPayload, config.read_payload_timeout());
        let bytes = channel.read_payload(size, config.chunk_size, &payload)?;
        Ok(Outcome::Bytes(bytes))
    }
}
