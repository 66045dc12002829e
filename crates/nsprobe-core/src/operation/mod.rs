//! The operations a worker can perform, and the shape of their frames.
//!
//! Each operation owns both halves of its exchange: what the worker does
//! and writes after joining the namespace, and how the parent collects and
//! decodes that frame. Dispatch, joining and reaping are shared.

mod read;
mod stat;

use std::io;
use std::path::Path;

use nsprobe_common::config::NsprobeConfig;
use nsprobe_common::error::{NsprobeError, Result};
use nsprobe_common::types::OperationKind;

pub use self::read::ReadFile;
pub use self::stat::StatFile;
use crate::channel::ResultChannel;
use crate::protocol::{FaultCode, WorkerStage};
use crate::request::{NamespaceFileRequest, Outcome};
use crate::worker::FrameSink;

/// Why a worker operation stopped short.
#[derive(Debug)]
pub enum WorkerFailure {
    /// The target could not be used; nothing has been written yet, so a
    /// fault frame can still be sent.
    Target(io::Error),
    /// The frame is already under way or the channel is broken; the worker
    /// can only exit.
    Channel(io::Error),
}

/// One filesystem operation exchanged over the result channel.
pub trait WorkerOperation: Send + Sync {
    /// Which operation this is.
    fn kind(&self) -> OperationKind;

    /// Worker side, after the namespace join: performs the operation on
    /// `target` and writes the success frame.
    ///
    /// # Errors
    ///
    /// See [`WorkerFailure`].
    fn perform(
        &self,
        target: &Path,
        sink: &mut FrameSink,
        chunk: &mut [u8],
    ) -> std::result::Result<(), WorkerFailure>;

    /// Worker side: writes the failure frame carrying `fault`.
    ///
    /// # Errors
    ///
    /// Returns the write error if the channel is broken.
    fn write_fault(&self, sink: &mut FrameSink, fault: FaultCode) -> io::Result<()>;

    /// Parent side: reads one frame and turns it into an outcome.
    ///
    /// # Errors
    ///
    /// Returns the mapped worker fault, a timeout, or a channel error.
    fn collect(
        &self,
        channel: &mut ResultChannel,
        request: &NamespaceFileRequest,
        config: &NsprobeConfig,
    ) -> Result<Outcome>;
}

/// Returns the operation implementing `kind`.
#[must_use]
pub fn for_kind(kind: OperationKind) -> Box<dyn WorkerOperation> {
    match kind {
        OperationKind::Read => Box::new(ReadFile),
        OperationKind::Stat => Box::new(StatFile),
    }
}

/// Maps a non-zero frame error code to the error the caller sees.
pub fn fault_error(code: i64, request: &NamespaceFileRequest) -> NsprobeError {
    let fault = match FaultCode::decode(code) {
        Ok(fault) => fault,
        Err(e) => return e,
    };
    let source = io::Error::from_raw_os_error(fault.errno);
    let namespace = request
        .join_order()
        .nth(usize::from(fault.namespace))
        .unwrap_or_else(|| request.namespace())
        .clone();
    match fault.stage {
        WorkerStage::NamespaceOpen => NsprobeError::NamespaceOpen { namespace, source },
        WorkerStage::NamespaceJoin => NsprobeError::NamespaceJoin { namespace, source },
        WorkerStage::Target => NsprobeError::TargetOpen {
            path: request.filename().to_path_buf(),
            namespace: request.namespace().clone(),
            source,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_kind_picks_matching_operation() {
        assert_eq!(for_kind(OperationKind::Read).kind(), OperationKind::Read);
        assert_eq!(for_kind(OperationKind::Stat).kind(), OperationKind::Stat);
    }

    #[test]
    fn fault_error_maps_each_stage() {
        let request = NamespaceFileRequest::stat("/etc/passwd", "/proc/1/ns/mnt");

        let open = FaultCode::new(WorkerStage::NamespaceOpen, libc::ENOENT).encode();
        assert!(matches!(
            fault_error(i64::from(open), &request),
            NsprobeError::NamespaceOpen { .. }
        ));

        let join = FaultCode::new(WorkerStage::NamespaceJoin, libc::EPERM).encode();
        assert!(matches!(
            fault_error(i64::from(join), &request),
            NsprobeError::NamespaceJoin { .. }
        ));

        let target = FaultCode::new(WorkerStage::Target, libc::ENOENT).encode();
        let err = fault_error(i64::from(target), &request);
        assert!(matches!(err, NsprobeError::TargetOpen { .. }));
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn fault_error_names_the_namespace_that_failed() {
        let request = NamespaceFileRequest::read("/etc/passwd", "/proc/1/ns/mnt")
            .joining_first("/proc/1/ns/user");

        let user = FaultCode::new(WorkerStage::NamespaceJoin, libc::EPERM).in_namespace(0);
        let NsprobeError::NamespaceJoin { namespace, .. } = fault_error(i64::from(user.encode()), &request)
        else {
            unreachable!("expected a join error");
        };
        assert_eq!(namespace.as_path(), Path::new("/proc/1/ns/user"));

        let mount = FaultCode::new(WorkerStage::NamespaceOpen, libc::ENOENT).in_namespace(1);
        let NsprobeError::NamespaceOpen { namespace, .. } = fault_error(i64::from(mount.encode()), &request)
        else {
            unreachable!("expected an open error");
        };
        assert_eq!(namespace.as_path(), Path::new("/proc/1/ns/mnt"));
    }

    #[test]
    fn fault_error_rejects_garbage() {
        let request = NamespaceFileRequest::read("/etc/passwd", "/proc/1/ns/mnt");
        assert!(matches!(
            fault_error(-5, &request),
            NsprobeError::Protocol { .. }
        ));
    }
}
