//! Worker side of an exchange: everything that runs after `fork(2)` in the child.
//!
//! The worker opens the namespace descriptors, joins them in order, performs
//! one operation and writes exactly one frame. Nothing here logs: the child is
//! a copy of a possibly multi-threaded parent and must stay on plain
//! syscalls until it exits.

use std::fs::File;
use std::io::{self, Write};
use std::os::fd::OwnedFd;

use crate::namespace::{self, CurrentNamespaces};
use crate::operation::{WorkerFailure, WorkerOperation};
use crate::protocol::{FaultCode, WorkerStage};
use crate::request::NamespaceFileRequest;

/// Exit status of a worker that delivered its frame.
pub const EXIT_OK: i32 = 0;

/// Exit status of a worker that failed; the reason travels in the frame.
pub const EXIT_FAILED: i32 = 1;

/// The worker's exclusive handle on the pipe's write end.
#[derive(Debug)]
pub struct FrameSink {
    pipe: File,
}

impl FrameSink {
    /// Wraps the write end of the result channel.
    #[must_use]
    pub fn new(write_end: OwnedFd) -> Self {
        Self {
            pipe: File::from(write_end),
        }
    }

    /// Writes all of `bytes`, retrying short writes and interrupted calls.
    ///
    /// # Errors
    ///
    /// Returns the first real I/O error, e.g. `EPIPE` once the parent has
    /// closed its end.
    pub fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.pipe.write_all(bytes)
    }
}

/// Most namespaces one worker joins: one of each kind.
pub const MAX_NAMESPACES: usize = 7;

/// Runs one operation inside the target namespaces and returns the exit status.
///
/// Every namespace descriptor is opened before the first join, so all paths
/// resolve in the caller's view. `chunk` is the transfer buffer, allocated
/// by the parent before forking. The descriptors, target file and write end
/// are all closed before this returns, on every path.
pub fn run(
    op: &dyn WorkerOperation,
    request: &NamespaceFileRequest,
    current: &CurrentNamespaces,
    write_end: OwnedFd,
    chunk: &mut [u8],
) -> i32 {
    let mut sink = FrameSink::new(write_end);

    let mut opened: [Option<File>; MAX_NAMESPACES] = Default::default();
    for (index, (slot, path)) in opened.iter_mut().zip(request.join_order()).enumerate() {
        match File::open(path.as_path()) {
            Ok(ns) => *slot = Some(ns),
            Err(e) => {
                let fault = FaultCode::new(WorkerStage::NamespaceOpen, os_errno(&e));
                return report(op, &mut sink, fault.in_namespace(index));
            }
        }
    }
    for (index, ns) in opened.iter().flatten().enumerate() {
        if let Err(errno) = namespace::join(ns, current) {
            let fault = FaultCode::new(WorkerStage::NamespaceJoin, errno as i32);
            return report(op, &mut sink, fault.in_namespace(index));
        }
    }

    let status = match op.perform(request.filename(), &mut sink, chunk) {
        Ok(()) => EXIT_OK,
        Err(WorkerFailure::Target(e)) => {
            report(op, &mut sink, FaultCode::new(WorkerStage::Target, os_errno(&e)))
        }
        Err(WorkerFailure::Channel(_)) => EXIT_FAILED,
    };
    drop(opened);
    drop(sink);
    status
}

fn report(op: &dyn WorkerOperation, sink: &mut FrameSink, fault: FaultCode) -> i32 {
    // Nothing else can be done if the parent is gone.
    let _ = op.write_fault(sink, fault);
    EXIT_FAILED
}

fn os_errno(err: &io::Error) -> i32 {
    err.raw_os_error().unwrap_or(libc::EIO)
}
