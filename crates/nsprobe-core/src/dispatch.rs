//! Worker dispatch: forks the worker and hands back a pending operation.
//!
//! Everything the worker needs (namespace snapshot, transfer buffer, pipe)
//! is prepared before `fork(2)`. The child closes every inherited
//! descriptor except its write end, then runs on plain syscalls until
//! `_exit(2)`. The parent keeps the read end and owns the worker's
//! lifecycle through [`PendingOperation`].

use std::io;
use std::os::fd::{AsRawFd, RawFd};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::{ForkResult, Pid, fork, getpid, getppid};
use nsprobe_common::config::NsprobeConfig;
use nsprobe_common::error::{NsprobeError, Result};

use crate::channel::ResultChannel;
use crate::namespace::CurrentNamespaces;
use crate::operation::WorkerOperation;
use crate::reaper::{self, ReapOutcome, ReapPolicy};
use crate::request::{NamespaceFileRequest, Outcome};
use crate::worker;

/// A worker that has been started and not yet collected.
///
/// [`PendingOperation::finish`] collects the frame and reaps the worker.
/// Dropping the handle without finishing kills and reaps the worker.
pub struct PendingOperation {
    pid: Pid,
    channel: Option<ResultChannel>,
    op: Box<dyn WorkerOperation>,
    request: NamespaceFileRequest,
    config: NsprobeConfig,
    reaped: bool,
}

impl std::fmt::Debug for PendingOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingOperation")
            .field("pid", &self.pid)
            .field("kind", &self.op.kind())
            .field("request", &self.request)
            .field("reaped", &self.reaped)
            .finish_non_exhaustive()
    }
}

/// Forks a worker that performs `op` for `request`.
///
/// The worker asks to be killed when the forking thread exits, so the
/// handle should be finished on the thread that started it.
///
/// # Errors
///
/// Returns [`NsprobeError::Config`] if the request joins more than
/// [`worker::MAX_NAMESPACES`] namespaces, [`NsprobeError::OutOfMemory`] if
/// the transfer buffer cannot be allocated, and [`NsprobeError::Spawn`] if
/// the pipe or the fork fails.
pub fn spawn(
    request: NamespaceFileRequest,
    op: Box<dyn WorkerOperation>,
    config: &NsprobeConfig,
) -> Result<PendingOperation> {
    if request.join_count() > worker::MAX_NAMESPACES {
        return Err(NsprobeError::Config {
            message: format!(
                "{} namespaces requested, at most {} can be joined",
                request.join_count(),
                worker::MAX_NAMESPACES
            ),
        });
    }
    let current = CurrentNamespaces::snapshot();

    let mut chunk = Vec::new();
    chunk
        .try_reserve_exact(config.chunk_size)
        .map_err(|_| NsprobeError::OutOfMemory {
            size: config.chunk_size,
        })?;
    chunk.resize(config.chunk_size, 0);

    let (read_end, write_end) = nix::unistd::pipe().map_err(spawn_error)?;
    let parent = getpid();

    // SAFETY: the child only uses memory prepared above, performs plain
    // syscalls, and leaves through _exit without unwinding or running
    // destructors of the parent's state.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            drop(read_end);
            close_inherited(write_end.as_raw_fd());
            if !bind_to_parent(parent) {
                // SAFETY: leaves the worker without returning into the parent's code.
                unsafe { libc::_exit(worker::EXIT_FAILED) }
            }
            let status = worker::run(op.as_ref(), &request, &current, write_end, &mut chunk);
            // SAFETY: terminates the worker without returning into the parent's code.
            unsafe { libc::_exit(status) }
        }
        Ok(ForkResult::Parent { child }) => {
            drop(write_end);
            tracing::debug!(
                pid = child.as_raw(),
                kind = %op.kind(),
                file = %request.filename().display(),
                namespace = %request.namespace(),
                joins = request.join_count(),
                "worker started"
            );
            let channel = match ResultChannel::new(read_end, config.poll_interval()) {
                Ok(channel) => channel,
                Err(e) => {
                    let _ = kill(child, Signal::SIGKILL);
                    let _ = reaper::reap(child, reap_policy(config));
                    return Err(e);
                }
            };
            Ok(PendingOperation {
                pid: child,
                channel: Some(channel),
                op,
                request,
                config: config.clone(),
                reaped: false,
            })
        }
        Err(e) => Err(spawn_error(e)),
    }
}

impl PendingOperation {
    /// Process ID of the worker.
    #[must_use]
    pub const fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// The request being served.
    #[must_use]
    pub const fn request(&self) -> &NamespaceFileRequest {
        &self.request
    }

    /// Collects the result frame, closes the channel and reaps the worker.
    ///
    /// Reaping happens on every path, including timeouts and channel errors.
    ///
    /// # Errors
    ///
    /// Returns whatever the collector produced: a worker fault, a timeout,
    /// a channel error or an allocation failure.
    pub fn finish(mut self) -> Result<Outcome> {
        let result = match self.channel.as_mut() {
            Some(channel) => self.op.collect(channel, &self.request, &self.config),
            None => Err(NsprobeError::Protocol {
                message: "result channel already closed".into(),
            }),
        };
        // The worker may be blocked writing; closing our end releases it with EPIPE.
        self.channel = None;
        let reaped = self.reap();

        match &result {
            Ok(_) => tracing::debug!(pid = self.pid(), outcome = ?reaped, "operation finished"),
            Err(e) if e.is_timeout() => tracing::warn!(
                pid = self.pid(),
                file = %self.request.filename().display(),
                error = %e,
                "operation timed out"
            ),
            Err(e) => tracing::debug!(pid = self.pid(), error = %e, "operation failed"),
        }
        result
    }

    fn reap(&mut self) -> ReapOutcome {
        self.reaped = true;
        reaper::reap(self.pid, reap_policy(&self.config))
    }
}

impl Drop for PendingOperation {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        self.channel = None;
        match kill(self.pid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => tracing::warn!(pid = self.pid(), error = %e, "failed to kill abandoned worker"),
        }
        let _ = self.reap();
    }
}

/// Asks for SIGKILL when the forking thread exits.
///
/// Returns false if the request failed or the parent exited before it took
/// effect, in which case nobody will ever collect this worker.
fn bind_to_parent(parent: Pid) -> bool {
    // SAFETY: prctl with PR_SET_PDEATHSIG takes a plain signal number.
    if unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) } == -1 {
        return false;
    }
    getppid() == parent
}

const FIRST_INHERITED: libc::c_uint = 3;

/// Closes every descriptor above stderr except `keep`.
///
/// A worker must not hold the pipe of any other call in flight: closing a
/// read end has to release that call's worker blocked on a full pipe.
fn close_inherited(keep: RawFd) {
    let Ok(keep) = libc::c_uint::try_from(keep) else {
        close_range(FIRST_INHERITED, libc::c_uint::MAX);
        return;
    };
    if keep > FIRST_INHERITED {
        close_range(FIRST_INHERITED, keep - 1);
    }
    close_range(keep.max(FIRST_INHERITED - 1) + 1, libc::c_uint::MAX);
}

fn close_range(first: libc::c_uint, last: libc::c_uint) {
    // SAFETY: close_range(2) only closes descriptors; nothing the worker
    // still uses lives in this range.
    let rc = unsafe { libc::syscall(libc::SYS_close_range, first, last, 0) };
    if rc == 0 {
        return;
    }
    // Kernels before 5.9 have no close_range(2): close one by one up to the limit.
    // SAFETY: sysconf has no preconditions.
    let limit = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
    let limit = libc::c_uint::try_from(limit).unwrap_or(1024);
    for fd in first..=last.min(limit.saturating_sub(1)) {
        if let Ok(fd) = libc::c_int::try_from(fd) {
            // SAFETY: as above; EBADF for unused slots is harmless.
            let _ = unsafe { libc::close(fd) };
        }
    }
}

const fn reap_policy(config: &NsprobeConfig) -> ReapPolicy {
    ReapPolicy {
        interval: config.reap_interval(),
        ceiling: config.reap_timeout(),
    }
}

fn spawn_error(errno: Errno) -> NsprobeError {
    NsprobeError::Spawn {
        source: io::Error::from(errno),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::thread;
    use std::time::{Duration, Instant};

    use nsprobe_common::types::{CollectPhase, OperationKind};

    use nix::sys::wait::{WaitStatus, waitpid};

    use super::*;
    use crate::operation::{self, WorkerFailure};
    use crate::protocol::{self, FaultCode};
    use crate::worker::FrameSink;

    /// Writes a scripted frame prefix, then stalls or exits. Collection is
    /// left to the real operation of the same kind.
    struct Scripted {
        kind: OperationKind,
        frame: Vec<u8>,
        stall: bool,
    }

    impl Scripted {
        const fn read(frame: Vec<u8>, stall: bool) -> Self {
            Self {
                kind: OperationKind::Read,
                frame,
                stall,
            }
        }

        const fn stat(frame: Vec<u8>, stall: bool) -> Self {
            Self {
                kind: OperationKind::Stat,
                frame,
                stall,
            }
        }
    }

    impl WorkerOperation for Scripted {
        fn kind(&self) -> OperationKind {
            self.kind
        }

        fn perform(
            &self,
            _target: &Path,
            sink: &mut FrameSink,
            _chunk: &mut [u8],
        ) -> std::result::Result<(), WorkerFailure> {
            sink.write_all(&self.frame).map_err(WorkerFailure::Channel)?;
            if self.stall {
                loop {
                    thread::sleep(Duration::from_secs(1));
                }
            }
            Ok(())
        }

        fn write_fault(&self, sink: &mut FrameSink, fault: FaultCode) -> io::Result<()> {
            operation::for_kind(self.kind).write_fault(sink, fault)
        }

        fn collect(
            &self,
            channel: &mut ResultChannel,
            request: &NamespaceFileRequest,
            config: &NsprobeConfig,
        ) -> Result<Outcome> {
            operation::for_kind(self.kind).collect(channel, request, config)
        }
    }

    fn fast_config() -> NsprobeConfig {
        NsprobeConfig {
            read_header_timeout_ms: 200,
            read_payload_timeout_ms: 200,
            stat_timeout_ms: 200,
            reap_timeout_ms: 200,
            reap_interval_ms: 10,
            ..NsprobeConfig::default()
        }
    }

    fn unused_request() -> NamespaceFileRequest {
        NamespaceFileRequest::read("/unused", "/proc/self/ns/mnt")
    }

    fn run_scripted(scripted: Scripted) -> (Result<Outcome>, Pid) {
        let pending = spawn(unused_request(), Box::new(scripted), &fast_config()).expect("spawn");
        let pid = Pid::from_raw(pending.pid());
        (pending.finish(), pid)
    }

    fn run(frame: Vec<u8>, stall: bool) -> (Result<Outcome>, Pid) {
        run_scripted(Scripted::read(frame, stall))
    }

    fn assert_gone(pid: Pid) {
        assert_eq!(kill(pid, None), Err(Errno::ESRCH));
    }

    #[test]
    fn silent_worker_times_out_in_header_phase() {
        let started = Instant::now();
        let (result, pid) = run(Vec::new(), true);

        assert!(matches!(
            result,
            Err(NsprobeError::Timeout {
                phase: CollectPhase::ReadHeader,
                ..
            })
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_gone(pid);
    }

    #[test]
    fn stalled_payload_times_out_in_payload_phase() {
        let mut frame = protocol::encode_read_header(100).to_vec();
        frame.extend_from_slice(&[1u8; 10]);
        let (result, pid) = run(frame, true);

        assert!(matches!(
            result,
            Err(NsprobeError::Timeout {
                phase: CollectPhase::ReadPayload,
                ..
            })
        ));
        assert_gone(pid);
    }

    #[test]
    fn worker_exiting_mid_payload_is_a_pipe_error() {
        let mut frame = protocol::encode_read_header(100).to_vec();
        frame.extend_from_slice(&[1u8; 10]);
        let (result, pid) = run(frame, false);

        assert!(matches!(result, Err(NsprobeError::PipeIo { .. })));
        assert_gone(pid);
    }

    #[test]
    fn unknown_fault_stage_is_a_protocol_error() {
        let (result, pid) = run(((9i32 << 16) | 2).to_ne_bytes().to_vec(), false);

        assert!(matches!(result, Err(NsprobeError::Protocol { .. })));
        assert_gone(pid);
    }

    #[test]
    fn silent_stat_worker_times_out_in_stat_phase() {
        let started = Instant::now();
        let (result, pid) = run_scripted(Scripted::stat(Vec::new(), true));

        assert!(matches!(
            result,
            Err(NsprobeError::Timeout {
                phase: CollectPhase::StatFrame,
                ..
            })
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_gone(pid);
    }

    #[test]
    fn stat_worker_exiting_after_success_code_is_a_pipe_error() {
        let (result, pid) = run_scripted(Scripted::stat(0i64.to_ne_bytes().to_vec(), false));

        let Err(NsprobeError::PipeIo { source }) = result else {
            unreachable!("expected a pipe error");
        };
        assert_eq!(source.kind(), io::ErrorKind::UnexpectedEof);
        assert_gone(pid);
    }

    #[test]
    fn sibling_worker_does_not_keep_finished_channel_open() {
        // The worker announces 16 bytes and then keeps writing far past the
        // pipe buffer; once collected it only exits on EPIPE.
        let mut frame = protocol::encode_read_header(16).to_vec();
        frame.resize(frame.len() + (1 << 20), 7);
        let config = NsprobeConfig {
            reap_timeout_ms: 3_000,
            ..fast_config()
        };
        let first = spawn(unused_request(), Box::new(Scripted::read(frame, false)), &config)
            .expect("spawn first");
        let second = spawn(unused_request(), Box::new(Scripted::read(Vec::new(), true)), &config)
            .expect("spawn second");
        let first_pid = Pid::from_raw(first.pid());

        let started = Instant::now();
        let outcome = first.finish().expect("first outcome");
        assert_eq!(outcome, Outcome::Bytes(vec![7; 16]));
        assert!(
            started.elapsed() < Duration::from_millis(1_500),
            "first worker outlived its channel: {:?}",
            started.elapsed()
        );
        assert_gone(first_pid);
        drop(second);
    }

    #[test]
    fn too_many_namespaces_are_rejected_before_forking() {
        let request = (0..worker::MAX_NAMESPACES).fold(unused_request(), |request, _| {
            request.joining_first("/proc/self/ns/user")
        });
        let err = spawn(request, operation::for_kind(OperationKind::Read), &fast_config())
            .unwrap_err();
        assert!(matches!(err, NsprobeError::Config { .. }));
    }

    fn exit_status_of_binding(parent: Pid) -> i32 {
        // SAFETY: the child makes two syscalls and leaves through _exit.
        match unsafe { fork() }.expect("fork") {
            ForkResult::Child => {
                let status = if bind_to_parent(parent) {
                    worker::EXIT_OK
                } else {
                    worker::EXIT_FAILED
                };
                // SAFETY: ends the child without running the harness.
                unsafe { libc::_exit(status) }
            }
            ForkResult::Parent { child } => match waitpid(child, None).expect("waitpid") {
                WaitStatus::Exited(_, status) => status,
                other => unreachable!("unexpected wait status {other:?}"),
            },
        }
    }

    #[test]
    fn worker_binds_only_to_the_process_that_forked_it() {
        assert_eq!(exit_status_of_binding(getpid()), worker::EXIT_OK);
        // no live process can have this pid: pid_max is far lower
        assert_eq!(exit_status_of_binding(Pid::from_raw(i32::MAX)), worker::EXIT_FAILED);
    }

    #[test]
    fn dropping_unfinished_operation_kills_worker() {
        let pending =
            spawn(unused_request(), Box::new(Scripted::read(Vec::new(), true)), &fast_config())
                .expect("spawn");
        let pid = Pid::from_raw(pending.pid());
        let started = Instant::now();

        drop(pending);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_gone(pid);
    }
}
