//! Worker reaping with a hard ceiling.
//!
//! Reaping never fails from the caller's point of view: it either collects
//! the exit status, or kills the worker once the ceiling is reached and
//! moves on. Killing or waiting on a process that is already gone is a no-op.

use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

/// Exit-status checks after `SIGKILL` before giving up on the worker.
const KILL_GRACE_CHECKS: u32 = 10;

/// Timing for one reap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapPolicy {
    /// Sleep between exit-status checks.
    pub interval: Duration,
    /// Time after which the worker is killed.
    pub ceiling: Duration,
}

/// How the worker left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapOutcome {
    /// The worker exited on its own with this status code.
    Exited(i32),
    /// The worker was terminated by a signal it did not get from us.
    Signaled(Signal),
    /// The ceiling was reached and the worker was sent `SIGKILL`.
    Killed,
    /// There was nothing to wait for (already reaped elsewhere).
    Gone,
}

/// Waits for `pid` to exit, polling every `policy.interval`, and kills it
/// once `policy.ceiling` has elapsed.
///
/// After the kill the zombie is collected with a few more non-blocking
/// checks; a worker stuck in uninterruptible sleep is left behind rather
/// than blocking the caller.
pub fn reap(pid: Pid, policy: ReapPolicy) -> ReapOutcome {
    let started = Instant::now();
    loop {
        match try_reap(pid) {
            Some(outcome) => {
                tracing::debug!(pid = pid.as_raw(), outcome = ?outcome, "worker reaped");
                return outcome;
            }
            None if started.elapsed() >= policy.ceiling => break,
            None => thread::sleep(policy.interval),
        }
    }

    tracing::warn!(
        pid = pid.as_raw(),
        ceiling = ?policy.ceiling,
        "worker did not exit in time, sending SIGKILL"
    );
    match kill(pid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pid = pid.as_raw(), error = %e, "failed to kill worker"),
    }
    for _ in 0..KILL_GRACE_CHECKS {
        thread::sleep(policy.interval);
        if try_reap(pid).is_some() {
            return ReapOutcome::Killed;
        }
    }
    tracing::warn!(pid = pid.as_raw(), "killed worker has not exited yet");
    ReapOutcome::Killed
}

/// One non-blocking exit-status check. `None` means still running.
fn try_reap(pid: Pid) -> Option<ReapOutcome> {
    loop {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => return Some(ReapOutcome::Exited(code)),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Some(ReapOutcome::Signaled(signal)),
            Ok(_) => return None,
            Err(Errno::EINTR) => {}
            Err(_) => return Some(ReapOutcome::Gone),
        }
    }
}
