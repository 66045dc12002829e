//! Parent side of the result channel: non-blocking, deadline-bounded reads.
//!
//! The read end of the pipe is switched to `O_NONBLOCK` as soon as the
//! parent owns it. Every read that would block waits for readiness with
//! `poll(2)` for at most one poll interval, and gives up with
//! [`NsprobeError::Timeout`] once the phase budget is spent.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::os::fd::{AsFd, OwnedFd};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nsprobe_common::error::{NsprobeError, Result};
use nsprobe_common::types::CollectPhase;

/// A time budget started at a fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
    phase: CollectPhase,
}

impl Deadline {
    /// Starts the budget for `phase` now.
    #[must_use]
    pub fn start(phase: CollectPhase, budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
            phase,
        }
    }

    /// Time left before the budget is exceeded.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }

    fn expired(&self) -> NsprobeError {
        NsprobeError::Timeout {
            phase: self.phase,
            budget: self.budget,
        }
    }
}

/// Exclusive owner of the pipe's read end.
#[derive(Debug)]
pub struct ResultChannel {
    pipe: File,
    poll_interval: Duration,
}

impl ResultChannel {
    /// Takes ownership of the read end and makes it non-blocking.
    ///
    /// # Errors
    ///
    /// Returns [`NsprobeError::PipeIo`] if the descriptor flags cannot be set.
    pub fn new(read_end: OwnedFd, poll_interval: Duration) -> Result<Self> {
        let pipe = File::from(read_end);
        let flags = fcntl(&pipe, FcntlArg::F_GETFL).map_err(pipe_io)?;
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        let _ = fcntl(&pipe, FcntlArg::F_SETFL(flags)).map_err(pipe_io)?;
        Ok(Self {
            pipe,
            poll_interval,
        })
    }

    /// Fills `buf` completely before `deadline` expires.
    ///
    /// # Errors
    ///
    /// Returns [`NsprobeError::Timeout`] when the budget runs out, and
    /// [`NsprobeError::PipeIo`] on a read error or when the worker closes
    /// the channel before `buf` is full.
    pub fn fill(&mut self, buf: &mut [u8], deadline: &Deadline) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.pipe.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(NsprobeError::PipeIo {
                        source: std::io::Error::new(
                            ErrorKind::UnexpectedEof,
                            format!(
                                "worker closed the channel after {filled} of {} bytes",
                                buf.len()
                            ),
                        ),
                    });
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => self.wait_readable(deadline)?,
                Err(e) => return Err(NsprobeError::PipeIo { source: e }),
            }
        }
        Ok(())
    }

    /// Reads exactly `size` bytes in chunks of at most `chunk_size`.
    ///
    /// The buffer is allocated up front at its final size. On any failure
    /// the partially filled buffer is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`NsprobeError::OutOfMemory`] if the buffer cannot be
    /// allocated, otherwise the errors of [`ResultChannel::fill`].
    pub fn read_payload(
        &mut self,
        size: usize,
        chunk_size: usize,
        deadline: &Deadline,
    ) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        payload
            .try_reserve_exact(size)
            .map_err(|_| NsprobeError::OutOfMemory { size })?;
        payload.resize(size, 0);
        for chunk in payload.chunks_mut(chunk_size.max(1)) {
            self.fill(chunk, deadline)?;
        }
        Ok(payload)
    }

    fn wait_readable(&self, deadline: &Deadline) -> Result<()> {
        let remaining = deadline.remaining();
        if remaining.is_zero() {
            return Err(deadline.expired());
        }
        let slice = remaining.min(self.poll_interval).max(Duration::from_millis(1));
        let millis = u16::try_from(slice.as_millis()).unwrap_or(u16::MAX);
        let mut fds = [PollFd::new(self.pipe.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(_) | Err(Errno::EINTR) => Ok(()),
            Err(e) => Err(pipe_io(e)),
        }
    }
}

fn pipe_io(errno: Errno) -> NsprobeError {
    NsprobeError::PipeIo {
        source: std::io::Error::from(errno),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::thread;

    use super::*;

    fn channel() -> (ResultChannel, File) {
        let (read_end, write_end) = nix::unistd::pipe().expect("pipe");
        let channel = ResultChannel::new(read_end, Duration::from_millis(10)).expect("channel");
        (channel, File::from(write_end))
    }

    #[test]
    fn fill_reads_bytes_written_later() {
        let (mut channel, mut writer) = channel();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            writer.write_all(b"abcd").expect("write");
        });

        let mut buf = [0u8; 4];
        let deadline = Deadline::start(CollectPhase::ReadHeader, Duration::from_secs(5));
        channel.fill(&mut buf, &deadline).expect("fill");
        assert_eq!(&buf, b"abcd");
        handle.join().expect("writer thread");
    }

    #[test]
    fn fill_reassembles_split_writes() {
        let (mut channel, mut writer) = channel();
        let handle = thread::spawn(move || {
            for byte in b"split" {
                writer.write_all(&[*byte]).expect("write");
                thread::sleep(Duration::from_millis(5));
            }
        });

        let mut buf = [0u8; 5];
        let deadline = Deadline::start(CollectPhase::StatFrame, Duration::from_secs(5));
        channel.fill(&mut buf, &deadline).expect("fill");
        assert_eq!(&buf, b"split");
        handle.join().expect("writer thread");
    }

    #[test]
    fn fill_times_out_when_nothing_arrives() {
        let (mut channel, _writer) = channel();
        let mut buf = [0u8; 8];
        let budget = Duration::from_millis(100);
        let started = Instant::now();

        let err = channel
            .fill(&mut buf, &Deadline::start(CollectPhase::ReadHeader, budget))
            .unwrap_err();
        assert!(matches!(
            err,
            NsprobeError::Timeout {
                phase: CollectPhase::ReadHeader,
                ..
            }
        ));
        assert!(started.elapsed() >= budget);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn fill_reports_early_close() {
        let (mut channel, mut writer) = channel();
        writer.write_all(b"ab").expect("write");
        drop(writer);

        let mut buf = [0u8; 4];
        let deadline = Deadline::start(CollectPhase::ReadHeader, Duration::from_secs(5));
        let err = channel.fill(&mut buf, &deadline).unwrap_err();
        let NsprobeError::PipeIo { source } = err else {
            unreachable!("expected a pipe error, got {err}");
        };
        assert_eq!(source.kind(), ErrorKind::UnexpectedEof);
        assert!(source.to_string().contains("2 of 4"));
    }

    #[test]
    fn read_payload_larger_than_pipe_buffer() {
        let (mut channel, mut writer) = channel();
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let expected = data.clone();
        let handle = thread::spawn(move || writer.write_all(&data).expect("write"));

        let deadline = Deadline::start(CollectPhase::ReadPayload, Duration::from_secs(10));
        let payload = channel
            .read_payload(expected.len(), 1024, &deadline)
            .expect("payload");
        assert_eq!(payload, expected);
        handle.join().expect("writer thread");
    }

    #[test]
    fn read_payload_of_zero_bytes_is_empty() {
        let (mut channel, _writer) = channel();
        let deadline = Deadline::start(CollectPhase::ReadPayload, Duration::from_millis(10));
        let payload = channel.read_payload(0, 1024, &deadline).expect("payload");
        assert!(payload.is_empty());
    }

    #[test]
    fn read_payload_times_out_on_stalled_writer() {
        let (mut channel, mut writer) = channel();
        writer.write_all(&[7u8; 100]).expect("write");

        let deadline = Deadline::start(CollectPhase::ReadPayload, Duration::from_millis(100));
        let err = channel.read_payload(1000, 64, &deadline).unwrap_err();
        assert!(err.is_timeout());
    }
}
