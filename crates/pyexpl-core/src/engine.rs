//! Bounded subprocess execution
//!
//! Output is drained while the child runs. Waiting for exit first would let a
//! jailed program fill the pipe and block, or keep writing into host memory
//! once draining starts. Each stream is capped at the configured ceiling; the
//! first stream to cross it gets the truncation marker and the child is
//! terminated.

use crate::pipe::{create_pipe, Chunk, OutputStream};
use crate::result::TERMINATED_EXIT_CODE;
use crate::{ExecutionLimits, ExecutionResult, PyexplError, Result};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::io::{self, Write};
use std::os::fd::AsFd;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Interval between liveness checks while waiting out the kill grace period
const REAP_POLL: Duration = Duration::from_millis(5);

/// How stdout and stderr are captured
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// Both streams share one pipe, result has everything in `stdout`
    #[default]
    Combined,
    /// Separate pipes, each bounded on its own
    Separate,
}

/// A fully resolved command line ready to spawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub argv: Vec<OsString>,
    /// Bytes written to the child's stdin; stdin is `/dev/null` when unset
    pub stdin: Option<Vec<u8>>,
    pub streams: StreamMode,
    pub current_dir: Option<PathBuf>,
}

impl Invocation {
    #[must_use]
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            stdin: None,
            streams: StreamMode::Combined,
            current_dir: None,
        }
    }

    #[must_use]
    pub fn stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    #[must_use]
    pub fn streams(mut self, mode: StreamMode) -> Self {
        self.streams = mode;
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    fn program(&self) -> String {
        self.argv
            .first()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Why the read loop stopped
#[derive(Debug)]
enum Stop {
    Exited(ExitStatus),
    Ceiling,
    TimedOut,
}

/// Run `invocation` to completion or until a limit trips.
///
/// Only spawn and I/O failures are errors. Crashes, non-zero exits and
/// forced termination are all reported through the returned result.
pub fn execute(invocation: &Invocation, limits: &ExecutionLimits) -> Result<ExecutionResult> {
    let start = Instant::now();
    let (mut child, mut streams) = spawn(invocation, limits.max_output_bytes)?;
    let pid = child.id();

    if let (Some(stdin), Some(bytes)) = (child.take_stdin(), invocation.stdin.clone()) {
        feed_stdin(stdin, bytes)?;
    }

    let mut scratch = vec![0u8; limits.chunk_size.max(1)];
    let poll_timeout = PollTimeout::from(
        u16::try_from(limits.poll_interval().as_millis()).unwrap_or(u16::MAX),
    );
    let deadline = limits.timeout().map(|limit| start + limit);

    let stop = loop {
        if let Some(status) = child.try_wait()? {
            break Stop::Exited(status);
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break Stop::TimedOut;
        }
        if read_ready(&mut streams, &mut scratch, poll_timeout, limits.poll_interval())? {
            break Stop::Ceiling;
        }
    };

    let (exit_code, timed_out) = match stop {
        Stop::Exited(status) => {
            drain(&mut streams, &mut scratch)?;
            (exit_code(status), false)
        }
        Stop::Ceiling => {
            tracing::info!(
                pid,
                ceiling = limits.max_output_bytes,
                "output ceiling reached, terminating"
            );
            let status = child.terminate(limits.kill_grace())?;
            (status.code().unwrap_or(TERMINATED_EXIT_CODE), false)
        }
        Stop::TimedOut => {
            tracing::info!(pid, "wall-clock limit reached, terminating");
            let status = child.terminate(limits.kill_grace())?;
            (status.code().unwrap_or(TERMINATED_EXIT_CODE), true)
        }
    };

    let mut streams = streams.into_iter().map(OutputStream::finish);
    let (stdout, stdout_truncated) = streams.next().unwrap_or_default();
    let (stderr, stderr_truncated) = streams.next().unwrap_or_default();

    let result = ExecutionResult {
        exit_code,
        stdout,
        stderr,
        truncated: stdout_truncated || stderr_truncated,
        timed_out,
        duration: start.elapsed(),
    };

    tracing::debug!(
        pid,
        exit_code = result.exit_code,
        stdout_bytes = result.stdout.len(),
        stderr_bytes = result.stderr.len(),
        truncated = result.truncated,
        "execution finished"
    );

    Ok(result)
}

fn spawn(invocation: &Invocation, ceiling: usize) -> Result<(ChildGuard, Vec<OutputStream>)> {
    let (program, args) = invocation
        .argv
        .split_first()
        .ok_or_else(|| PyexplError::Config("empty command line".into()))?;

    let mut command = Command::new(program);
    command.args(args).stdin(if invocation.stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    if let Some(dir) = &invocation.current_dir {
        command.current_dir(dir);
    }

    let merged = match invocation.streams {
        StreamMode::Combined => {
            let (read, write) = create_pipe()?;
            command
                .stdout(Stdio::from(write.try_clone()?))
                .stderr(Stdio::from(write));
            Some(read)
        }
        StreamMode::Separate => {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
            None
        }
    };

    let child = command.spawn().map_err(|source| PyexplError::Spawn {
        program: invocation.program(),
        source,
    })?;
    // The command still owns our copies of the merged write end; EOF never
    // arrives while they are open.
    drop(command);

    let mut child = ChildGuard::new(child);
    tracing::debug!(pid = child.id(), program = %invocation.program(), "spawned");

    let streams = if let Some(read) = merged {
        vec![OutputStream::new("stdout", read, ceiling)]
    } else {
        let stdout = child
            .inner
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("child stdout was not captured"))?;
        let stderr = child
            .inner
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("child stderr was not captured"))?;
        vec![
            OutputStream::new("stdout", stdout, ceiling),
            OutputStream::new("stderr", stderr, ceiling),
        ]
    };

    Ok((child, streams))
}

/// Write stdin from a separate thread so a child that never reads it cannot
/// stall the read loop. The thread ends with EPIPE once the child is gone.
fn feed_stdin(mut stdin: ChildStdin, bytes: Vec<u8>) -> Result<()> {
    thread::Builder::new()
        .name("pyexpl-stdin".into())
        .spawn(move || {
            if let Err(e) = stdin.write_all(&bytes) {
                tracing::debug!(error = %e, "stdin closed before all input was written");
            }
        })?;
    Ok(())
}

/// Wait up to `timeout` for output and read one chunk from each ready stream.
///
/// Returns `true` when a stream crossed the ceiling.
fn read_ready(
    streams: &mut [OutputStream],
    scratch: &mut [u8],
    timeout: PollTimeout,
    idle: Duration,
) -> Result<bool> {
    if streams.iter().all(|s| !s.is_open()) {
        // Output closed but the process lives on.
        thread::sleep(idle);
        return Ok(false);
    }

    for index in readable(streams, timeout)? {
        if streams[index].read_chunk(scratch)? == Chunk::Overflow {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Collect whatever is already buffered after the child exited, up to the
/// ceiling. The child was not terminated, so nothing is marked truncated.
///
/// Never waits: a grandchild holding the pipe open must not keep us here.
fn drain(streams: &mut [OutputStream], scratch: &mut [u8]) -> Result<()> {
    loop {
        let ready = readable(streams, PollTimeout::ZERO)?;
        if ready.is_empty() {
            return Ok(());
        }
        for index in ready {
            if streams[index].read_remaining(scratch)? == Chunk::Overflow {
                tracing::debug!(
                    stream = streams[index].name(),
                    "output ceiling reached while draining, dropping the rest"
                );
            }
        }
    }
}

/// Indices of open streams that have data or hit EOF
fn readable(streams: &[OutputStream], timeout: PollTimeout) -> Result<Vec<usize>> {
    let open: Vec<usize> = streams
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_open())
        .map(|(i, _)| i)
        .collect();
    if open.is_empty() {
        return Ok(open);
    }

    let mut fds: Vec<PollFd<'_>> = open
        .iter()
        .map(|&i| PollFd::new(streams[i].as_fd(), PollFlags::POLLIN))
        .collect();

    loop {
        match poll(&mut fds, timeout) {
            Ok(_) => break,
            Err(Errno::EINTR) => {}
            Err(e) => return Err(e.into()),
        }
    }

    let wake = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
    Ok(open
        .iter()
        .zip(&fds)
        .filter(|(_, fd)| fd.revents().is_some_and(|r| r.intersects(wake)))
        .map(|(&i, _)| i)
        .collect())
}

/// Exit code, or `128 + signal` for a signal death
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

/// Sole owner of the child process.
///
/// Kills and reaps on drop unless the child was already reaped, so an early
/// return or a panic in the read loop never leaves an orphan behind.
#[derive(Debug)]
struct ChildGuard {
    inner: Child,
    reaped: bool,
}

impl ChildGuard {
    const fn new(inner: Child) -> Self {
        Self {
            inner,
            reaped: false,
        }
    }

    fn id(&self) -> u32 {
        self.inner.id()
    }

    fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.inner.stdin.take()
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        let status = self.inner.try_wait()?;
        if status.is_some() {
            self.reaped = true;
        }
        Ok(status)
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL. Always reaps.
    fn terminate(&mut self, grace: Duration) -> Result<ExitStatus> {
        if let Some(status) = self.try_wait()? {
            return Ok(status);
        }

        let pid = Pid::from_raw(i32::try_from(self.id()).map_err(io::Error::other)?);
        match kill(pid, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => return Err(e.into()),
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if let Some(status) = self.try_wait()? {
                return Ok(status);
            }
            thread::sleep(REAP_POLL);
        }

        tracing::warn!(pid = self.id(), "process ignored SIGTERM, sending SIGKILL");
        self.inner.kill()?;
        let status = self.inner.wait()?;
        self.reaped = true;
        Ok(status)
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        if let Err(e) = self.inner.kill() {
            tracing::warn!(pid = self.id(), error = %e, "failed to kill child");
        }
        if let Err(e) = self.inner.wait() {
            tracing::warn!(pid = self.id(), error = %e, "failed to reap child");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_deaths_map_above_128() {
        assert_eq!(exit_code(ExitStatus::from_raw(nix::libc::SIGKILL)), 137);
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
    }

    fn sleeper() -> (ChildGuard, Pid) {
        let child = Command::new("sh")
            .args(["-c", "sleep 30"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        let pid = Pid::from_raw(i32::try_from(child.id()).unwrap());
        (ChildGuard::new(child), pid)
    }

    fn assert_gone(pid: Pid) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while kill(pid, None).is_ok() {
            assert!(Instant::now() < deadline, "child {pid} outlived its guard");
            thread::sleep(REAP_POLL);
        }
        assert_eq!(kill(pid, None), Err(Errno::ESRCH));
    }

    #[test]
    fn dropped_guard_kills_and_reaps() {
        let (guard, pid) = sleeper();
        drop(guard);
        assert_gone(pid);
    }

    #[test]
    fn panic_while_reading_still_reaps() {
        let (guard, pid) = sleeper();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = guard;
            panic!("read loop failed");
        }));

        assert!(outcome.is_err());
        assert_gone(pid);
    }

    #[test]
    fn empty_argv_is_a_config_error() {
        let invocation = Invocation::new(Vec::<OsString>::new());
        let err = execute(&invocation, &ExecutionLimits::default()).unwrap_err();
        assert!(matches!(err, PyexplError::Config(_)));
    }
}
