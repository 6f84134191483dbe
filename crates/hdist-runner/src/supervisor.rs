//! Child-process supervision.
//!
//! Spawns one child at a time with an exactly-specified environment and
//! weaves its stdout, stderr, and any registered log FIFOs into the job
//! log. Two modes share the same contract (stdout is forwarded to the
//! capture sink when one is active, everything else is emitted as DEBUG
//! lines, and the supervisor returns only after the child has exited and
//! the pipes are drained):
//!
//! - the *simple* mode reads non-blocking pipes on a fixed cadence and
//!   rejects jobs that registered log FIFOs;
//! - the *multiplexed* mode polls every descriptor and re-arms FIFOs on
//!   hangup, since a FIFO hangs up each time its last writer closes.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use hdist_common::constants::{LOG_PIPE_BUFSIZE, POLL_INTERVAL_MS};
use hdist_common::log::{LogLevel, Logger};
use hdist_core::env::Env;
use hdist_core::error::SpecError;

use crate::error::{JobError, Result};
use crate::logpipe::LogPipeRegistry;

/// Spawns `args` with exactly `env`, supervises it to completion, and
/// reports a non-zero exit as [`JobError::CommandFailed`].
pub(crate) fn run(
    logger: &dyn Logger,
    pipes: &LogPipeRegistry,
    args: &[String],
    env: &Env,
    mut capture: Option<&mut dyn Write>,
    force_simple: bool,
) -> Result<()> {
    let cwd = env
        .get("PWD")
        .cloned()
        .ok_or_else(|| JobError::Spec(SpecError::UnknownVariable("PWD".to_owned())))?;
    let mut child = spawn(logger, args, env, &cwd)?;

    let supervised = if force_simple || cfg!(not(target_os = "linux")) {
        if pipes.is_empty() {
            supervise_simple(logger, &mut child, &mut capture)
        } else {
            Err(JobError::LogPipesUnsupported)
        }
    } else {
        supervise_multiplexed(logger, pipes, &mut child, &mut capture)
    };

    let status = match supervised {
        Ok(status) => status,
        Err(err) => {
            // The child must not outlive the error.
            let _ = child.kill();
            let _ = child.wait();
            return Err(err);
        }
    };

    if !status.success() {
        let code = exit_code(status);
        logger.error(&format!("command failed (code={code}); raising"));
        return Err(JobError::CommandFailed(code));
    }
    Ok(())
}

fn spawn(logger: &dyn Logger, args: &[String], env: &Env, cwd: &str) -> Result<Child> {
    let Some((program, rest)) = args.split_first() else {
        return Err(JobError::Spec(SpecError::InvalidJobSpec(
            "cmd requires a non-empty argument list".to_owned(),
        )));
    };

    Command::new(program)
        .args(rest)
        .env_clear()
        .envs(env.iter())
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                let message = if program.contains('/') {
                    format!("command {program:?} not found (cwd: {cwd})")
                } else {
                    format!("command {program:?} not found in $PATH (cwd: {cwd})")
                };
                logger.error(&message);
                JobError::CommandNotFound(message)
            } else {
                JobError::Io {
                    path: PathBuf::from(program),
                    source: e,
                }
            }
        })
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| status.signal().map_or(-1, |signal| -signal))
}

/// Per-descriptor assembly of partial lines; a trailing unterminated
/// fragment is carried over to the next read.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn extend(&mut self, bytes: &[u8], mut emit: impl FnMut(&str)) {
        self.pending.extend_from_slice(bytes);
        while let Some(at) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=at).collect();
            emit(&String::from_utf8_lossy(&line[..line.len() - 1]));
        }
    }

    fn flush(&mut self, mut emit: impl FnMut(&str)) {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            emit(&String::from_utf8_lossy(&line));
        }
    }
}

fn take_pipe(slot: Option<impl Into<OwnedFd>>, what: &str) -> Result<File> {
    slot.map(|fd| {
        let fd: OwnedFd = fd.into();
        File::from(fd)
    })
    .ok_or_else(|| JobError::Io {
        path: PathBuf::from(what),
        source: io::Error::other("child pipe was not set up"),
    })
}

fn pipe_io(what: impl Into<PathBuf>, source: io::Error) -> JobError {
    JobError::Io {
        path: what.into(),
        source,
    }
}

fn sys_io(what: impl Into<PathBuf>, errno: Errno) -> JobError {
    JobError::Io {
        path: what.into(),
        source: errno.into(),
    }
}

// ── Simple mode ──────────────────────────────────────────────────────

struct SimpleStream {
    file: Option<File>,
    lines: LineBuffer,
    is_stdout: bool,
}

fn supervise_simple(
    logger: &dyn Logger,
    child: &mut Child,
    capture: &mut Option<&mut dyn Write>,
) -> Result<ExitStatus> {
    let stdout = take_pipe(child.stdout.take(), "stdout")?;
    let stderr = take_pipe(child.stderr.take(), "stderr")?;
    set_nonblocking(&stdout)?;
    set_nonblocking(&stderr)?;

    let mut streams = [
        SimpleStream {
            file: Some(stdout),
            lines: LineBuffer::default(),
            is_stdout: true,
        },
        SimpleStream {
            file: Some(stderr),
            lines: LineBuffer::default(),
            is_stdout: false,
        },
    ];

    let status = loop {
        thread::sleep(Duration::from_millis(u64::from(POLL_INTERVAL_MS)));
        for stream in &mut streams {
            drain_ready(logger, stream, capture)?;
        }
        if let Some(status) = child.try_wait().map_err(|e| pipe_io("child", e))? {
            // Catch anything written between the read pass and the exit.
            for stream in &mut streams {
                drain_ready(logger, stream, capture)?;
            }
            break status;
        }
    };

    for stream in &mut streams {
        if !(stream.is_stdout && capture.is_some()) {
            stream.lines.flush(|line| logger.debug(line));
        }
    }
    Ok(status)
}

fn set_nonblocking(file: &File) -> Result<()> {
    let flags = fcntl(file, FcntlArg::F_GETFL).map_err(|e| sys_io("pipe", e))?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    let _ = fcntl(file, FcntlArg::F_SETFL(flags)).map_err(|e| sys_io("pipe", e))?;
    Ok(())
}

/// Reads everything currently available from a non-blocking pipe.
fn drain_ready(
    logger: &dyn Logger,
    stream: &mut SimpleStream,
    capture: &mut Option<&mut dyn Write>,
) -> Result<()> {
    loop {
        let Some(file) = stream.file.as_mut() else {
            return Ok(());
        };
        let mut chunk = [0u8; LOG_PIPE_BUFSIZE];
        match file.read(&mut chunk) {
            Ok(0) => {
                stream.file = None;
                return Ok(());
            }
            Ok(n) => match (stream.is_stdout, capture.as_deref_mut()) {
                (true, Some(sink)) => sink
                    .write_all(&chunk[..n])
                    .map_err(|e| pipe_io("capture sink", e))?,
                _ => stream.lines.extend(&chunk[..n], |line| logger.debug(line)),
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(pipe_io("pipe", e)),
        }
    }
}

// ── Multiplexed mode ─────────────────────────────────────────────────

struct MuxStream<'a> {
    file: Option<File>,
    lines: LineBuffer,
    level: LogLevel,
    /// Sub-logger for FIFO streams; `None` routes to the main logger.
    sub: Option<Box<dyn Logger + 'a>>,
    /// FIFOs are re-opened on hangup; pipes are not.
    fifo_path: Option<PathBuf>,
    is_stdout: bool,
}

impl<'a> MuxStream<'a> {
    fn pipe(file: File, is_stdout: bool) -> Self {
        Self {
            file: Some(file),
            lines: LineBuffer::default(),
            level: LogLevel::Debug,
            sub: None,
            fifo_path: None,
            is_stdout,
        }
    }

    fn fifo(path: &Path, sub: Box<dyn Logger + 'a>, level: LogLevel) -> Result<Self> {
        Ok(Self {
            file: Some(open_fifo(path)?),
            lines: LineBuffer::default(),
            level,
            sub: Some(sub),
            fifo_path: Some(path.to_owned()),
            is_stdout: false,
        })
    }

    fn emit_lines(&mut self, logger: &dyn Logger, bytes: &[u8]) {
        let Self {
            lines, level, sub, ..
        } = self;
        match sub {
            Some(sub) => lines.extend(bytes, |line| sub.log(*level, line)),
            None => lines.extend(bytes, |line| logger.log(*level, line)),
        }
    }

    fn flush_fragment(&mut self, logger: &dyn Logger) {
        let Self {
            lines, level, sub, ..
        } = self;
        match sub {
            Some(sub) => lines.flush(|line| sub.log(*level, line)),
            None => lines.flush(|line| logger.log(*level, line)),
        }
    }
}

/// Opens a FIFO read end without waiting for a writer, then restores
/// blocking mode so all streams read uniformly.
fn open_fifo(path: &Path) -> Result<File> {
    let file = std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .map_err(|e| pipe_io(path, e))?;
    let _ = fcntl(&file, FcntlArg::F_SETFL(OFlag::empty())).map_err(|e| sys_io(path, e))?;
    Ok(file)
}

fn supervise_multiplexed<'a>(
    logger: &'a dyn Logger,
    pipes: &LogPipeRegistry,
    child: &mut Child,
    capture: &mut Option<&mut dyn Write>,
) -> Result<ExitStatus> {
    let stdout = take_pipe(child.stdout.take(), "stdout")?;
    let stderr = take_pipe(child.stderr.take(), "stderr")?;

    let mut streams: Vec<MuxStream<'a>> = vec![
        MuxStream::pipe(stdout, true),
        MuxStream::pipe(stderr, false),
    ];
    for (header, level, path) in pipes.iter() {
        streams.push(MuxStream::fifo(path, logger.sub_logger(header), level)?);
    }

    let status = loop {
        let ready = poll_ready(&streams)?;
        if ready.is_empty() {
            // No traffic: the poll wait doubles as the liveness check
            // cadence, so a quiet child is still noticed promptly.
            if let Some(status) = child.try_wait().map_err(|e| pipe_io("child", e))? {
                break status;
            }
            continue;
        }
        for (index, revents) in ready {
            handle_event(logger, &mut streams[index], revents, capture)?;
        }
    };

    for stream in &mut streams {
        if !(stream.is_stdout && capture.is_some()) {
            stream.flush_fragment(logger);
        }
        stream.file = None;
    }
    Ok(status)
}

/// Polls every open stream once and returns the indices with events.
fn poll_ready(streams: &[MuxStream<'_>]) -> Result<Vec<(usize, PollFlags)>> {
    let mut indices = Vec::with_capacity(streams.len());
    let mut fds = Vec::with_capacity(streams.len());
    for (index, stream) in streams.iter().enumerate() {
        if let Some(file) = &stream.file {
            indices.push(index);
            fds.push(PollFd::new(file.as_fd(), PollFlags::POLLIN));
        }
    }
    if fds.is_empty() {
        // Everything already hung up; emulate an idle poll tick.
        thread::sleep(Duration::from_millis(u64::from(POLL_INTERVAL_MS)));
        return Ok(Vec::new());
    }

    match poll(&mut fds, PollTimeout::from(POLL_INTERVAL_MS)) {
        Ok(_) => {}
        Err(Errno::EINTR) => return Ok(Vec::new()),
        Err(errno) => return Err(sys_io("poll", errno)),
    }

    Ok(indices
        .into_iter()
        .zip(&fds)
        .filter_map(|(index, fd)| {
            let revents = fd.revents().unwrap_or_else(PollFlags::empty);
            (!revents.is_empty()).then_some((index, revents))
        })
        .collect())
}

fn handle_event(
    logger: &dyn Logger,
    stream: &mut MuxStream<'_>,
    revents: PollFlags,
    capture: &mut Option<&mut dyn Write>,
) -> Result<()> {
    // Keep reading while HUP|IN is reported; only a bare HUP means the
    // stream is fully drained.
    if revents.contains(PollFlags::POLLHUP) && !revents.contains(PollFlags::POLLIN) {
        return hangup(logger, stream);
    }
    if revents.contains(PollFlags::POLLIN) {
        return read_chunk(logger, stream, capture);
    }
    // POLLERR/POLLNVAL: stop watching rather than spinning.
    stream.file = None;
    Ok(())
}

/// A FIFO hangs up whenever its last writer closes; re-opening the same
/// path re-arms the read end for subsequent writers. Plain pipes are
/// simply unregistered.
fn hangup(logger: &dyn Logger, stream: &mut MuxStream<'_>) -> Result<()> {
    match stream.fifo_path.clone() {
        Some(path) => {
            stream.flush_fragment(logger);
            stream.file = Some(open_fifo(&path)?);
        }
        None => stream.file = None,
    }
    Ok(())
}

fn read_chunk(
    logger: &dyn Logger,
    stream: &mut MuxStream<'_>,
    capture: &mut Option<&mut dyn Write>,
) -> Result<()> {
    let Some(file) = stream.file.as_mut() else {
        return Ok(());
    };
    let mut chunk = [0u8; LOG_PIPE_BUFSIZE];
    match file.read(&mut chunk) {
        Ok(0) => hangup(logger, stream),
        Ok(n) => {
            match (stream.is_stdout, capture.as_deref_mut()) {
                (true, Some(sink)) => sink
                    .write_all(&chunk[..n])
                    .map_err(|e| pipe_io("capture sink", e))?,
                _ => stream.emit_lines(logger, &chunk[..n]),
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
        Err(e) => Err(pipe_io("pipe", e)),
    }
}

#[cfg(test)]
mod tests {
    use hdist_common::log::MemoryLogger;

    use super::*;

    fn base_env(pwd: &str) -> Env {
        let mut env = Env::new();
        let _ = env.insert("PWD".to_owned(), pwd.to_owned());
        let _ = env.insert("PATH".to_owned(), "/usr/bin:/bin".to_owned());
        env
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".to_owned(), "-c".to_owned(), script.to_owned()]
    }

    fn empty_registry(dir: &Path) -> LogPipeRegistry {
        LogPipeRegistry::new(dir.to_owned())
    }

    #[test]
    fn stdout_and_stderr_become_debug_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = MemoryLogger::new();
        run(
            &logger,
            &empty_registry(dir.path()),
            &sh("echo out; echo err >&2"),
            &base_env("/"),
            None,
            false,
        )
        .expect("run");
        let lines = logger.lines_at(LogLevel::Debug);
        assert!(lines.iter().any(|l| l == "out"));
        assert!(lines.iter().any(|l| l == "err"));
    }

    #[test]
    fn capture_sink_receives_stdout_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = MemoryLogger::new();
        let mut sink = Vec::new();
        run(
            &logger,
            &empty_registry(dir.path()),
            &sh("echo captured; echo logged >&2"),
            &base_env("/"),
            Some(&mut sink),
            false,
        )
        .expect("run");
        assert_eq!(String::from_utf8_lossy(&sink), "captured\n");
        let lines = logger.lines_at(LogLevel::Debug);
        assert!(lines.iter().any(|l| l == "logged"));
        assert!(!lines.iter().any(|l| l == "captured"));
    }

    #[test]
    fn simple_mode_matches_the_contract() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = MemoryLogger::new();
        let mut sink = Vec::new();
        run(
            &logger,
            &empty_registry(dir.path()),
            &sh("printf 'no newline'"),
            &base_env("/"),
            Some(&mut sink),
            true,
        )
        .expect("run");
        assert_eq!(String::from_utf8_lossy(&sink), "no newline");
    }

    #[test]
    fn unterminated_fragments_are_flushed_on_exit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = MemoryLogger::new();
        run(
            &logger,
            &empty_registry(dir.path()),
            &sh("printf fragment >&2"),
            &base_env("/"),
            None,
            false,
        )
        .expect("run");
        assert!(logger.lines_at(LogLevel::Debug).contains(&"fragment".to_owned()));
    }

    #[test]
    fn nonzero_exit_is_command_failed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = MemoryLogger::new();
        let err = run(
            &logger,
            &empty_registry(dir.path()),
            &sh("exit 3"),
            &base_env("/"),
            None,
            false,
        )
        .expect_err("must fail");
        assert!(matches!(err, JobError::CommandFailed(3)));
        assert!(
            logger
                .lines_at(LogLevel::Error)
                .iter()
                .any(|l| l.contains("code=3"))
        );
    }

    #[test]
    fn absolute_path_not_found_names_the_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = MemoryLogger::new();
        let err = run(
            &logger,
            &empty_registry(dir.path()),
            &["/no/such/prog".to_owned()],
            &base_env("/"),
            None,
            false,
        )
        .expect_err("must fail");
        match err {
            JobError::CommandNotFound(message) => {
                assert!(message.contains("/no/such/prog"));
                assert!(!message.contains("$PATH"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bare_name_not_found_mentions_path_lookup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = MemoryLogger::new();
        let mut env = base_env("/");
        let _ = env.insert("PATH".to_owned(), String::new());
        let err = run(
            &logger,
            &empty_registry(dir.path()),
            &["definitely-not-a-program".to_owned()],
            &env,
            None,
            false,
        )
        .expect_err("must fail");
        match err {
            JobError::CommandNotFound(message) => assert!(message.contains("$PATH")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn simple_mode_rejects_registered_log_pipes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = MemoryLogger::new();
        let mut registry = LogPipeRegistry::new(dir.path().to_owned());
        let _ = registry.create("build", LogLevel::Info).expect("fifo");
        let err = run(
            &logger,
            &registry,
            &sh("true"),
            &base_env("/"),
            None,
            true,
        )
        .expect_err("must refuse");
        assert!(matches!(err, JobError::LogPipesUnsupported));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn fifo_lines_reach_the_sub_logger() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = MemoryLogger::new();
        let mut registry = LogPipeRegistry::new(dir.path().to_owned());
        let fifo = registry.create("build", LogLevel::Info).expect("fifo");
        let script = format!("echo first > {0}; echo second > {0}", fifo.display());
        run(
            &logger,
            &registry,
            &sh(&script),
            &base_env("/"),
            None,
            false,
        )
        .expect("run");
        let records = logger.records();
        let build: Vec<_> = records
            .iter()
            .filter(|r| r.header == "build" && r.level == LogLevel::Info)
            .map(|r| r.line.as_str())
            .collect();
        // Two separate writers exercise the hangup/re-open path.
        assert_eq!(build, vec!["first", "second"]);
    }
}
