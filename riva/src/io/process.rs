//! Child process execution with a timeout and bounded output capture.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Exit code, or `None` when the process was killed (timeout or signal).
    pub fn exit_code(&self) -> Option<i32> {
        if self.timed_out {
            return None;
        }
        self.status.code()
    }

    /// Stdout as text, with a trailing note when bytes were discarded.
    pub fn stdout_text(&self) -> String {
        with_truncation_note(&self.stdout, self.stdout_truncated)
    }

    /// Stderr as text, with a trailing note when bytes were discarded.
    pub fn stderr_text(&self) -> String {
        with_truncation_note(&self.stderr, self.stderr_truncated)
    }
}

fn with_truncation_note(bytes: &[u8], truncated: usize) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if truncated > 0 {
        text.push_str(&format!("\n[truncated {truncated} bytes]\n"));
    }
    text
}

/// How long readers may keep draining once the process tree has been killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

type StreamResult = Result<(Vec<u8>, usize)>;

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read on helper threads while the child runs, and stdin is fed from another
/// one. `output_limit_bytes` bounds the bytes kept per stream; the rest is drained and
/// counted. On unix the child leads its own process group; on timeout the whole group is
/// killed and `timed_out` is set. Descendants that keep the pipes open past the timeout
/// are killed too, so the call never outlives `timeout` by more than a short grace period.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64, output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let (tx, rx) = mpsc::channel();
    spawn_reader(Stream::Stdout, stdout, output_limit_bytes, tx.clone());
    spawn_reader(Stream::Stderr, stderr, output_limit_bytes, tx);

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        let input = input.to_vec();
        // Detached: a child that never reads blocks this writer until the child dies.
        thread::spawn(move || {
            if let Err(e) = child_stdin.write_all(&input) {
                warn!(err = %e, "child closed stdin early");
            }
        });
    }

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(timeout_ms = timeout.as_millis() as u64, "command timed out, killing");
            timed_out = true;
            kill_tree(&mut child);
            child.wait().context("wait command after kill")?
        }
    };

    let mut outputs = Outputs::default();
    let drain = if timed_out {
        DRAIN_GRACE
    } else {
        timeout.saturating_sub(started.elapsed()).max(DRAIN_GRACE)
    };
    outputs.collect(&rx, drain);
    if !outputs.complete() {
        // Descendants still hold the pipes open after the child exited.
        warn!("output pipes still open after exit, killing process group");
        kill_group(child.id());
        outputs.collect(&rx, DRAIN_GRACE);
    }
    let (stdout, stdout_truncated) = outputs.take(Stream::Stdout)?;
    let (stderr, stderr_truncated) = outputs.take(Stream::Stderr)?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn spawn_reader<R: Read + Send + 'static>(
    stream: Stream,
    reader: R,
    limit: usize,
    tx: mpsc::Sender<(Stream, StreamResult)>,
) {
    thread::spawn(move || {
        let result = read_stream_limited(reader, limit);
        // The receiver is gone only when the caller stopped waiting.
        let _ = tx.send((stream, result));
    });
}

/// Stream results gathered from the reader threads.
#[derive(Default)]
struct Outputs {
    stdout: Option<StreamResult>,
    stderr: Option<StreamResult>,
}

impl Outputs {
    fn complete(&self) -> bool {
        self.stdout.is_some() && self.stderr.is_some()
    }

    /// Receive reader results until both arrived or `wait` has passed.
    fn collect(&mut self, rx: &mpsc::Receiver<(Stream, StreamResult)>, wait: Duration) {
        let deadline = Instant::now().checked_add(wait);
        while !self.complete() {
            let left = deadline.map_or(wait, |d| d.saturating_duration_since(Instant::now()));
            match rx.recv_timeout(left) {
                Ok((Stream::Stdout, result)) => self.stdout = Some(result),
                Ok((Stream::Stderr, result)) => self.stderr = Some(result),
                Err(_) => break,
            }
        }
    }

    /// Captured bytes for `stream`; empty when its reader never finished.
    fn take(&mut self, stream: Stream) -> Result<(Vec<u8>, usize)> {
        let slot = match stream {
            Stream::Stdout => self.stdout.take(),
            Stream::Stderr => self.stderr.take(),
        };
        match slot {
            Some(result) => result.with_context(|| format!("read {stream:?}")),
            None => {
                warn!(?stream, "reader did not finish, output dropped");
                Ok((Vec::new(), 0))
            }
        }
    }
}

/// Kill the child and, on unix, every process in its group.
fn kill_tree(child: &mut Child) {
    kill_group(child.id());
    if let Err(e) = child.kill() {
        debug!(err = %e, "child already gone");
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        warn!(pid, "pid out of range, cannot signal process group");
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        debug!(err = %e, "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        let keep = n.min(remaining);
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }

    Ok((buf, truncated))
}
