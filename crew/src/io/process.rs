//! Child processes with a time limit and bounded output capture.
//!
//! Used for shell commands issued by the agents and for the model backend.
//! Both pipes are drained on reader threads so a chatty child cannot block on
//! a full pipe while we wait for it.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Time and memory bounds for one child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub timeout: Duration,
    /// Bytes kept per stream; the rest is read and dropped.
    pub output_bytes: usize,
}

/// One captured stream.
#[derive(Debug, Default)]
pub struct Stream {
    pub bytes: Vec<u8>,
    /// Bytes read past the limit.
    pub dropped: usize,
}

impl Stream {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// What a finished (or killed) child left behind.
#[derive(Debug)]
pub struct Finished {
    pub status: ExitStatus,
    pub stdout: Stream,
    pub stderr: Stream,
    /// The child outlived [`Limits::timeout`] and was killed.
    pub killed: bool,
}

impl Finished {
    /// Stdout then stderr, with a note for each truncated stream.
    pub fn transcript(&self) -> String {
        let mut text = self.stdout.text();
        note_dropped(&mut text, "stdout", self.stdout.dropped);
        let stderr = self.stderr.text();
        if !stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }
        note_dropped(&mut text, "stderr", self.stderr.dropped);
        text
    }
}

fn note_dropped(text: &mut String, stream: &str, dropped: usize) {
    if dropped > 0 {
        text.push_str(&format!("\n[{stream} truncated {dropped} bytes]\n"));
    }
}

/// Run `cmd` to completion within `limits`, feeding it `input` on stdin.
///
/// The child runs in its own process group. A group still running at the
/// timeout is killed as a whole and returned with `killed = true`; that is not
/// an error. Errors are reserved for spawn and wait failures.
#[instrument(skip_all, fields(timeout_ms = limits.timeout.as_millis() as u64))]
pub fn run_bounded(mut cmd: Command, input: Option<&[u8]>, limits: Limits) -> Result<Finished> {
    cmd.stdin(if input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn().context("spawn command")?;
    let stdout = drain(child.stdout.take(), limits.output_bytes, "stdout")?;
    let stderr = drain(child.stderr.take(), limits.output_bytes, "stderr")?;
    let writer = match input {
        Some(input) => Some(feed(&mut child, input.to_vec())?),
        None => None,
    };

    let (status, killed) = match child.wait_timeout(limits.timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_ms = limits.timeout.as_millis() as u64, "killing child after timeout");
            kill_group(&mut child)?;
            (child.wait().context("reap killed command")?, true)
        }
    };

    if let Some(writer) = writer
        && writer.join().is_err()
    {
        warn!("stdin writer thread panicked");
    }
    let finished = Finished {
        status,
        stdout: collect(stdout)?,
        stderr: collect(stderr)?,
        killed,
    };
    if finished.stdout.dropped > 0 || finished.stderr.dropped > 0 {
        debug!(
            stdout_dropped = finished.stdout.dropped,
            stderr_dropped = finished.stderr.dropped,
            "output truncated"
        );
    }
    debug!(exit_code = ?finished.status.code(), killed, "child finished");
    Ok(finished)
}

/// Kill the child and everything it started, so no grandchild keeps the pipes open.
#[cfg(unix)]
fn kill_group(child: &mut Child) -> Result<()> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pid = i32::try_from(child.id()).context("child pid out of range")?;
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(err = %e, "killpg failed, killing the child only");
            child.kill().context("kill command")
        }
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) -> Result<()> {
    child.kill().context("kill command")
}

/// Write `input` on its own thread so a child that never reads stdin cannot
/// hold up the timeout.
fn feed(child: &mut Child, input: Vec<u8>) -> Result<JoinHandle<()>> {
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("stdin was not piped"))?;
    Ok(thread::spawn(move || {
        // A child that exits early closes stdin; its exit status reports that.
        if let Err(e) = stdin.write_all(&input) {
            debug!(err = %e, "child did not read all of stdin");
        }
    }))
}

fn drain<R>(pipe: Option<R>, limit: usize, name: &str) -> Result<JoinHandle<Result<Stream>>>
where
    R: Read + Send + 'static,
{
    let pipe = pipe.ok_or_else(|| anyhow!("{name} was not piped"))?;
    Ok(thread::spawn(move || read_limited(pipe, limit)))
}

fn collect(handle: JoinHandle<Result<Stream>>) -> Result<Stream> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

fn read_limited(mut reader: impl Read, limit: usize) -> Result<Stream> {
    let mut stream = Stream::default();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read child output")?;
        if n == 0 {
            return Ok(stream);
        }
        let keep = n.min(limit.saturating_sub(stream.bytes.len()));
        stream.bytes.extend_from_slice(&chunk[..keep]);
        stream.dropped += n - keep;
    }
}
