//! Test command execution.
//!
//! Runs the synthesized command through the platform shell, forwarding output
//! chunks to an [`OutputSink`] as they arrive and parsing the captured stdout
//! once the process exits.

use crate::error::{Error, Result};
use crate::results::{parse_test_results, TestResult};
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Maximum stdout/stderr capture size per stream (10MB).
///
/// Output past the limit is still streamed to the sink but not captured.
pub const MAX_OUTPUT_SIZE: usize = 10 * 1024 * 1024;

const READ_CHUNK: usize = 8192;

/// Receives process output while it runs.
pub trait OutputSink {
    fn on_stdout(&mut self, chunk: &str);
    fn on_stderr(&mut self, chunk: &str);
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn on_stdout(&mut self, _chunk: &str) {}
    fn on_stderr(&mut self, _chunk: &str) {}
}

/// Output from running a shell command.
#[derive(Debug, Default)]
pub struct RawOutput {
    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,
    /// Captured stdout (may be truncated).
    pub stdout: String,
    /// Captured stderr (may be truncated).
    pub stderr: String,
    /// Whether stdout was truncated.
    pub stdout_truncated: bool,
    /// Whether stderr was truncated.
    pub stderr_truncated: bool,
}

impl RawOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Append `chunk` to `buf` without exceeding [`MAX_OUTPUT_SIZE`].
fn capture(buf: &mut Vec<u8>, chunk: &[u8], truncated: &mut bool) {
    let room = MAX_OUTPUT_SIZE.saturating_sub(buf.len());
    if chunk.len() > room {
        *truncated = true;
    }
    buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
}

/// Lossy UTF-8 decoding across chunk boundaries.
///
/// A multi-byte sequence cut off at the end of a chunk is held back until the
/// next chunk completes it.
#[derive(Default)]
struct Utf8Stream {
    pending: Vec<u8>,
}

impl Utf8Stream {
    fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let keep = incomplete_tail_len(&self.pending);
        let split = self.pending.len() - keep;
        let text = String::from_utf8_lossy(&self.pending[..split]).into_owned();
        self.pending.drain(..split);
        text
    }

    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Length of a truncated multi-byte sequence at the end of `buf`, or 0.
fn incomplete_tail_len(buf: &[u8]) -> usize {
    for back in 1..=buf.len().min(3) {
        let byte = buf[buf.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let needed = match byte {
            0xF0.. => 4,
            0xE0.. => 3,
            0xC0.. => 2,
            _ => 1,
        };
        return if needed > back { back } else { 0 };
    }
    0
}

fn emit(text: &str, write: impl FnOnce(&str)) {
    if !text.is_empty() {
        write(text);
    }
}

/// Run `command` in `cwd` through the platform shell.
///
/// Both streams are drained concurrently; chunk order within a stream is
/// preserved, interleaving across streams is not.
pub async fn run_shell(
    command: &str,
    cwd: &Path,
    sink: &mut dyn OutputSink,
) -> Result<RawOutput> {
    let (shell, shell_arg) = if cfg!(windows) {
        ("cmd.exe", "/C")
    } else {
        ("sh", "-c")
    };

    debug!(command, cwd = %cwd.display(), "Spawning test command");
    let start = Instant::now();

    let mut child = Command::new(shell)
        .arg(shell_arg)
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| Error::Spawn {
            command: command.to_string(),
            source,
        })?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::other("failed to capture stdout"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::other("failed to capture stderr"))?;

    let mut output = RawOutput::default();
    let mut out_bytes = Vec::new();
    let mut err_bytes = Vec::new();
    let mut out_buf = [0u8; READ_CHUNK];
    let mut err_buf = [0u8; READ_CHUNK];
    let mut out_text = Utf8Stream::default();
    let mut err_text = Utf8Stream::default();
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        tokio::select! {
            read = stdout.read(&mut out_buf), if stdout_open => match read {
                Ok(0) => stdout_open = false,
                Ok(n) => {
                    emit(&out_text.decode(&out_buf[..n]), |t| sink.on_stdout(t));
                    capture(&mut out_bytes, &out_buf[..n], &mut output.stdout_truncated);
                }
                Err(e) => {
                    warn!(error = %e, "Failed reading stdout");
                    stdout_open = false;
                }
            },
            read = stderr.read(&mut err_buf), if stderr_open => match read {
                Ok(0) => stderr_open = false,
                Ok(n) => {
                    emit(&err_text.decode(&err_buf[..n]), |t| sink.on_stderr(t));
                    capture(&mut err_bytes, &err_buf[..n], &mut output.stderr_truncated);
                }
                Err(e) => {
                    warn!(error = %e, "Failed reading stderr");
                    stderr_open = false;
                }
            },
        }
    }
    emit(&out_text.finish(), |t| sink.on_stdout(t));
    emit(&err_text.finish(), |t| sink.on_stderr(t));

    let status = child.wait().await?;
    output.exit_code = status.code().unwrap_or(-1);
    output.stdout = String::from_utf8_lossy(&out_bytes).into_owned();
    output.stderr = String::from_utf8_lossy(&err_bytes).into_owned();

    if output.stdout_truncated {
        warn!(limit = MAX_OUTPUT_SIZE, "Test command stdout truncated");
    }
    debug!(
        exit_code = output.exit_code,
        elapsed_ms = start.elapsed().as_millis() as u64,
        stdout_bytes = output.stdout.len(),
        "Test command finished"
    );

    Ok(output)
}

/// Run a test command and parse its reporter output.
///
/// A non-zero exit with empty stdout is a process failure and is not parsed.
/// Otherwise the outcome is whatever the result parser returns; a non-zero
/// exit alongside a report (failing tests) is still a successful execution.
pub async fn execute(
    command: &str,
    cwd: &Path,
    sink: &mut dyn OutputSink,
) -> Result<Vec<TestResult>> {
    let output = run_shell(command, cwd, sink).await?;

    if !output.success() && output.stdout.is_empty() {
        return Err(Error::ProcessFailed {
            code: output.exit_code,
            stderr: output.stderr,
        });
    }

    parse_test_results(&output.stdout)
}
