//! Subprocess execution with line-by-line output streaming.
//!
//! Every external tool (`bosh`, `tar`, `sbatch`/`qsub`) runs through
//! [`run_streaming`], so output reaches the log as it is produced instead
//! of after the process exits.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// How loudly subprocess output is echoed to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    /// Log every line at `info` (pipeline runs).
    Info,
    /// Log every line at `debug` (validation and helper tools).
    Debug,
}

/// Collected result of a finished subprocess.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// Exit code, or -1 if the process was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stderr if non-empty, stdout otherwise; trimmed. Used in error messages.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Returns the program name of a command for error messages.
pub fn program_name(cmd: &Command) -> String {
    cmd.as_std().get_program().to_string_lossy().to_string()
}

/// Spawns `cmd`, drains stdout and stderr concurrently line by line, and
/// waits for it to exit.
pub async fn run_streaming(mut cmd: Command, echo: Echo) -> std::io::Result<ProcessOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Spawning {:?}", cmd.as_std());
    let mut child = cmd.spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("stderr not captured"))?;

    let mut stdout = BufReader::new(stdout);
    let mut stderr = BufReader::new(stderr);
    // Partial lines survive a cancelled `read_until` in these buffers.
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();

    let mut output = ProcessOutput::default();
    let mut stdout_done = false;
    let mut stderr_done = false;

    while !(stdout_done && stderr_done) {
        tokio::select! {
            read = stdout.read_until(b'\n', &mut stdout_buf), if !stdout_done => {
                stdout_done = consume_line(read, &mut stdout_buf, echo, "stdout", &mut output.stdout);
            }
            read = stderr.read_until(b'\n', &mut stderr_buf), if !stderr_done => {
                stderr_done = consume_line(read, &mut stderr_buf, echo, "stderr", &mut output.stderr);
            }
        }
    }

    let status = child.wait().await?;
    output.exit_code = status.code().unwrap_or(-1);
    debug!("Process exited with code {}", output.exit_code);
    Ok(output)
}

/// Logs and collects one line read into `buf`. Bytes that are not valid
/// UTF-8 are replaced rather than treated as a read error, so the stream
/// keeps being drained. Returns whether the stream is finished.
fn consume_line(
    read: std::io::Result<usize>,
    buf: &mut Vec<u8>,
    echo: Echo,
    stream: &str,
    sink: &mut String,
) -> bool {
    match read {
        Ok(0) => true,
        Ok(_) => {
            let line = String::from_utf8_lossy(buf);
            let line = line.trim_end_matches(['\n', '\r']);
            emit(echo, stream, line);
            sink.push_str(line);
            sink.push('\n');
            buf.clear();
            false
        }
        Err(e) => {
            warn!("Error reading {}: {}", stream, e);
            true
        }
    }
}

fn emit(echo: Echo, stream: &str, line: &str) {
    match echo {
        Echo::Info => info!("[{}] {}", stream, line),
        Echo::Debug => debug!("[{}] {}", stream, line),
    }
}
