//! Subprocess lifecycle for CGI scripts.
//!
//! # Responsibilities
//! - Spawn the script with piped stdin/stdout/stderr and a clean environment
//! - Expose the three pipes as independently drivable halves
//! - Wait for, and forcibly terminate, the process
//!
//! # Design Decisions
//! - `kill_on_drop` so a dropped handle never leaves a running script
//! - `terminate` is idempotent and keeps the first recorded exit status
//! - [`CgiProcess::split`] hands out disjoint borrows so a bridge can drive
//!   stdout, stderr, stdin and the exit future concurrently

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::cgi::env::CgiEnvironment;
use crate::cgi::error::GatewayError;
use crate::observability::metrics;

/// Spawns CGI processes and counts spawn attempts.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    spawned: Arc<AtomicU64>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `program` with `args` and exactly the variables in `env`.
    pub fn spawn(
        &self,
        program: &Path,
        args: &[String],
        env: &CgiEnvironment,
    ) -> Result<CgiProcess, GatewayError> {
        self.spawned.fetch_add(1, Ordering::Relaxed);

        let spawn_error = |source: io::Error| GatewayError::Spawn {
            path: program.to_path_buf(),
            source,
        };

        let mut child = Command::new(program)
            .args(args)
            .env_clear()
            .envs(env.iter())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error(io::Error::other("stdout was not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| spawn_error(io::Error::other("stderr was not captured")))?;

        let pid = child.id();
        metrics::record_spawn();
        tracing::debug!(program = ?program, pid = ?pid, args = ?args, "CGI process spawned");

        Ok(CgiProcess {
            program: program.to_path_buf(),
            pid,
            stdin: StdinPipe { inner: stdin },
            stdout: OutputPipe::new(stdout),
            stderr: OutputPipe::new(stderr),
            exit: ExitWatch { child, status: None },
        })
    }

    /// Number of spawn attempts so far.
    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }
}

/// A running (or finished) CGI script.
#[derive(Debug)]
pub struct CgiProcess {
    program: PathBuf,
    pid: Option<u32>,
    stdin: StdinPipe,
    stdout: OutputPipe<ChildStdout>,
    stderr: OutputPipe<ChildStderr>,
    exit: ExitWatch,
}

/// Disjoint mutable views of a [`CgiProcess`].
pub struct ProcessIo<'a> {
    pub stdin: &'a mut StdinPipe,
    pub stdout: &'a mut OutputPipe<ChildStdout>,
    pub stderr: &'a mut OutputPipe<ChildStderr>,
    pub exit: &'a mut ExitWatch,
}

impl CgiProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn split(&mut self) -> ProcessIo<'_> {
        ProcessIo {
            stdin: &mut self.stdin,
            stdout: &mut self.stdout,
            stderr: &mut self.stderr,
            exit: &mut self.exit,
        }
    }

    pub async fn write_stdin(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stdin.write(bytes).await
    }

    pub fn close_stdin(&mut self) {
        self.stdin.close()
    }

    pub async fn read_stdout_line(&mut self) -> io::Result<Option<Bytes>> {
        self.stdout.read_line().await
    }

    pub async fn read_stdout_all(&mut self) -> io::Result<Bytes> {
        self.stdout.read_all().await
    }

    pub async fn read_stderr_line(&mut self) -> io::Result<Option<Bytes>> {
        self.stderr.read_line().await
    }

    pub async fn read_stderr_all(&mut self) -> io::Result<Bytes> {
        self.stderr.read_all().await
    }

    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.exit.wait().await
    }

    pub async fn terminate(&mut self) -> io::Result<ExitStatus> {
        self.exit.terminate().await
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit.status()
    }

    /// Feed `input` to stdin, close it, and collect stdout and stderr until
    /// both reach EOF, then wait for exit.
    ///
    /// The three pipes are driven together so a script that writes a lot
    /// before reading its input cannot deadlock against us.
    pub async fn communicate(&mut self, input: Option<Bytes>) -> io::Result<(Bytes, Bytes)> {
        let ProcessIo {
            stdin,
            stdout,
            stderr,
            exit,
        } = self.split();

        let feed = async {
            if let Some(input) = input {
                match stdin.write(&input).await {
                    // The script may exit without reading its input.
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
                    other => other?,
                }
            }
            stdin.close();
            Ok::<_, io::Error>(())
        };

        let (fed, out, err) = tokio::join!(feed, stdout.read_all(), stderr.read_all());
        fed?;
        let (out, err) = (out?, err?);
        exit.wait().await?;
        Ok((out, err))
    }
}

impl Drop for CgiProcess {
    fn drop(&mut self) {
        metrics::record_process_exit();
        if self.exit.status.is_none() {
            tracing::debug!(program = ?self.program, pid = ?self.pid, "Dropping unreaped CGI process");
        }
    }
}

/// Write end of the script's stdin.
#[derive(Debug)]
pub struct StdinPipe {
    inner: Option<ChildStdin>,
}

impl StdinPipe {
    /// Write all of `bytes` and flush.
    pub async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let pipe = self
            .inner
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdin already closed"))?;
        pipe.write_all(bytes).await?;
        pipe.flush().await
    }

    /// Close the pipe so the script sees EOF. Closing twice is a no-op.
    pub fn close(&mut self) {
        self.inner.take();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

/// Buffered read end of stdout or stderr.
#[derive(Debug)]
pub struct OutputPipe<R> {
    reader: BufReader<R>,
    /// Partial line kept across cancelled reads.
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> OutputPipe<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            pending: Vec::new(),
        }
    }

    /// Next line including its `\n`, the unterminated tail, or `None` at EOF.
    ///
    /// Cancel safe: bytes of a line interrupted mid-read are returned by the
    /// next call.
    pub async fn read_line(&mut self) -> io::Result<Option<Bytes>> {
        self.reader.read_until(b'\n', &mut self.pending).await?;
        if self.pending.is_empty() {
            return Ok(None);
        }
        Ok(Some(Bytes::from(std::mem::take(&mut self.pending))))
    }

    /// Everything until EOF, including any partially read line.
    pub async fn read_all(&mut self) -> io::Result<Bytes> {
        self.reader.read_to_end(&mut self.pending).await?;
        Ok(Bytes::from(std::mem::take(&mut self.pending)))
    }
}

/// Exit side of the process: waiting and termination.
#[derive(Debug)]
pub struct ExitWatch {
    child: Child,
    status: Option<ExitStatus>,
}

impl ExitWatch {
    /// Wait for the process to exit. Cancel safe.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = self.child.wait().await?;
        self.status = Some(status);
        Ok(status)
    }

    /// Kill the process if it still runs, then reap it.
    pub async fn terminate(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        if let Some(status) = self.child.try_wait()? {
            self.status = Some(status);
            return Ok(status);
        }
        if let Err(e) = self.child.start_kill() {
            // Already reaped elsewhere; the wait below reports the status.
            tracing::debug!(error = %e, "kill failed");
        }
        let status = self.child.wait().await?;
        tracing::debug!(status = %status, "CGI process terminated");
        self.status = Some(status);
        Ok(status)
    }

    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }
}
