//! Bidirectional bridge between a message transport and a script.
//!
//! # Data Flow
//! ```text
//! RUNNING (first to finish wins, the rest are cancelled):
//!     stdout lines  → Outbound::Text / Outbound::Binary
//!     Inbound frames → stdin
//!     stderr lines  → error handler
//!     process exit
//! DRAINING:
//!     stdin closed
//!     remaining stdout → client (unless the client left)
//!     wait for exit ‖ remaining stderr → error handler   (each within the budget)
//! TERMINATED:
//!     forced kill if still alive, close 1000 / 1006 unless the client left
//! ```

use std::process::ExitStatus;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::process::{ChildStderr, ChildStdout};

use crate::cgi::error::GatewayError;
use crate::cgi::gateway::Gateway;
use crate::cgi::process::{OutputPipe, ProcessIo, StdinPipe};
use crate::cgi::request::RequestContext;
use crate::cgi::stderr::ErrorHandler;
use crate::observability::metrics;

/// Close code sent when the script exits with status 0.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code sent when the script fails or is killed.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Client-to-gateway event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Binary(Bytes),
    Disconnect,
}

/// Gateway-to-client event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Binary(Bytes),
    Close { code: u16, reason: String },
}

/// Which participant ended the RUNNING phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    StdoutClosed,
    StderrClosed,
    ScriptExited,
    ClientDisconnected,
    StdinClosed,
    TransportFailed,
}

/// Summary of a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    pub ended_by: SessionEnd,
    pub exit_status: Option<ExitStatus>,
    /// Close code sent to the client, `None` when the client left first.
    pub close_code: Option<u16>,
}

impl Gateway {
    /// Drive a script for the lifetime of a message session.
    ///
    /// `sink` receives script output and the final close; `stream` yields
    /// client frames, its end counts as a disconnect.
    pub async fn serve_websocket<Tx, Rx>(
        &self,
        ctx: &RequestContext,
        mut sink: Tx,
        mut stream: Rx,
    ) -> Result<SessionOutcome, GatewayError>
    where
        Tx: Sink<Outbound> + Unpin,
        Rx: Stream<Item = Inbound> + Unpin,
    {
        let started = Instant::now();
        let _slot = self.admission().acquire().await?;
        let invocation = self.prepare(ctx).await?;
        let mut process = self
            .runner()
            .spawn(&invocation.script, &invocation.args, &invocation.env)?;
        let errors = self.error_handler();
        let budget = self.timeout();

        let ended_by = {
            let ProcessIo {
                stdin,
                stdout,
                stderr,
                exit,
            } = process.split();
            tokio::select! {
                end = forward_stdout(stdout, &mut sink) => end,
                end = forward_client(&mut stream, stdin) => end,
                end = forward_stderr(stderr, errors) => end,
                _ = exit.wait() => SessionEnd::ScriptExited,
            }
        };
        tracing::debug!(
            request_id = ctx.request_id.as_deref().unwrap_or("-"),
            script = ?invocation.script,
            ended_by = ?ended_by,
            "WebSocket CGI session draining"
        );

        let client_left = ended_by == SessionEnd::ClientDisconnected;
        let exit_status = {
            let ProcessIo {
                stdin,
                stdout,
                stderr,
                exit,
            } = process.split();
            stdin.close();

            if !client_left && ended_by != SessionEnd::TransportFailed {
                if tokio::time::timeout(budget, forward_stdout(stdout, &mut sink))
                    .await
                    .is_err()
                {
                    tracing::debug!(script = ?invocation.script, "Timed out forwarding remaining stdout");
                }
            }

            let (status, _) = tokio::join!(
                tokio::time::timeout(budget, exit.wait()),
                drain_stderr(stderr, errors, budget),
            );
            match status {
                Ok(Ok(status)) => Some(status),
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Failed waiting for CGI process");
                    exit.terminate().await.ok()
                }
                Err(_) => {
                    tracing::warn!(
                        script = ?invocation.script,
                        timeout = ?budget,
                        "CGI script still running after session end, terminating"
                    );
                    metrics::record_timeout("websocket");
                    exit.terminate().await.ok()
                }
            }
        };

        let close_code = if client_left {
            None
        } else {
            let code = match exit_status {
                Some(status) if status.success() => CLOSE_NORMAL,
                _ => CLOSE_ABNORMAL,
            };
            let close = Outbound::Close {
                code,
                reason: "script exit".to_string(),
            };
            if sink.send(close).await.is_err() {
                tracing::debug!("Client gone before close frame");
            }
            Some(code)
        };

        metrics::record_request(
            "websocket",
            close_code.unwrap_or(CLOSE_NORMAL),
            started,
        );
        Ok(SessionOutcome {
            ended_by,
            exit_status,
            close_code,
        })
    }
}

/// Forward stdout lines as text frames, or binary frames when not UTF-8.
async fn forward_stdout<Tx>(stdout: &mut OutputPipe<ChildStdout>, sink: &mut Tx) -> SessionEnd
where
    Tx: Sink<Outbound> + Unpin,
{
    loop {
        let line = match stdout.read_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return SessionEnd::StdoutClosed,
            Err(e) => {
                tracing::debug!(error = %e, "stdout read failed");
                return SessionEnd::StdoutClosed;
            }
        };
        let frame = match String::from_utf8(line.to_vec()) {
            Ok(text) => Outbound::Text(text),
            Err(_) => Outbound::Binary(line),
        };
        if sink.send(frame).await.is_err() {
            return SessionEnd::TransportFailed;
        }
    }
}

/// Write client frames to stdin, flushing after each.
async fn forward_client<Rx>(stream: &mut Rx, stdin: &mut StdinPipe) -> SessionEnd
where
    Rx: Stream<Item = Inbound> + Unpin,
{
    loop {
        let written = match stream.next().await {
            None | Some(Inbound::Disconnect) => return SessionEnd::ClientDisconnected,
            Some(Inbound::Text(text)) => stdin.write(text.as_bytes()).await,
            Some(Inbound::Binary(bytes)) => stdin.write(&bytes).await,
        };
        if let Err(e) = written {
            tracing::debug!(error = %e, "stdin write failed");
            return SessionEnd::StdinClosed;
        }
    }
}

/// Hand each stderr line to the error handler.
async fn forward_stderr(stderr: &mut OutputPipe<ChildStderr>, errors: &ErrorHandler) -> SessionEnd {
    while let Ok(Some(line)) = stderr.read_line().await {
        errors.call(line).await;
    }
    SessionEnd::StderrClosed
}

async fn drain_stderr(stderr: &mut OutputPipe<ChildStderr>, errors: &ErrorHandler, budget: Duration) {
    if tokio::time::timeout(budget, forward_stderr(stderr, errors))
        .await
        .is_err()
    {
        tracing::debug!("Timed out draining stderr");
    }
}
