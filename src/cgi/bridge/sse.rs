//! Unidirectional bridge: stdout lines become server-sent events.
//!
//! The request body (POST only) is written up front and stdin closed; after
//! that traffic flows from the script to the client only. When stdout ends,
//! or the client goes away and the stream is dropped, stderr is drained and
//! the process reaped within the time budget.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use futures_util::Stream;

use crate::cgi::admission::AdmissionToken;
use crate::cgi::error::GatewayError;
use crate::cgi::gateway::Gateway;
use crate::cgi::process::{CgiProcess, ProcessIo};
use crate::cgi::request::RequestContext;
use crate::cgi::stderr::ErrorHandler;
use crate::observability::metrics;

impl Gateway {
    /// Spawn the script for `ctx` and stream its stdout line by line.
    pub async fn serve_sse(
        &self,
        ctx: &RequestContext,
        body: Option<Bytes>,
    ) -> Result<SseStream, GatewayError> {
        let started = Instant::now();
        let slot = self.admission().acquire().await?;
        let invocation = self.prepare(ctx).await?;
        let mut process = self
            .runner()
            .spawn(&invocation.script, &invocation.args, &invocation.env)?;

        if let Some(body) = body {
            let budget = self.timeout();
            match tokio::time::timeout(budget, process.write_stdin(&body)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => {
                    let _ = process.terminate().await;
                    return Err(e.into());
                }
                Err(_) => {
                    metrics::record_timeout("sse");
                    let _ = process.terminate().await;
                    return Err(GatewayError::Timeout(budget));
                }
            }
        }
        process.close_stdin();

        let session = SseSession {
            live: Some(LiveProcess {
                process,
                _slot: slot,
                budget: self.timeout(),
                errors: self.error_handler().clone(),
                started,
            }),
        };
        Ok(SseStream::new(session))
    }
}

/// Stdout lines of a running script, line terminators removed.
pub struct SseStream {
    inner: BoxStream<'static, Bytes>,
}

impl SseStream {
    fn new(session: SseSession) -> Self {
        let inner = stream::unfold(session, |mut session| async move {
            let line = session.next_line().await?;
            Some((line, session))
        });
        Self {
            inner: Box::pin(inner),
        }
    }
}

impl Stream for SseStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        self.inner.as_mut().poll_next(cx)
    }
}

struct SseSession {
    live: Option<LiveProcess>,
}

struct LiveProcess {
    process: CgiProcess,
    _slot: AdmissionToken,
    budget: Duration,
    errors: ErrorHandler,
    started: Instant,
}

impl SseSession {
    async fn next_line(&mut self) -> Option<Bytes> {
        let live = self.live.as_mut()?;
        match live.process.read_stdout_line().await {
            Ok(Some(line)) => Some(strip_line_ending(line)),
            Ok(None) => {
                self.finish().await;
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, "stdout read failed");
                self.finish().await;
                None
            }
        }
    }

    async fn finish(&mut self) {
        if let Some(live) = self.live.take() {
            live.finish().await;
        }
    }
}

impl Drop for SseSession {
    fn drop(&mut self) {
        // Client went away mid-stream: reap in the background.
        if let Some(live) = self.live.take() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(live.finish());
            }
        }
    }
}

impl LiveProcess {
    async fn finish(mut self) {
        let program = self.process.program().to_path_buf();
        let ProcessIo { stderr, exit, .. } = self.process.split();

        match tokio::time::timeout(self.budget, stderr.read_all()).await {
            Ok(Ok(bytes)) if !bytes.is_empty() => self.errors.dispatch(bytes),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "stderr read failed"),
            Err(_) => tracing::debug!("Timed out draining stderr"),
        }

        match tokio::time::timeout(self.budget, exit.wait()).await {
            Ok(Ok(status)) if !status.success() => {
                tracing::warn!(program = ?program, status = %status, "CGI script exited with failure");
            }
            Ok(Ok(_)) => {}
            Ok(Err(_)) | Err(_) => {
                tracing::warn!(
                    program = ?program,
                    timeout = ?self.budget,
                    "CGI script still running after stream end, terminating"
                );
                metrics::record_timeout("sse");
                let _ = exit.terminate().await;
            }
        }
        metrics::record_request("sse", 200, self.started);
    }
}

/// Remove a trailing `\n` or `\r\n`.
fn strip_line_ending(mut line: Bytes) -> Bytes {
    if line.ends_with(b"\n") {
        line.truncate(line.len() - 1);
        if line.ends_with(b"\r") {
            line.truncate(line.len() - 1);
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_line_ending() {
        assert_eq!(strip_line_ending(Bytes::from_static(b"data\r\n")).as_ref(), b"data");
        assert_eq!(strip_line_ending(Bytes::from_static(b"data\n")).as_ref(), b"data");
        assert_eq!(strip_line_ending(Bytes::from_static(b"tail")).as_ref(), b"tail");
        assert_eq!(strip_line_ending(Bytes::from_static(b"\n")).as_ref(), b"");
    }
}
