//! One-shot request/response bridge.
//!
//! Body in, whole stdout out. The script output is decoded into a status,
//! headers and body before anything reaches the client, so a malformed
//! script never produces a half-written response.

use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use crate::cgi::decode::{decode, with_default_status, ParsedResponse};
use crate::cgi::error::GatewayError;
use crate::cgi::gateway::Gateway;
use crate::cgi::request::RequestContext;
use crate::observability::metrics;

/// Framing headers recomputed by the host from the decoded body.
const FRAMING_HEADERS: [&str; 2] = ["content-length", "transfer-encoding"];

impl Gateway {
    /// Run the script for `ctx` and answer with its decoded output, or with
    /// the error's status when the invocation fails.
    pub async fn serve_http(&self, ctx: &RequestContext, body: Option<Bytes>) -> Response {
        let started = Instant::now();
        let response = match self.run_buffered(ctx, body).await {
            Ok(parsed) => parsed.into_response(),
            Err(e) => {
                tracing::debug!(
                    request_id = ctx.request_id.as_deref().unwrap_or("-"),
                    path = %ctx.path,
                    error = %e,
                    "Buffered CGI request failed"
                );
                e.into_response()
            }
        };
        metrics::record_request("http", response.status().as_u16(), started);
        response
    }

    /// Admit, spawn, feed `body`, collect output within the time budget and
    /// decode it.
    pub async fn run_buffered(
        &self,
        ctx: &RequestContext,
        body: Option<Bytes>,
    ) -> Result<ParsedResponse, GatewayError> {
        let _slot = self.admission().acquire().await?;
        let invocation = self.prepare(ctx).await?;
        let mut process = self
            .runner()
            .spawn(&invocation.script, &invocation.args, &invocation.env)?;

        let budget = self.timeout();
        let (stdout, stderr) = match tokio::time::timeout(budget, process.communicate(body)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                let _ = process.terminate().await;
                return Err(e.into());
            }
            Err(_) => {
                tracing::warn!(
                    script = ?invocation.script,
                    pid = ?process.pid(),
                    timeout = ?budget,
                    "CGI script timed out, terminating"
                );
                metrics::record_timeout("http");
                let _ = process.terminate().await;
                return Err(GatewayError::Timeout(budget));
            }
        };

        if !stderr.is_empty() {
            self.error_handler().dispatch(stderr);
        }
        if let Some(status) = process.exit_status().filter(|s| !s.success()) {
            tracing::warn!(script = ?invocation.script, status = %status, "CGI script exited with failure");
        }

        decode(with_default_status(&stdout))
    }
}

impl IntoResponse for ParsedResponse {
    fn into_response(self) -> Response {
        let status = match StatusCode::from_u16(self.status) {
            Ok(status) => status,
            Err(_) => {
                return GatewayError::MalformedResponse(format!("status {}", self.status))
                    .into_response()
            }
        };

        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        for (name, value) in self.headers {
            if FRAMING_HEADERS.iter().any(|h| h.as_bytes() == name.as_ref()) {
                continue;
            }
            match (HeaderName::from_bytes(&name), HeaderValue::from_maybe_shared(value)) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => {
                    tracing::warn!(
                        header = %String::from_utf8_lossy(&name),
                        "Dropping invalid header from CGI output"
                    );
                }
            }
        }
        response
    }
}
