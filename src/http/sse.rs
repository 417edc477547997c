//! Server-sent events endpoint: one `data:` event per stdout line.

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
};
use bytes::Bytes;
use futures_util::StreamExt;

use crate::cgi::TransportKind;
use crate::http::request::request_context;
use crate::http::server::{read_body, AppState};

pub(crate) async fn sse_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let ctx = request_context(TransportKind::Http, &parts, state.local_addr);

    let body = match read_body(&parts.method, body, state.max_body_size).await {
        Ok(body) => body,
        Err(e) => return e.into_response(),
    };

    match state.gateway.serve_sse(&ctx, body).await {
        Ok(lines) => {
            let events = lines.map(|line| Ok::<_, Infallible>(line_event(&line)));
            Sse::new(events).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Event for one stdout line. A stray `\r` cannot be framed in SSE and is
/// dropped; invalid UTF-8 is replaced.
fn line_event(line: &Bytes) -> Event {
    let text = String::from_utf8_lossy(line).replace('\r', "");
    Event::default().data(text)
}
