//! WebSocket endpoint.
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Gateway ←──── stdin / stdout ────→ Script
//! ```
//!
//! # Design Decisions
//! - The script is located before the upgrade so a missing script is a
//!   plain 404/403 instead of an accepted socket that closes at once
//! - Ping/pong is answered by the socket and never reaches the script
//! - A close frame or socket error from the client counts as a disconnect

use axum::{
    body::Body,
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        FromRequestParts, State,
    },
    http::Request,
    response::{IntoResponse, Response},
};
use futures_util::{future, SinkExt, StreamExt};

use crate::cgi::bridge::{Inbound, Outbound};
use crate::cgi::{Gateway, RequestContext, TransportKind};
use crate::http::request::request_context;
use crate::http::server::AppState;

pub(crate) async fn websocket_handler(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Response {
    let (mut parts, _body) = request.into_parts();
    let ctx = request_context(TransportKind::WebSocket, &parts, state.local_addr);

    if let Err(e) = state.gateway.locate(&ctx).await {
        return e.into_response();
    }

    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };
    let gateway = state.gateway.clone();
    upgrade.on_upgrade(move |socket| run_session(gateway, ctx, socket))
}

async fn run_session(gateway: Gateway, ctx: RequestContext, socket: WebSocket) {
    let (tx, rx) = socket.split();
    let sink = tx.with(|out: Outbound| future::ready(Ok::<_, axum::Error>(to_message(out))));
    let stream = rx.filter_map(|msg| future::ready(from_message(msg)));

    match gateway.serve_websocket(&ctx, sink, stream).await {
        Ok(outcome) => tracing::debug!(
            request_id = ctx.request_id.as_deref().unwrap_or("-"),
            ended_by = ?outcome.ended_by,
            close_code = ?outcome.close_code,
            "WebSocket CGI session finished"
        ),
        Err(e) => tracing::warn!(
            request_id = ctx.request_id.as_deref().unwrap_or("-"),
            path = %ctx.path,
            error = %e,
            "WebSocket CGI session failed"
        ),
    }
}

fn to_message(out: Outbound) -> Message {
    match out {
        Outbound::Text(text) => Message::Text(text.into()),
        Outbound::Binary(bytes) => Message::Binary(bytes),
        Outbound::Close { code, reason } => Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })),
    }
}

fn from_message(msg: Result<Message, axum::Error>) -> Option<Inbound> {
    match msg {
        Ok(Message::Text(text)) => Some(Inbound::Text(text.to_string())),
        Ok(Message::Binary(bytes)) => Some(Inbound::Binary(bytes)),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
        Ok(Message::Close(_)) => Some(Inbound::Disconnect),
        Err(e) => {
            tracing::debug!(error = %e, "WebSocket receive failed");
            Some(Inbound::Disconnect)
        }
    }
}
