//! Request identification and translation into gateway terms.
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - An ID supplied by the client is kept as is
//! - The gateway never sees axum types beyond `http` headers and method

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use axum::http::{HeaderValue, Request};
use percent_encoding::percent_decode_str;
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::cgi::{RequestContext, TransportKind};

/// Header carrying the correlation ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Assigns a UUID v4 to requests that arrive without an ID.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Build the gateway's view of a request.
///
/// Inside a nested router `parts.uri` is already relative to the mount. The
/// path is percent-decoded, the query string is not.
pub fn request_context(
    kind: TransportKind,
    parts: &Parts,
    local_addr: Option<SocketAddr>,
) -> RequestContext {
    let client_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let request_id = parts
        .headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    RequestContext {
        kind,
        method: parts.method.clone(),
        path: percent_decode_str(parts.uri.path())
            .decode_utf8_lossy()
            .into_owned(),
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers.clone(),
        version: parts.version,
        client_addr,
        local_addr,
        request_id,
    }
}
