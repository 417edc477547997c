//! Request metadata handed to the gateway by the host transport.

use std::net::SocketAddr;

use axum::http::{HeaderMap, Method, Version};

/// Which bridge family the request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Http,
    WebSocket,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Http => "http",
            TransportKind::WebSocket => "websocket",
        }
    }
}

/// Immutable view of one inbound request.
///
/// `path` is relative to the mount point and starts with `/`. `query` is the
/// raw (still percent-encoded) query string without the leading `?`.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub kind: TransportKind,
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub version: Version,
    pub client_addr: Option<SocketAddr>,
    pub local_addr: Option<SocketAddr>,
    /// Correlation id for logs, when the host assigned one.
    pub request_id: Option<String>,
}

impl RequestContext {
    /// A bare `GET` context for `path`.
    pub fn new(kind: TransportKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            method: Method::GET,
            path: path.into(),
            query: None,
            headers: HeaderMap::new(),
            version: Version::HTTP_11,
            client_addr: None,
            local_addr: None,
            request_id: None,
        }
    }

    /// Last path segment, used in client-facing error messages.
    pub fn script_name(&self) -> &str {
        crate::cgi::path::last_segment(&self.path)
    }
}
