//! HTTP host for the gateway.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, mounts, timeout/trace/request-id layers)
//!     → request.rs (request ID, RequestContext from request parts)
//!     → buffered handler | websocket.rs | sse.rs
//!     → Gateway bridge
//!     → Send to client
//! ```

pub mod request;
pub mod server;
pub mod sse;
pub mod websocket;

pub use request::{request_context, MakeRequestUuid, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
