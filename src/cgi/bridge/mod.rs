//! Mode bridges between a client transport and a CGI process.
//!
//! # States
//! ```text
//! SPAWNING → RUNNING → DRAINING → TERMINATED
//!     └──── timeout / cancellation ────┘
//! ```
//!
//! - buffered.rs: whole body in, whole decoded response out
//! - websocket.rs: concurrent stdout/stdin/stderr forwarding for a session
//! - sse.rs: stdout lines streamed as events

pub mod buffered;
pub mod sse;
pub mod websocket;

pub use sse::SseStream;
pub use websocket::{Inbound, Outbound, SessionEnd, SessionOutcome, CLOSE_ABNORMAL, CLOSE_NORMAL};
