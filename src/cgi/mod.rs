//! CGI/1.1 gateway engine.
//!
//! # Data Flow
//! ```text
//! RequestContext (from the host transport)
//!     → admission.rs (take one of `max_process` slots)
//!     → env.rs + path.rs (environment, argv, script path)
//!     → process.rs (spawn with piped stdio)
//!     → bridge/ (buffered | websocket | sse) drives IO until done,
//!       timed out or disconnected
//!     → process reaped, slot released
//! ```
//!
//! # Design Decisions
//! - Every request spawns a fresh process; nothing is pooled
//! - The admission slot and the process handle are owned by one bridge
//!   invocation and released on every exit path
//! - stderr never fails a request; it goes to the [`ErrorHandler`]

pub mod admission;
pub mod bridge;
pub mod decode;
pub mod env;
pub mod error;
pub mod gateway;
pub mod path;
pub mod process;
pub mod request;
pub mod stderr;

pub use admission::{AdmissionController, AdmissionToken};
pub use decode::ParsedResponse;
pub use env::{AmbientEnv, CgiEnvironment};
pub use error::GatewayError;
pub use gateway::{Gateway, Invocation};
pub use request::{RequestContext, TransportKind};
pub use stderr::ErrorHandler;
