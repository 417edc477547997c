//! CGI/1.1 gateway.
//!
//! Runs executable scripts under a root directory for each request and
//! bridges their stdio to one of three client transports:
//!
//! ```text
//!                    ┌──────────────────────────────────────────────┐
//!   HTTP request ───▶│ http::server ──▶ cgi::Gateway                 │
//!                    │   /cgi-bin  ──▶ bridge::buffered ─┐            │
//!   WebSocket ◀─────▶│   /ws       ──▶ bridge::websocket ├─▶ process ─┼──▶ script
//!   SSE stream ◀─────│   /sse      ──▶ bridge::sse ──────┘            │
//!                    │                                                │
//!                    │  admission · env · path · decode · stderr      │
//!                    │  config · observability · lifecycle            │
//!                    └──────────────────────────────────────────────┘
//! ```

pub mod cgi;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use cgi::Gateway;
pub use config::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
