//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the CGI gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// CGI engine settings.
    pub cgi: CgiConfig,

    /// URL prefixes the bridges are mounted on.
    pub mounts: MountConfig,

    /// Request limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
        }
    }
}

/// CGI engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CgiConfig {
    /// Directory scripts are resolved against.
    pub root: PathBuf,

    /// Per-invocation budget in seconds. Kept short: CGI scripts are
    /// expected to answer quickly.
    pub timeout_secs: f64,

    /// Maximum number of concurrently running scripts.
    pub max_process: usize,

    /// Value of `SERVER_SOFTWARE`.
    pub server_software: String,
}

impl Default for CgiConfig {
    fn default() -> Self {
        Self {
            root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            timeout_secs: 1.0,
            max_process: 10,
            server_software: format!("cgi-gateway/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Mount points; `None` disables a bridge.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MountConfig {
    /// Buffered request/response bridge.
    pub http: Option<String>,

    /// WebSocket bridge.
    pub websocket: Option<String>,

    /// Server-sent events bridge.
    pub sse: Option<String>,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            http: Some("/cgi-bin".to_string()),
            websocket: Some("/ws".to_string()),
            sse: Some("/sse".to_string()),
        }
    }
}

impl MountConfig {
    /// Enabled mounts as `(name, prefix)` pairs.
    pub fn enabled(&self) -> Vec<(&'static str, &str)> {
        [
            ("http", self.http.as_deref()),
            ("websocket", self.websocket.as_deref()),
            ("sse", self.sse.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, prefix)| prefix.map(|p| (name, p)))
        .collect()
    }
}

/// Request limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum POST body size in bytes.
    pub max_body_size: usize,

    /// Time allowed to produce response headers, in seconds.
    pub request_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
            request_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.cgi.timeout_secs, 1.0);
        assert_eq!(config.cgi.max_process, 10);
        assert_eq!(config.mounts.enabled().len(), 3);
        assert!(config.cgi.server_software.starts_with("cgi-gateway/"));
    }

    #[test]
    fn test_partial_toml() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [cgi]
            root = "/srv/cgi"
            max_process = 4

            [mounts]
            websocket = "/chat"
            "#,
        )
        .unwrap();
        assert_eq!(config.cgi.root, PathBuf::from("/srv/cgi"));
        assert_eq!(config.cgi.max_process, 4);
        assert_eq!(config.cgi.timeout_secs, 1.0);
        assert_eq!(config.mounts.websocket.as_deref(), Some("/chat"));
        assert_eq!(config.mounts.http.as_deref(), Some("/cgi-bin"));
    }
}
