//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use cgi_gateway::cgi::{AmbientEnv, ErrorHandler, Gateway};
use cgi_gateway::config::GatewayConfig;
use cgi_gateway::{HttpServer, Shutdown};

/// Write an executable `/bin/sh` script into `root`.
pub fn write_script(root: &Path, name: &str, body: &str) -> PathBuf {
    let path = root.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Defaults with `root` as script directory.
pub fn test_config(root: &Path) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.cgi.root = root.to_path_buf();
    config.cgi.timeout_secs = 2.0;
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config
}

/// Error handler that forwards every stderr chunk into a channel.
pub fn capture_stderr() -> (ErrorHandler, mpsc::UnboundedReceiver<Bytes>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = ErrorHandler::new(move |bytes: Bytes| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(bytes);
        }
    });
    (handler, rx)
}

/// A gateway served on an ephemeral port; stops when dropped.
pub struct TestServer {
    pub addr: SocketAddr,
    pub gateway: Gateway,
    shutdown: Shutdown,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_server(config: GatewayConfig, errors: ErrorHandler) -> TestServer {
    let gateway = Gateway::new(&config.cgi, AmbientEnv::capture(), errors);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, gateway.clone());
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    TestServer {
        addr,
        gateway,
        shutdown,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}
