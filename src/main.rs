use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use cgi_gateway::cgi::{AmbientEnv, ErrorHandler, Gateway};
use cgi_gateway::config::{load_config, validate_config, ConfigError, GatewayConfig};
use cgi_gateway::observability::{logging, metrics};
use cgi_gateway::{HttpServer, Shutdown};

#[derive(Parser)]
#[command(name = "cgi-gateway", version)]
#[command(about = "Serve CGI scripts over HTTP, WebSocket and server-sent events", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides `listener.bind_address`
    #[arg(short, long)]
    bind: Option<String>,

    /// Script directory, overrides `cgi.root`
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Per-invocation budget in seconds, overrides `cgi.timeout_secs`
    #[arg(short, long)]
    timeout: Option<f64>,

    /// Concurrent script limit, overrides `cgi.max_process`
    #[arg(short = 'n', long)]
    max_process: Option<usize>,
}

impl Cli {
    fn load(&self) -> Result<GatewayConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => GatewayConfig::default(),
        };
        if let Some(bind) = &self.bind {
            config.listener.bind_address = bind.clone();
        }
        if let Some(root) = &self.root {
            config.cgi.root = root.clone();
        }
        if let Some(timeout) = self.timeout {
            config.cgi.timeout_secs = timeout;
        }
        if let Some(max_process) = self.max_process {
            config.cgi.max_process = max_process;
        }
        validate_config(&config).map_err(ConfigError::Validation)?;
        config.cgi.root = std::fs::canonicalize(&config.cgi.root)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.load()?;

    logging::init(&config.observability.log_level);
    tracing::info!("cgi-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        root = ?config.cgi.root,
        timeout_secs = config.cgi.timeout_secs,
        max_process = config.cgi.max_process,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let gateway = Gateway::new(&config.cgi, AmbientEnv::capture(), ErrorHandler::log());

    let shutdown = Shutdown::new();
    shutdown.trigger_on_signal();

    HttpServer::new(config, gateway)
        .run(listener, shutdown.subscribe())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
