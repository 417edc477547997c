//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with one sub-router per enabled mount
//! - Wire up middleware (tracing, timeout, request ID)
//! - Bind server to listener with client address info
//! - Stop accepting when the shutdown signal fires

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, MethodRouter},
    Router,
};
use bytes::Bytes;
use http_body_util::LengthLimitError;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::cgi::{Gateway, GatewayError, TransportKind};
use crate::config::GatewayConfig;
use crate::http::request::{request_context, MakeRequestUuid};
use crate::http::{sse, websocket};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    /// Address the listener is bound to, source of `SERVER_NAME`/`SERVER_PORT`.
    pub local_addr: Option<SocketAddr>,
    pub max_body_size: usize,
}

/// HTTP server hosting the gateway bridges.
pub struct HttpServer {
    config: GatewayConfig,
    gateway: Gateway,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: GatewayConfig, gateway: Gateway) -> Self {
        Self { config, gateway }
    }

    /// Build the Axum router with all middleware layers.
    pub fn router(&self, local_addr: Option<SocketAddr>) -> Router {
        let state = AppState {
            gateway: self.gateway.clone(),
            local_addr,
            max_body_size: self.config.limits.max_body_size,
        };

        let mounts = &self.config.mounts;
        let mut app = Router::new();
        if let Some(prefix) = &mounts.http {
            app = mount(app, prefix, scripts(any(cgi_handler)));
        }
        if let Some(prefix) = &mounts.websocket {
            app = mount(app, prefix, scripts(any(websocket::websocket_handler)));
        }
        if let Some(prefix) = &mounts.sse {
            app = mount(app, prefix, scripts(any(sse::sse_handler)));
        }

        app.with_state(state).layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    Duration::from_secs(self.config.limits.request_secs),
                )),
        )
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            mounts = ?self.config.mounts.enabled(),
            "HTTP server starting"
        );

        let app = self
            .router(Some(addr))
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

/// Routes for the mount root and every path below it.
fn scripts(handler: MethodRouter<AppState>) -> Router<AppState> {
    Router::new()
        .route("/", handler.clone())
        .route("/{*path}", handler)
}

fn mount(app: Router<AppState>, prefix: &str, routes: Router<AppState>) -> Router<AppState> {
    // Axum refuses to nest at the root.
    if prefix == "/" {
        app.merge(routes)
    } else {
        app.nest(prefix, routes)
    }
}

/// Buffered CGI handler: whole request in, decoded script output out.
async fn cgi_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let ctx = request_context(TransportKind::Http, &parts, state.local_addr);

    let body = match read_body(&parts.method, body, state.max_body_size).await {
        Ok(body) => body,
        Err(e) => return e.into_response(),
    };
    state.gateway.serve_http(&ctx, body).await
}

/// Collect the request body. Only `POST` carries one to the script.
pub(crate) async fn read_body(
    method: &Method,
    body: Body,
    limit: usize,
) -> Result<Option<Bytes>, GatewayError> {
    if method != Method::POST {
        return Ok(None);
    }
    match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if exceeds_limit(&e) => Err(GatewayError::BodyTooLarge),
        Err(e) => {
            tracing::debug!(error = %e, "Failed to read request body");
            Err(GatewayError::BodyRead(e.to_string()))
        }
    }
}

fn exceeds_limit(error: &axum::Error) -> bool {
    let mut source = std::error::Error::source(error);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgi::{AmbientEnv, ErrorHandler};
    use tower::ServiceExt;

    fn server(root: &std::path::Path, configure: impl FnOnce(&mut GatewayConfig)) -> HttpServer {
        let mut config = GatewayConfig::default();
        config.cgi.root = root.to_path_buf();
        configure(&mut config);
        let gateway = Gateway::new(&config.cgi, AmbientEnv::default(), ErrorHandler::log());
        HttpServer::new(config, gateway)
    }

    async fn get(server: &HttpServer, uri: &str) -> Response {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        server.router(None).oneshot(request).await.unwrap()
    }

    #[tokio::test]
    async fn test_mount_prefix_is_stripped() {
        let root = tempfile::tempdir().unwrap();
        let server = server(root.path(), |_| {});

        let response = get(&server, "/cgi-bin/missing.sh").await;
        assert_eq!(response.status(), 404);
        assert!(response.headers().contains_key("x-request-id"));
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"No such CGI script missing.sh");
    }

    #[tokio::test]
    async fn test_unmounted_path_never_reaches_gateway() {
        let root = tempfile::tempdir().unwrap();
        let server = server(root.path(), |_| {});

        let response = get(&server, "/elsewhere/script.sh").await;
        assert_eq!(response.status(), 404);
        assert_eq!(server.gateway().admission().in_use(), 0);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_root_mount() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("dir")).unwrap();
        let server = server(root.path(), |config| {
            config.mounts.http = Some("/".to_string());
            config.mounts.websocket = None;
            config.mounts.sse = None;
        });

        assert_eq!(get(&server, "/dir").await.status(), 403);
        assert_eq!(get(&server, "/nope.sh").await.status(), 404);
    }

    #[tokio::test]
    async fn test_read_body_only_for_post() {
        let body = read_body(&Method::GET, Body::from("ignored"), 16).await.unwrap();
        assert!(body.is_none());

        let body = read_body(&Method::POST, Body::from("payload"), 16).await.unwrap();
        assert_eq!(body.as_deref(), Some(&b"payload"[..]));
    }

    #[tokio::test]
    async fn test_read_body_limit() {
        let err = read_body(&Method::POST, Body::from(vec![b'x'; 32]), 16)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BodyTooLarge));
    }

    #[tokio::test]
    async fn test_read_body_transport_error() {
        let chunks = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"par")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let err = read_body(&Method::POST, Body::from_stream(chunks), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BodyRead(_)));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_script_hits_request_timeout() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let script = root.path().join("slow.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let server = server(root.path(), |config| {
            config.cgi.timeout_secs = 10.0;
            config.limits.request_secs = 1;
        });

        let response = get(&server, "/cgi-bin/slow.sh").await;
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }
}
