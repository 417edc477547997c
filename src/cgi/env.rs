//! CGI/1.1 environment construction.
//!
//! # Responsibilities
//! - Seed the script environment from an ambient snapshot (PATH, locale, ...)
//! - Overlay the CGI meta-variables derived from the request
//! - Derive the indexed-query command-line argument
//!
//! # Design Decisions
//! - The ambient environment is captured once and injected, never read from
//!   the live process environment per request
//! - Authorization parsing is best-effort: malformed input leaves variables
//!   unset instead of failing the request

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use axum::http::{header, Method, Version};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::cgi::path::{last_segment, parent_segment, translate_path};
use crate::cgi::request::{RequestContext, TransportKind};

/// Keys defaulted to the empty string when the request did not set them.
const FALLBACK_KEYS: [&str; 6] = [
    "QUERY_STRING",
    "REMOTE_HOST",
    "CONTENT_LENGTH",
    "HTTP_USER_AGENT",
    "HTTP_COOKIE",
    "HTTP_REFERER",
];

/// Read-only snapshot of the host environment.
#[derive(Debug, Clone, Default)]
pub struct AmbientEnv {
    vars: Arc<BTreeMap<String, String>>,
}

impl AmbientEnv {
    /// Capture the current process environment. Variables that are not
    /// valid UTF-8 are skipped.
    pub fn capture() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .collect();
        Self { vars: Arc::new(vars) }
    }

    /// An explicit snapshot, mainly for tests.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self { vars: Arc::new(vars) }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }
}

/// Environment handed to one script invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CgiEnvironment {
    vars: BTreeMap<String, String>,
}

impl CgiEnvironment {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    fn set_default(&mut self, key: &str) {
        self.vars.entry(key.to_string()).or_default();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Builds [`CgiEnvironment`]s for a fixed root and server identity.
#[derive(Debug, Clone)]
pub struct EnvironmentBuilder {
    ambient: AmbientEnv,
    root: Arc<Path>,
    server_software: String,
}

impl EnvironmentBuilder {
    pub fn new(ambient: AmbientEnv, root: impl AsRef<Path>, server_software: impl Into<String>) -> Self {
        Self {
            ambient,
            root: Arc::from(root.as_ref()),
            server_software: server_software.into(),
        }
    }

    /// Build the environment and command-line arguments for `ctx`.
    pub fn build(&self, ctx: &RequestContext) -> (CgiEnvironment, Vec<String>) {
        let mut env = CgiEnvironment {
            vars: (*self.ambient.vars).clone(),
        };
        let mut args = Vec::new();

        env.set("SERVER_SOFTWARE", self.server_software.as_str());
        if let Some(local) = ctx.local_addr {
            env.set("SERVER_NAME", local.ip().to_string());
            env.set("SERVER_PORT", local.port().to_string());
        }
        env.set("GATEWAY_INTERFACE", "CGI/1.1");
        env.set("SERVER_PROTOCOL", protocol_name(ctx.version));
        let method = match ctx.kind {
            TransportKind::Http => ctx.method.as_str(),
            TransportKind::WebSocket => Method::GET.as_str(),
        };
        env.set("REQUEST_METHOD", method);

        // The last segment of a websocket path names the channel, not a file.
        let path_info = match ctx.kind {
            TransportKind::Http => ctx.path.as_str(),
            TransportKind::WebSocket => parent_segment(&ctx.path),
        };
        env.set("PATH_INFO", path_info);
        env.set(
            "PATH_TRANSLATED",
            translate_path(&self.root, path_info).to_string_lossy(),
        );
        env.set("SCRIPT_NAME", last_segment(&ctx.path));

        if let Some(query) = ctx.query.as_deref().filter(|q| !q.is_empty()) {
            env.set("QUERY_STRING", query);
            if !query.contains('=') {
                args.push(query.to_string());
            }
        }

        if let Some(client) = ctx.client_addr {
            env.set("REMOTE_ADDR", client.ip().to_string());
        }

        if let Some(authorization) = ctx.headers.get(header::AUTHORIZATION) {
            let authorization = String::from_utf8_lossy(authorization.as_bytes());
            if let Some(auth) = parse_authorization(&authorization) {
                env.set("AUTH_TYPE", auth.auth_type);
                if let Some(user) = auth.remote_user {
                    env.set("REMOTE_USER", user);
                }
            }
        }

        for (name, value) in ctx.headers.iter() {
            env.set(
                header_env_key(name.as_str()),
                String::from_utf8_lossy(value.as_bytes()),
            );
        }

        for key in FALLBACK_KEYS {
            env.set_default(key);
        }

        (env, args)
    }
}

/// `User-Agent` → `HTTP_USER_AGENT`.
pub fn header_env_key(name: &str) -> String {
    format!("HTTP_{}", name.replace('-', "_").to_uppercase())
}

fn protocol_name(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/1.1",
    }
}

/// Parsed `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub auth_type: String,
    pub remote_user: Option<String>,
}

/// Split `<scheme> <credentials>`; for `Basic` decode `user:password`.
///
/// Returns `None` unless the header has exactly two whitespace-separated
/// tokens. A Basic payload that does not decode to ASCII `user:password`
/// yields no `remote_user`.
pub fn parse_authorization(value: &str) -> Option<Authorization> {
    let mut tokens = value.split_whitespace();
    let (scheme, credentials) = match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(scheme), Some(credentials), None) => (scheme, credentials),
        _ => return None,
    };

    let remote_user = if scheme.eq_ignore_ascii_case("basic") {
        basic_user(credentials)
    } else {
        None
    };

    Some(Authorization {
        auth_type: scheme.to_string(),
        remote_user,
    })
}

fn basic_user(credentials: &str) -> Option<String> {
    let decoded = STANDARD.decode(credentials.as_bytes()).ok()?;
    if !decoded.is_ascii() {
        return None;
    }
    let decoded = String::from_utf8(decoded).ok()?;
    let parts: Vec<&str> = decoded.split(':').collect();
    match parts.as_slice() {
        [user, _password] => Some(user.to_string()),
        _ => None,
    }
}
