//! The gateway engine shared by all bridges.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cgi::admission::AdmissionController;
use crate::cgi::env::{AmbientEnv, CgiEnvironment, EnvironmentBuilder};
use crate::cgi::error::GatewayError;
use crate::cgi::path::translate_path;
use crate::cgi::process::ProcessRunner;
use crate::cgi::request::RequestContext;
use crate::cgi::stderr::ErrorHandler;
use crate::config::CgiConfig;

/// Everything needed to start one script.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub script: PathBuf,
    pub env: CgiEnvironment,
    pub args: Vec<String>,
}

/// CGI engine: resolves scripts, builds environments, runs processes.
///
/// Cheap to clone; clones share the admission gate and spawn counter.
#[derive(Clone, Debug)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

#[derive(Debug)]
struct GatewayInner {
    root: PathBuf,
    timeout: Duration,
    env: EnvironmentBuilder,
    runner: ProcessRunner,
    admission: AdmissionController,
    errors: ErrorHandler,
}

impl Gateway {
    pub fn new(config: &CgiConfig, ambient: AmbientEnv, errors: ErrorHandler) -> Self {
        let root = config.root.clone();
        tracing::info!(
            root = ?root,
            timeout_secs = config.timeout_secs,
            max_process = config.max_process,
            "CGI gateway initialized"
        );
        Self {
            inner: Arc::new(GatewayInner {
                env: EnvironmentBuilder::new(ambient, &root, config.server_software.clone()),
                root,
                timeout: Duration::from_secs_f64(config.timeout_secs),
                runner: ProcessRunner::new(),
                admission: AdmissionController::new(config.max_process),
                errors,
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Per-invocation time budget.
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.inner.runner
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.inner.admission
    }

    pub fn error_handler(&self) -> &ErrorHandler {
        &self.inner.errors
    }

    /// Resolve the script for `ctx` and check it is a regular file.
    pub async fn locate(&self, ctx: &RequestContext) -> Result<PathBuf, GatewayError> {
        let script = translate_path(&self.inner.root, &ctx.path);
        match tokio::fs::metadata(&script).await {
            Err(_) => Err(GatewayError::ScriptNotFound(ctx.script_name().to_string())),
            Ok(meta) if !meta.is_file() => {
                Err(GatewayError::NotRegularFile(ctx.script_name().to_string()))
            }
            Ok(_) => Ok(script),
        }
    }

    /// Build the environment and locate the script for `ctx`.
    pub async fn prepare(&self, ctx: &RequestContext) -> Result<Invocation, GatewayError> {
        let (env, args) = self.inner.env.build(ctx);
        let script = self.locate(ctx).await?;
        Ok(Invocation { script, env, args })
    }
}
