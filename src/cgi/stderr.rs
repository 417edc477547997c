//! Destination for script stderr output.
//!
//! A single capability type wraps both async and blocking callbacks, so the
//! bridges never branch on the callback's shape. Blocking callbacks run on
//! Tokio's blocking pool and cannot stall a bridge.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

type Callback = dyn Fn(Bytes) -> BoxFuture<'static, ()> + Send + Sync;

/// Callback receiving stderr bytes of a CGI script.
#[derive(Clone)]
pub struct ErrorHandler {
    callback: Arc<Callback>,
}

impl ErrorHandler {
    /// Wrap an async callback.
    pub fn new<F, Fut>(callback: F) -> Self
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            callback: Arc::new(move |bytes| callback(bytes).boxed()),
        }
    }

    /// Wrap a blocking callback; each call is moved to the blocking pool.
    pub fn blocking<F>(callback: F) -> Self
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        Self::new(move |bytes| {
            let callback = Arc::clone(&callback);
            async move {
                if let Err(e) = tokio::task::spawn_blocking(move || callback(bytes)).await {
                    tracing::error!(error = %e, "stderr handler panicked");
                }
            }
        })
    }

    /// Log every chunk through `tracing`.
    pub fn log() -> Self {
        Self::new(|bytes: Bytes| async move {
            tracing::warn!(
                target: "cgi_gateway::stderr",
                stderr = %String::from_utf8_lossy(&bytes).trim_end(),
                "CGI script wrote to stderr"
            );
        })
    }

    /// Deliver `bytes` and wait for the callback to finish.
    pub async fn call(&self, bytes: Bytes) {
        (self.callback)(bytes).await
    }

    /// Deliver `bytes` on a separate task, off the caller's path.
    pub fn dispatch(&self, bytes: Bytes) {
        let handler = self.clone();
        tokio::spawn(async move { handler.call(bytes).await });
    }
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::log()
    }
}

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandler").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_async_handler() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = ErrorHandler::new(move |bytes| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(bytes);
            }
        });
        handler.dispatch(Bytes::from_static(b"oops\n"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"oops\n"));
    }

    #[tokio::test]
    async fn test_blocking_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = ErrorHandler::blocking(move |bytes| {
            sink.lock().unwrap().push(bytes);
        });
        handler.call(Bytes::from_static(b"line one")).await;
        handler.call(Bytes::from_static(b"line two")).await;
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
