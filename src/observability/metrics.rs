//! Metrics collection and exposition.
//!
//! # Metrics
//! - `cgi_requests_total` (counter): finished invocations by mode, status
//! - `cgi_request_duration_seconds` (histogram): invocation latency by mode
//! - `cgi_processes_spawned_total` (counter): scripts started
//! - `cgi_processes_active` (gauge): scripts not yet reaped
//! - `cgi_timeouts_total` (counter): budget overruns by mode
//! - `cgi_admission_wait_seconds` (histogram): time spent waiting for a slot
//!
//! For the WebSocket mode the status label carries the close code.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics recorder"),
    }
}

pub fn record_request(mode: &'static str, status: u16, started: Instant) {
    counter!("cgi_requests_total", "mode" => mode, "status" => status.to_string()).increment(1);
    histogram!("cgi_request_duration_seconds", "mode" => mode).record(started.elapsed().as_secs_f64());
}

pub fn record_spawn() {
    counter!("cgi_processes_spawned_total").increment(1);
    gauge!("cgi_processes_active").increment(1.0);
}

/// Paired with [`record_spawn`] when the process handle is dropped.
pub fn record_process_exit() {
    gauge!("cgi_processes_active").decrement(1.0);
}

pub fn record_timeout(mode: &'static str) {
    counter!("cgi_timeouts_total", "mode" => mode).increment(1);
}

pub fn record_admission_wait(started: Instant) {
    histogram!("cgi_admission_wait_seconds").record(started.elapsed().as_secs_f64());
}
