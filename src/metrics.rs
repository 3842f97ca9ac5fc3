//! Prometheus metrics for the backup operator

use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::info;

lazy_static::lazy_static! {
    /// Total reconciliations
    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "backup_operator_reconciliations_total",
        "Total number of reconciliations",
        &["schedule", "result"]
    ).unwrap();

    /// Reconciliation duration
    pub static ref RECONCILE_DURATION: HistogramVec = register_histogram_vec!(
        "backup_operator_reconcile_duration_seconds",
        "Duration of reconciliations",
        &["schedule"]
    ).unwrap();
}

/// Run the metrics server
pub async fn run_metrics_server(port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await.unwrap();
    info!(port = %port, "Metrics server started");

    loop {
        if let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;

                let encoder = TextEncoder::new();
                let metric_families = prometheus::gather();
                let metrics = encoder.encode_to_string(&metric_families).unwrap_or_default();

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
                    metrics.len(),
                    metrics
                );
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    }
}

/// Record a successful reconcile cycle
pub fn record_cycle_success(schedule: &str, duration_secs: f64) {
    RECONCILIATIONS
        .with_label_values(&[schedule, "success"])
        .inc();
    RECONCILE_DURATION
        .with_label_values(&[schedule])
        .observe(duration_secs);
}

/// Record a failed reconcile cycle
pub fn record_cycle_failure(schedule: &str, duration_secs: f64) {
    RECONCILIATIONS
        .with_label_values(&[schedule, "failure"])
        .inc();
    RECONCILE_DURATION
        .with_label_values(&[schedule])
        .observe(duration_secs);
}
