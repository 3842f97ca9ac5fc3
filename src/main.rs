//! Backup operator entry point
//!
//! Launches recurring backup Jobs from BackupSchedule resources.

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use backup_operator::config::{Config, MissedRunPolicy};
use backup_operator::controller::Controller;
use backup_operator::metrics;

#[derive(Parser, Debug)]
#[command(name = "backup-operator")]
#[command(about = "Kubernetes operator for cron-scheduled database backups")]
struct Args {
    /// Namespace to watch (empty for all namespaces)
    #[arg(short, long, default_value = "")]
    namespace: String,

    /// Metrics server port
    #[arg(short, long, default_value = "8080")]
    metrics_port: u16,

    /// Health check port
    #[arg(short = 'H', long, default_value = "8081")]
    health_port: u16,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Runner image for schedules with explicit backup targets
    #[arg(long, default_value = "ghcr.io/backup-operator/runner:latest")]
    runner_image: String,

    /// Annotation key recording each run's fire time
    #[arg(long, default_value = "backups.io/scheduled-at")]
    scheduled_at_annotation: String,

    /// How to handle fire times that passed without producing a run
    #[arg(long, value_enum, default_value = "catch-up")]
    catch_up: MissedRunPolicy,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting backup operator");
    info!(namespace = %args.namespace, "Watching namespace");

    let config = Config {
        runner_image: args.runner_image,
        scheduled_at_annotation: args.scheduled_at_annotation,
        missed_run_policy: args.catch_up,
    };

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::run_metrics_server(args.metrics_port));

    // Start health server
    let health_handle = tokio::spawn(run_health_server(args.health_port));

    let controller = Controller::new(args.namespace, config).await?;
    let controller_handle = tokio::spawn(async move {
        if let Err(e) = controller.run().await {
            error!(error = %e, "Controller error");
        }
    });

    info!("Controller started");

    tokio::select! {
        _ = controller_handle => info!("Controller stopped"),
        _ = metrics_handle => info!("Metrics server stopped"),
        _ = health_handle => info!("Health server stopped"),
    }

    Ok(())
}

async fn run_health_server(port: u16) {
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await.unwrap();
    info!(port = %port, "Health server started");

    loop {
        if let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;

                let response = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nOK";
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    }
}
