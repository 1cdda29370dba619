//! Analysis worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vidq_queue::QueueConfig;
use vidq_worker::{JobExecutor, WorkerConfig, WorkerDeps};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("vidq=info".parse().expect("valid directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vidq-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        match PrometheusBuilder::new().with_http_listener(addr).install() {
            Ok(()) => info!("Prometheus metrics listening on {}", addr),
            Err(e) => error!("Failed to start metrics listener: {}", e),
        }
    }

    let queue_config = match QueueConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid queue configuration: {}", e);
            std::process::exit(1);
        }
    };
    let stores = match queue_config.open().await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to open job store: {}", e);
            std::process::exit(1);
        }
    };
    let pool = match vidq_analyzer::pool_from_env() {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to configure analyzer pool: {}", e);
            std::process::exit(1);
        }
    };

    let deps = WorkerDeps {
        jobs: stores.jobs,
        cache: stores.cache,
        pool,
    };
    let executor = Arc::new(JobExecutor::new(config, deps));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Received shutdown signal");
}
