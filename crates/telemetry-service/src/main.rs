//! Telemetry service
//!
//! Polls pod usage from the Kubernetes metrics API, detects resource
//! incidents and forwards them to the decision service as events.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use telemetry_lib::{
    anomaly::{CpuSpikeDetector, MemoryPressureDetector},
    collector::MetricsServerSource,
    health::HealthRegistry,
    observability::{StructuredLogger, TelemetryMetrics},
    publisher::HttpPublisher,
    scheduler::{Pipeline, Scheduler},
};
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = config::TelemetryConfig::load()?;
    config.log_summary();

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = TelemetryMetrics::new();
    let logger = StructuredLogger::new(&config.service_name);

    // Any construction failure is fatal before scheduling starts.
    let source = MetricsServerSource::new(config.metrics_server_config()?)?;
    info!(url = %source.pods_url(), "Metrics source configured");

    let publisher = HttpPublisher::new(config.publisher_config())?;
    info!(sink_url = %publisher.sink_url(), "Event publisher configured");

    let pipeline = Pipeline::builder()
        .service_name(&config.service_name)
        .source(Arc::new(source))
        .detector(Box::new(CpuSpikeDetector::new(config.cpu_threshold)?))
        .detector(Box::new(MemoryPressureDetector::new(
            config.memory_threshold_mib,
        )?))
        .publisher(Arc::new(publisher))
        .health(health_registry.clone())
        .build()?;

    let mut scheduler =
        Scheduler::new(config.scheduler_config(), pipeline)?.with_health(health_registry.clone());

    let (shutdown_tx, _) = broadcast::channel(1);
    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
    let mut api_handle = tokio::spawn(api::serve(
        config.http_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    scheduler.start().await?;
    health_registry.set_ready(true).await;
    logger.log_startup(SERVICE_VERSION, &config.environment);

    let reason = wait_for_shutdown(shutdown_signal(), &mut api_handle).await;
    logger.log_shutdown(reason.as_str());

    health_registry.set_ready(false).await;
    scheduler.stop().await;

    if let Shutdown::Signal(_) = reason {
        let _ = shutdown_tx.send(());
        report_api_exit(api_handle.await);
    }

    info!("Shutdown complete");
    match reason {
        Shutdown::Signal(_) => Ok(()),
        Shutdown::ApiExited => anyhow::bail!("API server exited unexpectedly"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shutdown {
    Signal(&'static str),
    ApiExited,
}

impl Shutdown {
    fn as_str(&self) -> &'static str {
        match self {
            Shutdown::Signal(reason) => *reason,
            Shutdown::ApiExited => "API server exited",
        }
    }
}

/// Run until a signal arrives or the API server stops on its own
async fn wait_for_shutdown(
    signal: impl Future<Output = &'static str>,
    api_handle: &mut JoinHandle<Result<()>>,
) -> Shutdown {
    tokio::select! {
        reason = signal => Shutdown::Signal(reason),
        result = api_handle => {
            report_api_exit(result);
            Shutdown::ApiExited
        }
    }
}

fn report_api_exit(result: Result<Result<()>, JoinError>) {
    match result {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task panicked"),
        Ok(Ok(())) => {}
    }
}

/// Wait for SIGINT or SIGTERM and return which one arrived
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT received",
        _ = terminate => "SIGTERM received",
    }
}
