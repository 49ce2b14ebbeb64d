//! Polling scheduler
//!
//! Drives the pipeline on a fixed interval from a single background task.
//! Cycles never overlap: ticks that fire while a cycle is running are
//! dropped, not queued. Stopping waits for the current cycle to finish.

mod pipeline;

#[cfg(test)]
mod tests;

pub use pipeline::{CycleReport, Pipeline, PipelineBuilder};

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{ConfigError, SchedulerError};
use crate::health::{components, HealthRegistry};
use crate::observability::TelemetryMetrics;

/// Default poll interval (30 seconds)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between cycle starts
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// Owns the pipeline and the background task that runs it
pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    config: SchedulerConfig,
    health: Option<HealthRegistry>,
    metrics: TelemetryMetrics,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, pipeline: Pipeline) -> Result<Self, ConfigError> {
        if config.poll_interval.is_zero() {
            return Err(ConfigError::InvalidPollInterval);
        }

        Ok(Self {
            pipeline: Arc::new(pipeline),
            config,
            health: None,
            metrics: TelemetryMetrics::new(),
            cancel: CancellationToken::new(),
            handle: None,
        })
    }

    /// Report scheduler liveness to a health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn state(&self) -> SchedulerState {
        if self.handle.is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    /// Spawn the background task. The first cycle runs one interval after start.
    pub async fn start(&mut self) -> Result<(), SchedulerError> {
        if self.handle.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        info!(
            interval_secs = self.config.poll_interval.as_secs_f64(),
            sources = ?self.pipeline.source_names(),
            detectors = ?self.pipeline.detector_names(),
            "Starting scheduler"
        );

        self.cancel = CancellationToken::new();
        let pipeline = Arc::clone(&self.pipeline);
        let cancel = self.cancel.clone();
        let period = self.config.poll_interval;
        self.handle = Some(runtime.spawn(run(pipeline, period, cancel)));

        self.metrics.set_scheduler_running(true);
        if let Some(health) = &self.health {
            health.set_healthy(components::SCHEDULER).await;
        }
        Ok(())
    }

    /// Cancel the background task and wait for it to exit. An in-flight
    /// cycle completes first. Calling this while stopped is a no-op.
    pub async fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        info!("Stopping scheduler");
        self.cancel.cancel();
        if let Err(e) = handle.await {
            warn!(error = %e, "Scheduler task ended abnormally");
        }

        self.metrics.set_scheduler_running(false);
        if let Some(health) = &self.health {
            health
                .set_unhealthy(components::SCHEDULER, "Scheduler stopped")
                .await;
        }
        info!("Scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Without an explicit stop the task is told to exit at its next wakeup.
        self.cancel.cancel();
    }
}

async fn run(pipeline: Arc<Pipeline>, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                pipeline.run_cycle(&cancel).await;
            }
        }
    }
}
