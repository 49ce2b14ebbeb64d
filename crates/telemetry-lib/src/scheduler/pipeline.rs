//! One collect -> aggregate -> detect -> publish pass

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregator::aggregate;
use crate::anomaly::Detector;
use crate::collector::MetricSource;
use crate::error::ConfigError;
use crate::health::{components, HealthRegistry};
use crate::observability::{StructuredLogger, TelemetryMetrics};
use crate::publisher::EventPublisher;

/// What happened during one cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub metrics_collected: usize,
    pub source_errors: usize,
    pub signals_detected: usize,
    pub events_published: usize,
    pub publish_failures: usize,
    pub elapsed: Duration,
}

impl CycleReport {
    /// True when the cycle ended early because nothing was collected
    pub fn is_empty(&self) -> bool {
        self.metrics_collected == 0
    }
}

/// Fixed set of sources, detectors and a publisher, run sequentially in
/// registration order.
pub struct Pipeline {
    sources: Vec<Arc<dyn MetricSource>>,
    detectors: Vec<Box<dyn Detector>>,
    publisher: Arc<dyn EventPublisher>,
    health: Option<HealthRegistry>,
    metrics: TelemetryMetrics,
    logger: StructuredLogger,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn detector_names(&self) -> Vec<&str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Run one cycle. Failures are logged and counted, never returned.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let start = Instant::now();
        let mut report = CycleReport::default();
        debug!("Executing cycle");

        let mut collected = Vec::new();
        for source in &self.sources {
            match source.collect(cancel).await {
                Ok(metrics) => {
                    debug!(source = source.name(), count = metrics.len(), "Collected metrics");
                    collected.extend(metrics);
                }
                Err(e) if cancel.is_cancelled() => {
                    // Shutdown, not a source failure
                    debug!(source = source.name(), error = %e, "Collection interrupted");
                }
                Err(e) => {
                    report.source_errors += 1;
                    self.metrics.inc_collection_errors(source.name());
                    warn!(source = source.name(), error = %e, "Failed to collect metrics");
                }
            }
        }
        report.metrics_collected = collected.len();
        self.metrics.add_metrics_collected(collected.len());
        self.report_collection_health(&report).await;

        if collected.is_empty() {
            info!("No metrics collected in this cycle");
            self.metrics.inc_empty_cycles();
            return self.finish(report, start);
        }

        let input = aggregate(&collected);

        for detector in &self.detectors {
            let Some(signal) = detector.detect(&input) else {
                continue;
            };
            report.signals_detected += 1;
            self.metrics.inc_signals_detected(&signal);
            self.logger.log_signal(detector.name(), &signal);

            match self.publisher.publish(&signal).await {
                Ok(outcome) => {
                    report.events_published += 1;
                    self.metrics.inc_events_published();
                    self.logger
                        .log_published(detector.name(), &signal, &outcome.event_id);
                    if let Some(decision) = &outcome.decision {
                        self.logger.log_decision(&outcome.event_id, decision);
                    }
                }
                Err(e) => {
                    report.publish_failures += 1;
                    self.metrics.inc_publish_errors(&e);
                    self.logger.log_publish_failure(detector.name(), &signal, &e);
                }
            }
        }
        self.report_publish_health(&report).await;

        self.finish(report, start)
    }

    fn finish(&self, mut report: CycleReport, start: Instant) -> CycleReport {
        report.elapsed = start.elapsed();
        self.metrics.observe_cycle(report.elapsed.as_secs_f64());
        info!(
            metrics = report.metrics_collected,
            source_errors = report.source_errors,
            signals = report.signals_detected,
            published = report.events_published,
            publish_failures = report.publish_failures,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Cycle completed"
        );
        report
    }

    async fn report_collection_health(&self, report: &CycleReport) {
        let Some(health) = &self.health else { return };
        if report.source_errors == 0 {
            health.set_healthy(components::COLLECTOR).await;
        } else {
            health
                .set_degraded(
                    components::COLLECTOR,
                    format!(
                        "{} of {} sources failed",
                        report.source_errors,
                        self.sources.len()
                    ),
                )
                .await;
        }
    }

    async fn report_publish_health(&self, report: &CycleReport) {
        let Some(health) = &self.health else { return };
        if report.publish_failures == 0 {
            health.set_healthy(components::PUBLISHER).await;
        } else {
            health
                .set_degraded(
                    components::PUBLISHER,
                    format!(
                        "{} of {} publishes failed",
                        report.publish_failures, report.signals_detected
                    ),
                )
                .await;
        }
    }
}

/// Builder for [`Pipeline`]
pub struct PipelineBuilder {
    sources: Vec<Arc<dyn MetricSource>>,
    detectors: Vec<Box<dyn Detector>>,
    publisher: Option<Arc<dyn EventPublisher>>,
    health: Option<HealthRegistry>,
    service_name: String,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            detectors: Vec::new(),
            publisher: None,
            health: None,
            service_name: "telemetry-service".to_string(),
        }
    }

    pub fn source(mut self, source: Arc<dyn MetricSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Detectors run in the order they are added
    pub fn detector(mut self, detector: Box<dyn Detector>) -> Self {
        self.detectors.push(detector);
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn build(self) -> Result<Pipeline, ConfigError> {
        let publisher = self.publisher.ok_or(ConfigError::Missing("publisher"))?;
        if self.sources.is_empty() {
            return Err(ConfigError::Missing("metric source"));
        }

        Ok(Pipeline {
            sources: self.sources,
            detectors: self.detectors,
            publisher,
            health: self.health,
            metrics: TelemetryMetrics::new(),
            logger: StructuredLogger::new(self.service_name),
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
