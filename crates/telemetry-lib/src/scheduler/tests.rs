//! Tests for the pipeline cycle and scheduler lifecycle
//!
//! Sources and publishers are in-memory fakes except for the end-to-end
//! test, which posts to a mockito sink through the real HTTP publisher.

use super::*;
use crate::anomaly::{CpuSpikeDetector, MemoryPressureDetector};
use crate::collector::{MetricSource, MetricsServerConfig, MetricsServerSource};
use crate::error::PublishError;
use crate::health::ComponentStatus;
use crate::models::{IncidentSignal, Metric, Severity, SignalType};
use crate::publisher::{EventPublisher, HttpPublisher, PublishOutcome};
use async_trait::async_trait;
use mockito::Matcher;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

struct StaticSource {
    metrics: Vec<Metric>,
    delay: Duration,
    fail: bool,
    started: AtomicUsize,
    completed: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StaticSource {
    fn new(metrics: Vec<Metric>) -> Self {
        Self {
            metrics,
            delay: Duration::ZERO,
            fail: false,
            started: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    fn slow(metrics: Vec<Metric>, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(metrics)
        }
    }
}

#[async_trait]
impl MetricSource for StaticSource {
    fn name(&self) -> &str {
        if self.fail {
            "failing_source"
        } else {
            "static_source"
        }
    }

    async fn collect(&self, _cancel: &CancellationToken) -> anyhow::Result<Vec<Metric>> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("metrics API unreachable");
        }
        Ok(self.metrics.clone())
    }
}

/// Records every signal; fails with the given status for matching types
#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<IncidentSignal>>,
    fail_for: Option<(SignalType, u16)>,
}

impl RecordingPublisher {
    fn failing_for(signal_type: SignalType, status: u16) -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            fail_for: Some((signal_type, status)),
        }
    }

    fn signals(&self) -> Vec<IncidentSignal> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, signal: &IncidentSignal) -> Result<PublishOutcome, PublishError> {
        self.published.lock().unwrap().push(signal.clone());
        if let Some((signal_type, status)) = self.fail_for {
            if signal.signal_type == signal_type {
                return Err(PublishError::Status {
                    status,
                    body: "sink error".to_string(),
                });
            }
        }
        Ok(PublishOutcome {
            event_id: format!("evt-{}", self.published.lock().unwrap().len()),
            decision: None,
        })
    }
}

fn cpu_metrics() -> Vec<Metric> {
    vec![
        Metric::new("cpu", "default", "api", 90.0),
        Metric::new("cpu", "default", "api", 100.5),
        Metric::new("cpu", "default", "api", 95.6),
    ]
}

fn build_pipeline(
    source: Arc<dyn MetricSource>,
    publisher: Arc<dyn EventPublisher>,
    health: Option<HealthRegistry>,
) -> Pipeline {
    let mut builder = Pipeline::builder()
        .source(source)
        .detector(Box::new(CpuSpikeDetector::default()))
        .detector(Box::new(MemoryPressureDetector::default()))
        .publisher(publisher);
    if let Some(health) = health {
        builder = builder.health(health);
    }
    builder.build().unwrap()
}

#[tokio::test]
async fn test_cycle_publishes_critical_cpu_spike() {
    let source = Arc::new(StaticSource::new(cpu_metrics()));
    let publisher = Arc::new(RecordingPublisher::default());
    let pipeline = build_pipeline(source, publisher.clone(), None);

    let report = pipeline.run_cycle(&CancellationToken::new()).await;

    assert_eq!(report.metrics_collected, 3);
    assert_eq!(report.signals_detected, 1);
    assert_eq!(report.events_published, 1);

    let signals = publisher.signals();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].signal_type, SignalType::CpuSpike);
    assert_eq!(signals[0].severity, Severity::Critical);
    assert_eq!(signals[0].namespace.as_deref(), Some("default"));
    assert_eq!(signals[0].resource, "api");
    assert_eq!(signals[0].metadata["average_cpu_millicores"], "95.37");
}

#[tokio::test]
async fn test_empty_collection_skips_detection() {
    let source = Arc::new(StaticSource::new(Vec::new()));
    let publisher = Arc::new(RecordingPublisher::default());
    let pipeline = build_pipeline(source, publisher.clone(), None);

    let report = pipeline.run_cycle(&CancellationToken::new()).await;

    assert!(report.is_empty());
    assert_eq!(report.signals_detected, 0);
    assert!(publisher.signals().is_empty());
}

#[tokio::test]
async fn test_publish_failure_does_not_stop_remaining_detectors() {
    let metrics = vec![
        Metric::new("cpu", "default", "api", 80.0),
        Metric::new("memory", "default", "api", 900.0),
    ];
    let source = Arc::new(StaticSource::new(metrics));
    let publisher = Arc::new(RecordingPublisher::failing_for(SignalType::CpuSpike, 500));
    let pipeline = build_pipeline(source, publisher.clone(), None);

    let report = pipeline.run_cycle(&CancellationToken::new()).await;

    assert_eq!(report.signals_detected, 2);
    assert_eq!(report.publish_failures, 1);
    assert_eq!(report.events_published, 1);

    let types: Vec<SignalType> = publisher.signals().iter().map(|s| s.signal_type).collect();
    assert_eq!(types, vec![SignalType::CpuSpike, SignalType::Oom]);
}

#[tokio::test]
async fn test_failing_source_keeps_partial_collection() {
    let publisher = Arc::new(RecordingPublisher::default());
    let health = HealthRegistry::new();
    health.register_all().await;
    let pipeline = Pipeline::builder()
        .source(Arc::new(StaticSource::failing()))
        .source(Arc::new(StaticSource::new(cpu_metrics())))
        .detector(Box::new(CpuSpikeDetector::default()))
        .publisher(publisher.clone())
        .health(health.clone())
        .build()
        .unwrap();

    let report = pipeline.run_cycle(&CancellationToken::new()).await;

    assert_eq!(report.source_errors, 1);
    assert_eq!(report.metrics_collected, 3);
    assert_eq!(publisher.signals().len(), 1);
    assert_eq!(
        health.status(components::COLLECTOR).await,
        Some(ComponentStatus::Degraded)
    );
    assert_eq!(
        health.status(components::PUBLISHER).await,
        Some(ComponentStatus::Healthy)
    );
}

#[tokio::test]
async fn test_publish_failure_degrades_publisher_health() {
    let source = Arc::new(StaticSource::new(cpu_metrics()));
    let publisher = Arc::new(RecordingPublisher::failing_for(SignalType::CpuSpike, 503));
    let health = HealthRegistry::new();
    health.register_all().await;
    let pipeline = build_pipeline(source, publisher, Some(health.clone()));

    pipeline.run_cycle(&CancellationToken::new()).await;

    assert_eq!(
        health.status(components::PUBLISHER).await,
        Some(ComponentStatus::Degraded)
    );
}

#[test]
fn test_builder_requires_publisher_and_source() {
    let missing_publisher = Pipeline::builder()
        .source(Arc::new(StaticSource::new(Vec::new())))
        .build();
    assert!(matches!(
        missing_publisher,
        Err(ConfigError::Missing("publisher"))
    ));

    let missing_source = Pipeline::builder()
        .publisher(Arc::new(RecordingPublisher::default()))
        .build();
    assert!(matches!(
        missing_source,
        Err(ConfigError::Missing("metric source"))
    ));
}

#[test]
fn test_pipeline_reports_names_in_order() {
    let pipeline = build_pipeline(
        Arc::new(StaticSource::new(Vec::new())),
        Arc::new(RecordingPublisher::default()),
        None,
    );

    assert_eq!(
        pipeline.detector_names(),
        vec!["cpu_spike_detector", "memory_pressure_detector"]
    );
    assert_eq!(pipeline.source_names(), vec!["static_source"]);
}

#[test]
fn test_zero_poll_interval_rejected() {
    let pipeline = build_pipeline(
        Arc::new(StaticSource::new(Vec::new())),
        Arc::new(RecordingPublisher::default()),
        None,
    );
    let config = SchedulerConfig {
        poll_interval: Duration::ZERO,
    };

    assert!(matches!(
        Scheduler::new(config, pipeline),
        Err(ConfigError::InvalidPollInterval)
    ));
}

#[tokio::test]
async fn test_scheduler_runs_cycles_until_stopped() {
    let source = Arc::new(StaticSource::new(cpu_metrics()));
    let publisher = Arc::new(RecordingPublisher::default());
    let pipeline = build_pipeline(source.clone(), publisher.clone(), None);
    let mut scheduler = Scheduler::new(
        SchedulerConfig {
            poll_interval: Duration::from_millis(20),
        },
        pipeline,
    )
    .unwrap();

    scheduler.start().await.unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Running);

    tokio::time::sleep(Duration::from_millis(150)).await;
    scheduler.stop().await;
    assert_eq!(scheduler.state(), SchedulerState::Stopped);

    let cycles = source.completed.load(Ordering::SeqCst);
    assert!(cycles >= 2, "expected several cycles, got {}", cycles);
    assert_eq!(publisher.signals().len(), cycles);

    // No further cycles after stop returns
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(source.completed.load(Ordering::SeqCst), cycles);
}

#[tokio::test]
async fn test_first_cycle_waits_one_interval() {
    let source = Arc::new(StaticSource::new(cpu_metrics()));
    let pipeline = build_pipeline(
        source.clone(),
        Arc::new(RecordingPublisher::default()),
        None,
    );
    let mut scheduler = Scheduler::new(
        SchedulerConfig {
            poll_interval: Duration::from_secs(60),
        },
        pipeline,
    )
    .unwrap();

    scheduler.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    scheduler.stop().await;

    assert_eq!(source.started.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_slow_cycles_never_overlap() {
    let source = Arc::new(StaticSource::slow(cpu_metrics(), Duration::from_millis(80)));
    let pipeline = build_pipeline(
        source.clone(),
        Arc::new(RecordingPublisher::default()),
        None,
    );
    let mut scheduler = Scheduler::new(
        SchedulerConfig {
            poll_interval: Duration::from_millis(10),
        },
        pipeline,
    )
    .unwrap();

    scheduler.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    scheduler.stop().await;

    assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(source.started.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_stop_waits_for_in_flight_cycle() {
    let source = Arc::new(StaticSource::slow(cpu_metrics(), Duration::from_millis(100)));
    let publisher = Arc::new(RecordingPublisher::default());
    let pipeline = build_pipeline(source.clone(), publisher.clone(), None);
    let mut scheduler = Scheduler::new(
        SchedulerConfig {
            poll_interval: Duration::from_millis(10),
        },
        pipeline,
    )
    .unwrap();

    scheduler.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    scheduler.stop().await;

    let started = source.started.load(Ordering::SeqCst);
    assert!(started >= 1);
    assert_eq!(source.completed.load(Ordering::SeqCst), started);
    assert_eq!(publisher.signals().len(), started);
}

#[tokio::test]
async fn test_start_then_immediate_stop() {
    let pipeline = build_pipeline(
        Arc::new(StaticSource::new(cpu_metrics())),
        Arc::new(RecordingPublisher::default()),
        None,
    );
    let mut scheduler = Scheduler::new(SchedulerConfig::default(), pipeline).unwrap();

    scheduler.start().await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), scheduler.stop())
        .await
        .expect("stop should not hang");

    // Stopping twice is harmless
    scheduler.stop().await;
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
}

#[tokio::test]
async fn test_double_start_rejected_and_restart_allowed() {
    let pipeline = build_pipeline(
        Arc::new(StaticSource::new(Vec::new())),
        Arc::new(RecordingPublisher::default()),
        None,
    );
    let mut scheduler = Scheduler::new(SchedulerConfig::default(), pipeline).unwrap();

    scheduler.start().await.unwrap();
    assert!(matches!(
        scheduler.start().await,
        Err(SchedulerError::AlreadyRunning)
    ));

    scheduler.stop().await;
    scheduler.start().await.unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Running);
    scheduler.stop().await;
}

#[tokio::test]
async fn test_scheduler_health_follows_lifecycle() {
    let health = HealthRegistry::new();
    health.register_all().await;
    let pipeline = build_pipeline(
        Arc::new(StaticSource::new(Vec::new())),
        Arc::new(RecordingPublisher::default()),
        None,
    );
    let mut scheduler = Scheduler::new(SchedulerConfig::default(), pipeline)
        .unwrap()
        .with_health(health.clone());

    scheduler.start().await.unwrap();
    assert_eq!(
        health.status(components::SCHEDULER).await,
        Some(ComponentStatus::Healthy)
    );

    scheduler.stop().await;
    assert_eq!(
        health.status(components::SCHEDULER).await,
        Some(ComponentStatus::Unhealthy)
    );
}

#[tokio::test]
async fn test_cycle_posts_event_to_sink() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/events")
        .match_body(Matcher::PartialJson(json!({
            "type": "cpu_spike",
            "severity": "critical",
            "namespace": "default",
            "resource": "api",
            "message": "CPU spike detected: average usage 95.37 millicores exceeds threshold 50.00",
            "source": "telemetry-service"
        })))
        .with_status(200)
        .with_body(r#"{"decision": "scale_up"}"#)
        .create_async()
        .await;

    let publisher = HttpPublisher::builder()
        .sink_url(format!("{}/events", server.url()))
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let pipeline = build_pipeline(
        Arc::new(StaticSource::new(cpu_metrics())),
        Arc::new(publisher),
        None,
    );

    let report = pipeline.run_cycle(&CancellationToken::new()).await;

    mock.assert_async().await;
    assert_eq!(report.events_published, 1);
    assert_eq!(report.publish_failures, 0);
}

#[tokio::test]
async fn test_cancelled_collection_is_not_a_source_error() {
    let source = MetricsServerSource::new(MetricsServerConfig {
        api_url: "http://10.255.255.1:6443".to_string(),
        timeout: Duration::from_secs(5),
        ..Default::default()
    })
    .unwrap();
    let health = HealthRegistry::new();
    health.register_all().await;
    let pipeline = build_pipeline(
        Arc::new(source),
        Arc::new(RecordingPublisher::default()),
        Some(health.clone()),
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = pipeline.run_cycle(&cancel).await;

    assert_eq!(report.source_errors, 0);
    assert!(report.is_empty());
    assert_eq!(
        health.status(components::COLLECTOR).await,
        Some(ComponentStatus::Healthy)
    );
}
