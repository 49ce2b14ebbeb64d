//! Core data models for the telemetry pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A single labeled resource usage sample produced by a metric source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Metric kind, e.g. `cpu` or `memory`
    pub kind: String,
    /// Namespace of the resource; empty for cluster-scoped resources
    #[serde(default)]
    pub namespace: String,
    pub resource: String,
    pub value: f64,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl Metric {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        resource: impl Into<String>,
        value: f64,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            resource: resource.into(),
            value,
            labels: HashMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Composite aggregation key: `kind:namespace:resource`, or
    /// `kind:resource` when the namespace is empty.
    pub fn key(&self) -> String {
        if self.namespace.is_empty() {
            format!("{}:{}", self.kind, self.resource)
        } else {
            format!("{}:{}:{}", self.kind, self.namespace, self.resource)
        }
    }
}

/// Aggregated view of one cycle's metrics, consumed read-only by detectors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalInput {
    /// Composite key -> values in arrival order
    pub metrics: BTreeMap<String, Vec<f64>>,
    /// Union of all sample labels, last write wins
    pub labels: HashMap<String, String>,
}

impl SignalInput {
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// Incident classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    CrashLoop,
    Oom,
    CpuSpike,
    Anomaly,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::CrashLoop => "crash_loop",
            SignalType::Oom => "oom",
            SignalType::CpuSpike => "cpu_spike",
            SignalType::Anomaly => "anomaly",
        }
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incident severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An anomaly raised by a detector, before wire serialization
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentSignal {
    /// Assigned downstream; detectors leave this empty
    pub id: Option<String>,
    pub signal_type: SignalType,
    pub severity: Severity,
    pub namespace: Option<String>,
    pub resource: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

/// Wire form of an [`IncidentSignal`] posted to the event sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: SignalType,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub resource: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    pub source: String,
}

impl Event {
    /// Build the wire event for a signal with a fresh id
    pub fn from_signal(signal: &IncidentSignal, id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            event_type: signal.signal_type,
            severity: signal.severity,
            namespace: signal.namespace.clone().filter(|ns| !ns.is_empty()),
            resource: signal.resource.clone(),
            message: signal.message.clone(),
            timestamp: signal.timestamp,
            metadata: signal.metadata.clone(),
            source: source.into(),
        }
    }
}

/// Decision returned by the event sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub decision: String,
    #[serde(default)]
    pub message: Option<String>,
}
