//! Anomaly detection over aggregated metrics
//!
//! This module provides:
//! - The [`Detector`] trait every detector kind implements
//! - CPU spike detection over `cpu:` keys
//! - Memory pressure (OOM risk) detection over `memory:` keys
//! - Shared helpers for key parsing and severity classification

mod cpu_spike;
mod memory_pressure;

pub use cpu_spike::CpuSpikeDetector;
pub use memory_pressure::MemoryPressureDetector;

use crate::models::{IncidentSignal, Severity, SignalInput};

/// A stateless rule evaluated once per cycle against aggregated metrics.
///
/// Returns `Some(signal)` when the rule fires and `None` otherwise.
/// Implementations must not keep mutable state between calls and must
/// tolerate inputs that contain none of their keys.
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;

    fn detect(&self, input: &SignalInput) -> Option<IncidentSignal>;
}

/// Arithmetic mean; 0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Split a composite key into `(namespace, resource)`.
///
/// `kind:ns:res` gives `(ns, res)`, `kind:res` gives `("", res)`,
/// anything else gives `("", "unknown")`.
pub fn parse_key(key: &str) -> (&str, &str) {
    let parts: Vec<&str> = key.split(':').collect();
    match parts.as_slice() {
        [_, namespace, resource] => (*namespace, *resource),
        [_, resource] => ("", *resource),
        _ => ("", "unknown"),
    }
}

/// Classify how far `value` is above `threshold`. Band cutoffs are inclusive.
///
/// Compared as a ratio so that exact multiples land in the higher band
/// (`threshold * 1.1` is not exactly representable).
pub fn classify_severity(value: f64, threshold: f64) -> Severity {
    let ratio = value / threshold;
    if ratio >= 1.5 {
        Severity::Critical
    } else if ratio >= 1.2 {
        Severity::High
    } else if ratio >= 1.1 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Breach found by [`first_breach`]
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Breach<'a> {
    pub key: &'a str,
    pub mean: f64,
    pub samples: usize,
}

/// Scan keys with the given kind prefix in key order and return the first
/// whose mean strictly exceeds `threshold`. Later breaching keys in the same
/// input are not reported.
pub(crate) fn first_breach<'a>(
    input: &'a SignalInput,
    prefix: &str,
    threshold: f64,
) -> Option<Breach<'a>> {
    input
        .metrics
        .iter()
        .filter(|(key, _)| key.starts_with(prefix))
        .map(|(key, values)| Breach {
            key: key.as_str(),
            mean: mean(values),
            samples: values.len(),
        })
        .find(|breach| breach.mean > threshold)
}

/// `Some(namespace)` unless empty
pub(crate) fn namespace_of(namespace: &str) -> Option<String> {
    if namespace.is_empty() {
        None
    } else {
        Some(namespace.to_string())
    }
}
