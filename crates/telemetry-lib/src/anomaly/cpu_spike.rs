//! CPU spike detection
//!
//! Fires when the mean CPU usage of a resource within one cycle exceeds a
//! fixed threshold in millicores.

use std::collections::HashMap;

use chrono::Utc;

use super::{classify_severity, first_breach, namespace_of, parse_key, Detector};
use crate::error::ConfigError;
use crate::models::{IncidentSignal, SignalInput, SignalType};

const KEY_PREFIX: &str = "cpu:";

/// Default threshold in millicores
pub const DEFAULT_CPU_THRESHOLD: f64 = 50.0;

/// Detects resources whose mean CPU usage exceeds a threshold.
///
/// Only the first breaching key (in key order) is reported per call.
#[derive(Debug, Clone)]
pub struct CpuSpikeDetector {
    threshold: f64,
}

impl CpuSpikeDetector {
    pub const NAME: &'static str = "cpu_spike_detector";

    /// Create a detector; the threshold must be positive
    pub fn new(threshold: f64) -> Result<Self, ConfigError> {
        if threshold.is_nan() || threshold <= 0.0 {
            return Err(ConfigError::InvalidThreshold {
                detector: Self::NAME,
                value: threshold,
            });
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl Default for CpuSpikeDetector {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CPU_THRESHOLD,
        }
    }
}

impl Detector for CpuSpikeDetector {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn detect(&self, input: &SignalInput) -> Option<IncidentSignal> {
        let breach = first_breach(input, KEY_PREFIX, self.threshold)?;
        let (namespace, resource) = parse_key(breach.key);

        let mut metadata = HashMap::new();
        metadata.insert(
            "average_cpu_millicores".to_string(),
            format!("{:.2}", breach.mean),
        );
        metadata.insert(
            "threshold_millicores".to_string(),
            format!("{:.2}", self.threshold),
        );
        metadata.insert("samples".to_string(), breach.samples.to_string());

        Some(IncidentSignal {
            id: None,
            signal_type: SignalType::CpuSpike,
            severity: classify_severity(breach.mean, self.threshold),
            namespace: namespace_of(namespace),
            resource: resource.to_string(),
            message: format!(
                "CPU spike detected: average usage {:.2} millicores exceeds threshold {:.2}",
                breach.mean, self.threshold
            ),
            timestamp: Utc::now(),
            metadata,
        })
    }
}
