//! Memory pressure detection
//!
//! Raises an `oom` signal when the mean memory usage of a resource exceeds
//! a threshold in MiB. Severity bands match the CPU spike detector.

use std::collections::HashMap;

use chrono::Utc;

use super::{classify_severity, first_breach, namespace_of, parse_key, Detector};
use crate::error::ConfigError;
use crate::models::{IncidentSignal, SignalInput, SignalType};

const KEY_PREFIX: &str = "memory:";

/// Default threshold in MiB
pub const DEFAULT_MEMORY_THRESHOLD_MIB: f64 = 512.0;

#[derive(Debug, Clone)]
pub struct MemoryPressureDetector {
    threshold_mib: f64,
}

impl MemoryPressureDetector {
    pub const NAME: &'static str = "memory_pressure_detector";

    pub fn new(threshold_mib: f64) -> Result<Self, ConfigError> {
        if threshold_mib.is_nan() || threshold_mib <= 0.0 {
            return Err(ConfigError::InvalidThreshold {
                detector: Self::NAME,
                value: threshold_mib,
            });
        }
        Ok(Self { threshold_mib })
    }

    pub fn threshold_mib(&self) -> f64 {
        self.threshold_mib
    }
}

impl Default for MemoryPressureDetector {
    fn default() -> Self {
        Self {
            threshold_mib: DEFAULT_MEMORY_THRESHOLD_MIB,
        }
    }
}

impl Detector for MemoryPressureDetector {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn detect(&self, input: &SignalInput) -> Option<IncidentSignal> {
        let breach = first_breach(input, KEY_PREFIX, self.threshold_mib)?;
        let (namespace, resource) = parse_key(breach.key);

        let mut metadata = HashMap::new();
        metadata.insert(
            "average_memory_mib".to_string(),
            format!("{:.2}", breach.mean),
        );
        metadata.insert(
            "threshold_mib".to_string(),
            format!("{:.2}", self.threshold_mib),
        );
        metadata.insert("samples".to_string(), breach.samples.to_string());

        Some(IncidentSignal {
            id: None,
            signal_type: SignalType::Oom,
            severity: classify_severity(breach.mean, self.threshold_mib),
            namespace: namespace_of(namespace),
            resource: resource.to_string(),
            message: format!(
                "Memory pressure detected: average usage {:.2} MiB exceeds threshold {:.2} MiB",
                breach.mean, self.threshold_mib
            ),
            timestamp: Utc::now(),
            metadata,
        })
    }
}
