//! Telemetry pipeline library
//!
//! This crate provides the core functionality for:
//! - Metrics collection from the Kubernetes metrics API
//! - Aggregation of samples by resource
//! - Threshold-based incident detection
//! - Publishing incident events to a decision service
//! - Health checks and observability

pub mod aggregator;
pub mod anomaly;
pub mod collector;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod publisher;
pub mod scheduler;

pub use error::{ConfigError, PublishError, SchedulerError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{StructuredLogger, TelemetryMetrics};
