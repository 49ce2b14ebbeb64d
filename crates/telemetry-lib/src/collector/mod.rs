//! Metrics collection from the cluster
//!
//! This module defines the [`MetricSource`] capability consumed by the
//! scheduler and provides a source backed by the Kubernetes metrics API.

mod kubeconfig;
mod metrics_server;
mod quantity;


pub use metrics_server::{MetricsServerConfig, MetricsServerSource};
pub use quantity::{parse_cpu_millicores, parse_memory_mib, parse_quantity};

use crate::models::Metric;
use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A source of labeled resource usage samples for one collection cycle
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Fetch the current samples. Implementations should return promptly
    /// once `cancel` fires and bound their own I/O with a timeout.
    async fn collect(&self, cancel: &CancellationToken) -> Result<Vec<Metric>>;
}
