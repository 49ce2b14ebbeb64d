//! Delivery of incident signals to the remote decision service
//!
//! This module provides:
//! - The [`EventPublisher`] capability used by the scheduler
//! - An HTTP client posting JSON events and reading back the decision

mod client;


pub use client::{HttpPublisher, PublisherBuilder, PublisherConfig};

use crate::error::PublishError;
use crate::models::{Decision, IncidentSignal};
use async_trait::async_trait;

/// Result of a successful publish
#[derive(Debug, Clone, PartialEq)]
pub struct PublishOutcome {
    /// Id assigned to the wire event
    pub event_id: String,
    /// Decision parsed from the response body, when it had the expected shape
    pub decision: Option<Decision>,
}

/// Sends a signal to the event sink. A single attempt is made per call.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, signal: &IncidentSignal) -> Result<PublishOutcome, PublishError>;
}
