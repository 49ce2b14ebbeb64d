//! HTTP client for the event sink
//!
//! Each publish is one JSON POST bounded by the configured timeout. There is
//! no retry: failures are returned to the caller. The response body is
//! parsed on a best-effort basis and never turns a 2xx into an error.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use super::{EventPublisher, PublishOutcome};
use crate::error::{ConfigError, PublishError};
use crate::models::{Decision, Event, IncidentSignal};

/// Configuration for [`HttpPublisher`]
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Event sink URL (e.g. "http://agent-service:8000/events")
    pub sink_url: String,
    /// Timeout for the whole exchange
    pub timeout: Duration,
    /// Service identity stamped into every event
    pub source: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            sink_url: "http://localhost:8080/events".to_string(),
            timeout: Duration::from_secs(180),
            source: "telemetry-service".to_string(),
        }
    }
}

/// Publishes events to the sink over HTTP
pub struct HttpPublisher {
    client: reqwest::Client,
    sink_url: Url,
    source: String,
}

impl HttpPublisher {
    /// Create a publisher, validating the configuration
    pub fn new(config: PublisherConfig) -> Result<Self, ConfigError> {
        if config.sink_url.trim().is_empty() {
            return Err(ConfigError::MissingSinkUrl);
        }
        if config.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout("publish"));
        }

        let sink_url = Url::parse(&config.sink_url).map_err(|source| ConfigError::InvalidUrl {
            url: config.sink_url.clone(),
            source,
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ConfigError::HttpClient)?;

        Ok(Self {
            client,
            sink_url,
            source: config.source,
        })
    }

    pub fn builder() -> PublisherBuilder {
        PublisherBuilder::new()
    }

    pub fn sink_url(&self) -> &Url {
        &self.sink_url
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Wire event for a signal, with a freshly generated id
    pub fn build_event(&self, signal: &IncidentSignal) -> Event {
        Event::from_signal(signal, Uuid::new_v4().to_string(), self.source.as_str())
    }
}

#[async_trait]
impl EventPublisher for HttpPublisher {
    async fn publish(&self, signal: &IncidentSignal) -> Result<PublishOutcome, PublishError> {
        let event = self.build_event(signal);
        let body = serde_json::to_vec(&event)?;

        let response = self
            .client
            .post(self.sink_url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(PublishError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let decision = match response.bytes().await {
            Ok(bytes) => match serde_json::from_slice::<Decision>(&bytes) {
                Ok(decision) => Some(decision),
                Err(e) => {
                    debug!(event_id = %event.id, error = %e, "Sink response was not a decision (non-JSON)");
                    None
                }
            },
            Err(e) => {
                debug!(event_id = %event.id, error = %e, "Failed to read sink response body");
                None
            }
        };

        Ok(PublishOutcome {
            event_id: event.id,
            decision,
        })
    }
}

/// Builder for [`HttpPublisher`]
pub struct PublisherBuilder {
    config: PublisherConfig,
}

impl PublisherBuilder {
    pub fn new() -> Self {
        Self {
            config: PublisherConfig::default(),
        }
    }

    pub fn sink_url(mut self, url: impl Into<String>) -> Self {
        self.config.sink_url = url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.config.source = source.into();
        self
    }

    pub fn build(self) -> Result<HttpPublisher, ConfigError> {
        HttpPublisher::new(self.config)
    }
}

impl Default for PublisherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
