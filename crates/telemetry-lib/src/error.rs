//! Error types for the telemetry pipeline

use thiserror::Error;

/// Construction-time configuration failures. These are fatal: the service
/// must not start scheduling when one is returned.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("poll interval must be greater than 0")]
    InvalidPollInterval,

    #[error("{0} timeout must be greater than 0")]
    InvalidTimeout(&'static str),

    #[error("{detector} threshold must be greater than 0, got {value}")]
    InvalidThreshold { detector: &'static str, value: f64 },

    #[error("event sink URL is required")]
    MissingSinkUrl,

    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to read certificate {path:?}: {source}")]
    Certificate {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid kubeconfig {path:?}: {reason}")]
    Kubeconfig {
        path: std::path::PathBuf,
        reason: String,
    },

    #[error("{0} is required")]
    Missing(&'static str),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Failure to deliver an event to the sink
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to publish event: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("unexpected status code: {status}")]
    Status { status: u16, body: String },
}

impl PublishError {
    /// True when the sink answered outside 2xx, as opposed to a transport failure
    pub fn is_status(&self) -> bool {
        matches!(self, PublishError::Status { .. })
    }

    /// HTTP status code, if the sink answered
    pub fn status(&self) -> Option<u16> {
        match self {
            PublishError::Status { status, .. } => Some(*status),
            PublishError::Transport(e) => e.status().map(|s| s.as_u16()),
            PublishError::Serialize(_) => None,
        }
    }

    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            PublishError::Serialize(_) => "serialize",
            PublishError::Transport(_) => "transport",
            PublishError::Status { .. } => "status",
        }
    }
}

/// Scheduler lifecycle errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("scheduler must be started from within a tokio runtime")]
    NoRuntime,
}
