//! Service configuration

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use telemetry_lib::collector::MetricsServerConfig;
use telemetry_lib::publisher::PublisherConfig;
use telemetry_lib::scheduler::SchedulerConfig;
use telemetry_lib::ConfigError;
use tracing::info;

const ENV_PREFIX: &str = "TELEMETRY";

/// Service configuration, read from `TELEMETRY_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default = "default_environment")]
    pub environment: String,

    /// Seconds between cycle starts
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    #[serde(default = "default_event_sink_url")]
    pub event_sink_url: String,

    /// Publish timeout in seconds
    #[serde(default = "default_event_timeout")]
    pub event_timeout: u64,

    /// Port for health and metrics endpoints
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// CPU spike threshold in millicores
    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold: f64,

    #[serde(default = "default_memory_threshold_mib")]
    pub memory_threshold_mib: f64,

    /// Metrics API base URL; discovered in-cluster or from the kubeconfig when unset
    #[serde(default)]
    pub metrics_api_url: Option<String>,

    /// Collect from one namespace only
    #[serde(default)]
    pub metrics_namespace: Option<String>,

    #[serde(default)]
    pub metrics_token_path: Option<PathBuf>,

    #[serde(default)]
    pub metrics_ca_path: Option<PathBuf>,

    /// Metrics API timeout in seconds
    #[serde(default = "default_metrics_timeout")]
    pub metrics_timeout: u64,
}

fn default_service_name() -> String {
    "telemetry-service".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_poll_interval() -> u64 {
    30
}

fn default_event_sink_url() -> String {
    "http://localhost:8080/events".to_string()
}

fn default_event_timeout() -> u64 {
    180
}

fn default_http_port() -> u16 {
    8080
}

fn default_cpu_threshold() -> f64 {
    50.0
}

fn default_memory_threshold_mib() -> f64 {
    512.0
}

fn default_metrics_timeout() -> u64 {
    10
}

impl TelemetryConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        Self::from_env(config::Environment::with_prefix(ENV_PREFIX))
    }

    fn from_env(env: config::Environment) -> Result<Self> {
        config::Config::builder()
            .add_source(env.try_parsing(true))
            .build()?
            .try_deserialize()
            .context("Invalid telemetry configuration")
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::from_secs(self.poll_interval),
        }
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            sink_url: self.event_sink_url.clone(),
            timeout: Duration::from_secs(self.event_timeout),
            source: self.service_name.clone(),
        }
    }

    /// An explicit API URL skips discovery; otherwise in-cluster settings or
    /// the kubeconfig are used. Explicit token and CA settings win.
    pub fn metrics_server_config(&self) -> Result<MetricsServerConfig, ConfigError> {
        let mut config = match &self.metrics_api_url {
            Some(url) => MetricsServerConfig {
                api_url: url.clone(),
                ..Default::default()
            },
            None => MetricsServerConfig::infer()?,
        };
        if self.metrics_token_path.is_some() {
            config.token_path = self.metrics_token_path.clone();
        }
        if self.metrics_ca_path.is_some() {
            config.ca_path = self.metrics_ca_path.clone();
        }
        config.namespace = self.metrics_namespace.clone();
        config.timeout = Duration::from_secs(self.metrics_timeout);
        Ok(config)
    }

    pub fn log_summary(&self) {
        info!(
            service_name = %self.service_name,
            environment = %self.environment,
            poll_interval_secs = self.poll_interval,
            event_sink_url = %self.event_sink_url,
            event_timeout_secs = self.event_timeout,
            http_port = self.http_port,
            cpu_threshold = self.cpu_threshold,
            memory_threshold_mib = self.memory_threshold_mib,
            metrics_namespace = self.metrics_namespace.as_deref().unwrap_or("*"),
            "Configuration loaded"
        );
    }
}
