//! Pod usage from the Kubernetes metrics API
//!
//! Reads `metrics.k8s.io/v1beta1` pod metrics and turns every pod into one
//! `cpu` sample (millicores) and one `memory` sample (MiB), summed across
//! the pod's containers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use super::kubeconfig::{self, Kubeconfig};
use super::quantity::{parse_cpu_millicores, parse_memory_mib};
use super::MetricSource;
use crate::error::ConfigError;
use crate::models::Metric;

const METRICS_API_PATH: &str = "apis/metrics.k8s.io/v1beta1/";
const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const SERVICE_ACCOUNT_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Configuration for [`MetricsServerSource`]
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    /// API server base URL (or a `kubectl proxy` address)
    pub api_url: String,
    /// Restrict collection to one namespace
    pub namespace: Option<String>,
    /// Bearer token file, re-read on every collection. Wins over `token`.
    pub token_path: Option<PathBuf>,
    /// Static bearer token
    pub token: Option<String>,
    /// Extra PEM root certificate file, e.g. the cluster CA
    pub ca_path: Option<PathBuf>,
    /// Extra PEM root certificate
    pub ca_pem: Option<Vec<u8>>,
    /// PEM client certificate chain followed by its private key
    pub identity_pem: Option<Vec<u8>>,
    pub accept_invalid_certs: bool,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self {
            api_url: "https://kubernetes.default.svc".to_string(),
            namespace: None,
            token_path: None,
            token: None,
            ca_path: None,
            ca_pem: None,
            identity_pem: None,
            accept_invalid_certs: false,
            timeout: Duration::from_secs(10),
        }
    }
}

impl MetricsServerConfig {
    /// Service-account config when running inside a pod
    pub fn in_cluster() -> Option<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").ok()?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".into());

        Some(Self {
            api_url: format!("https://{}:{}", host, port),
            token_path: Some(PathBuf::from(SERVICE_ACCOUNT_TOKEN)),
            ca_path: Some(PathBuf::from(SERVICE_ACCOUNT_CA)),
            ..Self::default()
        })
    }

    /// In-cluster config, falling back to `$KUBECONFIG` or `~/.kube/config`
    pub fn infer() -> Result<Self, ConfigError> {
        if let Some(config) = Self::in_cluster() {
            info!(api_url = %config.api_url, "Using in-cluster configuration");
            return Ok(config);
        }

        let path = kubeconfig::default_path().ok_or(ConfigError::Missing("kubeconfig"))?;
        info!(path = %path.display(), "Using kubeconfig");
        Self::from_kubeconfig(&path)
    }

    /// Server and credentials of the kubeconfig's current context
    pub fn from_kubeconfig(path: &Path) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::Kubeconfig {
            path: path.to_path_buf(),
            reason,
        };

        let config = Kubeconfig::read(path).map_err(|e| invalid(format!("{:#}", e)))?;
        let context = config
            .current()
            .map_err(|e| invalid(format!("{:#}", e)))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let cluster = context.cluster;
        let mut resolved = Self {
            api_url: cluster.server.clone(),
            accept_invalid_certs: cluster.insecure_skip_tls_verify,
            ca_path: cluster
                .certificate_authority
                .as_ref()
                .map(|p| kubeconfig::resolve(base, p)),
            ca_pem: cluster
                .certificate_authority_data()
                .map_err(|e| invalid(format!("{:#}", e)))?,
            ..Self::default()
        };

        if let Some(user) = context.user {
            resolved.token = user.token.clone();
            resolved.token_path = user
                .token_file
                .as_ref()
                .map(|p| kubeconfig::resolve(base, p));
            resolved.identity_pem = user
                .identity_pem(base)
                .map_err(|e| invalid(format!("{:#}", e)))?;
        }

        Ok(resolved)
    }
}

enum BearerToken {
    File(PathBuf),
    Static(String),
}

/// Metric source backed by the Kubernetes metrics API
pub struct MetricsServerSource {
    client: reqwest::Client,
    pods_url: Url,
    token: Option<BearerToken>,
}

impl MetricsServerSource {
    pub const NAME: &'static str = "metrics_server";

    pub fn new(config: MetricsServerConfig) -> Result<Self, ConfigError> {
        if config.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout("metrics API"));
        }

        let pods_url = pods_url(&config.api_url, config.namespace.as_deref())?;

        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs);
        if let Some(path) = &config.ca_path {
            let pem = std::fs::read(path).map_err(|source| ConfigError::Certificate {
                path: path.clone(),
                source,
            })?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(ConfigError::HttpClient)?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(pem) = &config.ca_pem {
            let cert = reqwest::Certificate::from_pem(pem).map_err(ConfigError::HttpClient)?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(pem) = &config.identity_pem {
            let identity = reqwest::Identity::from_pem(pem).map_err(ConfigError::HttpClient)?;
            builder = builder.identity(identity);
        }
        let client = builder.build().map_err(ConfigError::HttpClient)?;

        let token = match (config.token_path, config.token) {
            (Some(path), _) => Some(BearerToken::File(path)),
            (None, Some(token)) => Some(BearerToken::Static(token)),
            (None, None) => None,
        };

        Ok(Self {
            client,
            pods_url,
            token,
        })
    }

    /// Endpoint queried on each collection
    pub fn pods_url(&self) -> &Url {
        &self.pods_url
    }

    async fn fetch(&self) -> Result<PodMetricsList> {
        let mut request = self.client.get(self.pods_url.clone());

        match &self.token {
            Some(BearerToken::File(path)) => {
                let token = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read bearer token from {:?}", path))?;
                request = request.bearer_auth(token.trim());
            }
            Some(BearerToken::Static(token)) => {
                request = request.bearer_auth(token);
            }
            None => {}
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to query {}", self.pods_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("metrics API error ({}): {}", status, body);
        }

        response
            .json()
            .await
            .context("Failed to parse pod metrics response")
    }
}

#[async_trait]
impl MetricSource for MetricsServerSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn collect(&self, cancel: &CancellationToken) -> Result<Vec<Metric>> {
        let list = tokio::select! {
            biased;
            _ = cancel.cancelled() => bail!("collection cancelled"),
            result = self.fetch() => result?,
        };

        let mut metrics = Vec::with_capacity(list.items.len() * 2);
        for pod in list.items {
            metrics.extend(pod.into_metrics()?);
        }

        debug!(
            source = Self::NAME,
            samples = metrics.len(),
            "Collected pod metrics"
        );
        Ok(metrics)
    }
}

fn pods_url(api_url: &str, namespace: Option<&str>) -> Result<Url, ConfigError> {
    let invalid = |source| ConfigError::InvalidUrl {
        url: api_url.to_string(),
        source,
    };

    let mut base = Url::parse(api_url).map_err(invalid)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }

    let path = match namespace.filter(|ns| !ns.is_empty()) {
        Some(ns) => format!("{}namespaces/{}/pods", METRICS_API_PATH, ns),
        None => format!("{}pods", METRICS_API_PATH),
    };
    base.join(&path).map_err(invalid)
}

#[derive(Debug, Deserialize)]
struct PodMetricsList {
    #[serde(default)]
    items: Vec<PodMetrics>,
}

#[derive(Debug, Deserialize)]
struct PodMetrics {
    metadata: PodMetadata,
    #[serde(default)]
    containers: Vec<ContainerUsage>,
}

#[derive(Debug, Deserialize)]
struct PodMetadata {
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    labels: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ContainerUsage {
    #[serde(default)]
    usage: HashMap<String, String>,
}

impl PodMetrics {
    fn into_metrics(self) -> Result<Vec<Metric>> {
        let mut cpu = 0.0;
        let mut memory = 0.0;

        for container in &self.containers {
            if let Some(q) = container.usage.get("cpu") {
                cpu += parse_cpu_millicores(q)
                    .with_context(|| format!("pod {}", self.metadata.name))?;
            }
            if let Some(q) = container.usage.get("memory") {
                memory += parse_memory_mib(q)
                    .with_context(|| format!("pod {}", self.metadata.name))?;
            }
        }

        let PodMetadata {
            name,
            namespace,
            labels,
        } = self.metadata;

        let mut cpu_metric = Metric::new("cpu", namespace.clone(), name.clone(), cpu);
        cpu_metric.labels = labels.clone();
        let mut memory_metric = Metric::new("memory", namespace, name, memory);
        memory_metric.labels = labels;

        Ok(vec![cpu_metric, memory_metric])
    }
}
