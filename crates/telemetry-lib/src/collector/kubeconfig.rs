//! Minimal kubeconfig reader
//!
//! Resolves the current context to a server address and credentials. Only
//! static credentials are understood: bearer tokens, token files and client
//! certificates. Exec and auth-provider plugins are not supported.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct Kubeconfig {
    #[serde(default)]
    current_context: Option<String>,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    users: Vec<NamedUser>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEntry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct ClusterEntry {
    pub server: String,
    #[serde(default)]
    pub certificate_authority: Option<PathBuf>,
    #[serde(default, rename = "certificate-authority-data")]
    ca_data: Option<String>,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextEntry,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    cluster: String,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: UserEntry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct UserEntry {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    #[serde(default)]
    client_certificate: Option<PathBuf>,
    #[serde(default)]
    client_certificate_data: Option<String>,
    #[serde(default)]
    client_key: Option<PathBuf>,
    #[serde(default)]
    client_key_data: Option<String>,
}

/// Cluster and user selected by the current context
pub(crate) struct CurrentContext<'a> {
    pub cluster: &'a ClusterEntry,
    pub user: Option<&'a UserEntry>,
}

impl Kubeconfig {
    pub fn read(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).context("Failed to read kubeconfig")?;
        serde_yaml::from_str(&raw).context("Failed to parse kubeconfig")
    }

    pub fn current(&self) -> Result<CurrentContext<'_>> {
        let name = self
            .current_context
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| anyhow!("current-context is not set"))?;

        let context = self
            .contexts
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| anyhow!("context {:?} not found", name))?;

        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == context.context.cluster)
            .ok_or_else(|| anyhow!("cluster {:?} not found", context.context.cluster))?;

        let user = match &context.context.user {
            Some(user) => Some(
                self.users
                    .iter()
                    .find(|u| &u.name == user)
                    .map(|u| &u.user)
                    .ok_or_else(|| anyhow!("user {:?} not found", user))?,
            ),
            None => None,
        };

        Ok(CurrentContext {
            cluster: &cluster.cluster,
            user,
        })
    }
}

impl ClusterEntry {
    /// Decoded `certificate-authority-data`
    pub fn certificate_authority_data(&self) -> Result<Option<Vec<u8>>> {
        self.ca_data
            .as_deref()
            .map(|data| decode(data).context("certificate-authority-data"))
            .transpose()
    }
}

impl UserEntry {
    /// Client certificate and key as one PEM bundle, from inline data or files
    pub fn identity_pem(&self, base: &Path) -> Result<Option<Vec<u8>>> {
        let cert = pem_source(
            self.client_certificate_data.as_deref(),
            self.client_certificate.as_deref(),
            base,
        )
        .context("client certificate")?;
        let key = pem_source(
            self.client_key_data.as_deref(),
            self.client_key.as_deref(),
            base,
        )
        .context("client key")?;

        match (cert, key) {
            (Some(mut cert), Some(key)) => {
                cert.push(b'\n');
                cert.extend(key);
                Ok(Some(cert))
            }
            (None, None) => Ok(None),
            _ => bail!("client certificate and key must be set together"),
        }
    }
}

fn pem_source(data: Option<&str>, file: Option<&Path>, base: &Path) -> Result<Option<Vec<u8>>> {
    if let Some(data) = data {
        return decode(data).map(Some);
    }
    file.map(|path| {
        let path = resolve(base, path);
        std::fs::read(&path).with_context(|| format!("Failed to read {:?}", path))
    })
    .transpose()
}

fn decode(data: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(data.trim())
        .context("invalid base64")
}

/// Relative paths in a kubeconfig are relative to the file itself
pub(crate) fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// First entry of `$KUBECONFIG`, else `~/.kube/config`
pub(crate) fn default_path() -> Option<PathBuf> {
    if let Some(value) = std::env::var_os("KUBECONFIG") {
        if let Some(first) = std::env::split_paths(&value).find(|p| !p.as_os_str().is_empty()) {
            return Some(first);
        }
    }
    dirs_next::home_dir().map(|home| home.join(".kube").join("config"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: dev
clusters:
  - name: dev-cluster
    cluster:
      server: https://127.0.0.1:6443
      certificate-authority-data: LS0tLS1CRUdJTg==
  - name: prod-cluster
    cluster:
      server: https://prod.example.com
contexts:
  - name: dev
    context:
      cluster: dev-cluster
      user: dev-user
  - name: prod
    context:
      cluster: prod-cluster
      user: prod-user
users:
  - name: dev-user
    user:
      token: dev-token
  - name: prod-user
    user:
      token-file: secrets/token
"#;

    fn parse(raw: &str) -> Kubeconfig {
        serde_yaml::from_str(raw).unwrap()
    }

    #[test]
    fn test_current_context_selects_cluster_and_user() {
        let config = parse(KUBECONFIG);
        let current = config.current().unwrap();

        assert_eq!(current.cluster.server, "https://127.0.0.1:6443");
        assert_eq!(
            current.cluster.certificate_authority_data().unwrap(),
            Some(b"-----BEGIN".to_vec())
        );
        assert_eq!(current.user.unwrap().token.as_deref(), Some("dev-token"));
    }

    #[test]
    fn test_missing_current_context() {
        let config = parse("clusters: []\ncontexts: []\nusers: []\n");
        assert!(config.current().is_err());
    }

    #[test]
    fn test_unknown_context() {
        let config = parse(&KUBECONFIG.replace("current-context: dev", "current-context: qa"));
        let err = config.current().err().unwrap();
        assert!(err.to_string().contains("qa"));
    }

    #[test]
    fn test_identity_requires_cert_and_key() {
        let user = UserEntry {
            client_certificate_data: Some(STANDARD.encode("CERT")),
            ..Default::default()
        };
        assert!(user.identity_pem(Path::new("/")).is_err());

        let user = UserEntry {
            client_certificate_data: Some(STANDARD.encode("CERT")),
            client_key_data: Some(STANDARD.encode("KEY")),
            ..Default::default()
        };
        assert_eq!(
            user.identity_pem(Path::new("/")).unwrap(),
            Some(b"CERT\nKEY".to_vec())
        );
    }

    #[test]
    fn test_resolve_relative_paths() {
        let base = Path::new("/home/ops/.kube");
        assert_eq!(
            resolve(base, Path::new("certs/ca.crt")),
            PathBuf::from("/home/ops/.kube/certs/ca.crt")
        );
        assert_eq!(
            resolve(base, Path::new("/etc/ca.crt")),
            PathBuf::from("/etc/ca.crt")
        );
    }
}
