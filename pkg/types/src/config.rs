use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How the resolver decides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// Watch Kubernetes RBAC and evaluate every request.
    #[default]
    Kubernetes,
    /// No watches; every request is allowed.
    AllowAll,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kubernetes" => Ok(AuthMode::Kubernetes),
            "allow-all" => Ok(AuthMode::AllowAll),
            other => Err(format!(
                "unknown mode '{}' (expected kubernetes or allow-all)",
                other
            )),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}' (expected text or json)", other)),
        }
    }
}

/// Server configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// port: 8470
/// mode: kubernetes
/// api-token: my-secret-token
/// cache-ttl-ms: 5000
/// cache-capacity: 10000
/// attempt-timeout-secs: 10
/// backoff-base-ms: 250
/// backoff-cap-secs: 30
/// degraded-after-failures: 3
/// watch-cluster-roles: false
/// log-format: json
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfigFile {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub mode: Option<AuthMode>,
    #[serde(default, alias = "api-token")]
    pub api_token: Option<String>,
    #[serde(default, alias = "cache-ttl-ms")]
    pub cache_ttl_ms: Option<u64>,
    #[serde(default, alias = "cache-capacity")]
    pub cache_capacity: Option<usize>,
    #[serde(default, alias = "attempt-timeout-secs")]
    pub attempt_timeout_secs: Option<u64>,
    #[serde(default, alias = "backoff-base-ms")]
    pub backoff_base_ms: Option<u64>,
    #[serde(default, alias = "backoff-cap-secs")]
    pub backoff_cap_secs: Option<u64>,
    #[serde(default, alias = "degraded-after-failures")]
    pub degraded_after_failures: Option<u32>,
    #[serde(default, alias = "watch-cluster-roles")]
    pub watch_cluster_roles: Option<bool>,
    #[serde(default, alias = "log-format")]
    pub log_format: Option<LogFormat>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}
