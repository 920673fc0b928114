use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::PollPolicy;

/// Configuration file structure for acs-provision.
///
/// Holds the settings shared by every pipeline: how to reach the cluster and
/// Central, default polling, and where credentials come from. Configuration
/// files are loaded from the current directory or a specified path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub central: CentralConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub credentials: CredentialsConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterConfig {
    /// Cluster CLI, `oc` or `kubectl`
    #[serde(default = "default_cli")]
    pub cli: String,

    pub kubeconfig: Option<String>,

    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CentralConfig {
    /// Credential key holding the Central URL
    #[serde(default = "default_url_env")]
    pub url_env: String,

    /// Credential key holding the API token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Credential key holding the scheme-less `host[:port]` that `roxctl`
    /// reads; used for the URL when the URL key is unset
    #[serde(default = "default_address_env")]
    pub address_env: String,

    #[serde(default)]
    pub insecure_skip_tls_verify: bool,

    pub ca_cert: Option<PathBuf>,

    /// Client certificate for mutual TLS, used together with `client-key`
    pub client_cert: Option<PathBuf>,

    pub client_key: Option<PathBuf>,

    /// Retries for reads on network errors, 429 and 5xx
    #[serde(default = "default_read_retries")]
    pub read_retries: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Namespace and route name used to discover the URL when it is not set
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_route")]
    pub route: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PollingConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,

    /// How long a resource whose state cannot be read is asked again
    #[serde(default = "default_read_retry_interval_secs")]
    pub read_retry_interval_secs: u64,

    #[serde(default = "default_read_retry_max_secs")]
    pub read_retry_max_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CredentialsConfig {
    /// Shell profile read for `export KEY=value` lines (default `~/.bashrc`)
    pub profile: Option<PathBuf>,

    /// Prompt for required credentials that no other source provides
    #[serde(default = "default_true")]
    pub interactive: bool,

    /// Write prompted values back to the profile
    #[serde(default)]
    pub persist_prompted: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,

    /// Pretty-print JSON output
    #[serde(default)]
    pub pretty: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Summary,
    Json,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cli: default_cli(),
            kubeconfig: None,
            context: None,
        }
    }
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            url_env: default_url_env(),
            token_env: default_token_env(),
            address_env: default_address_env(),
            insecure_skip_tls_verify: false,
            ca_cert: None,
            client_cert: None,
            client_key: None,
            read_retries: default_read_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            namespace: default_namespace(),
            route: default_route(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_wait_secs: default_max_wait_secs(),
            read_retry_interval_secs: default_read_retry_interval_secs(),
            read_retry_max_secs: default_read_retry_max_secs(),
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            profile: None,
            interactive: true,
            persist_prompted: false,
        }
    }
}

fn default_cli() -> String {
    "oc".to_string()
}

fn default_url_env() -> String {
    "ROX_CENTRAL_URL".to_string()
}

fn default_token_env() -> String {
    "ROX_API_TOKEN".to_string()
}

fn default_read_retries() -> u32 {
    5
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_namespace() -> String {
    "stackrox".to_string()
}

fn default_route() -> String {
    "central".to_string()
}

fn default_interval_secs() -> u64 {
    10
}

fn default_max_wait_secs() -> u64 {
    600
}

fn default_read_retry_interval_secs() -> u64 {
    5
}

fn default_read_retry_max_secs() -> u64 {
    30
}

fn default_address_env() -> String {
    "ROX_CENTRAL_ADDRESS".to_string()
}

fn default_true() -> bool {
    true
}

impl PollingConfig {
    pub fn policy(&self) -> Result<PollPolicy> {
        PollPolicy::from_secs(self.interval_secs, self.max_wait_secs)
            .context("Invalid [polling] configuration")
    }

    pub fn read_retry_policy(&self) -> Result<PollPolicy> {
        PollPolicy::from_secs(self.read_retry_interval_secs, self.read_retry_max_secs)
            .context("Invalid [polling] read-retry configuration")
    }
}

impl CentralConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./acs-provision.toml
    /// 3. ./acs-provision.json
    /// 4. ./acs-provision.yaml
    /// 5. ./acs-provision.yml
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let candidates = [
            "acs-provision.toml",
            "acs-provision.json",
            "acs-provision.yaml",
            "acs-provision.yml",
        ];

        for candidate in &candidates {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_path(path);
            }
        }

        Ok(Self::default())
    }

    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => {
                // Try TOML first, then JSON, then YAML
                toml::from_str(&contents)
                    .or_else(|_| serde_json::from_str(&contents))
                    .or_else(|_| serde_yaml::from_str(&contents))
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("yaml") | Some("yml") => serde_yaml::to_string(self)?,
            _ => toml::to_string_pretty(self)?,
        };

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}
