//! Configuration for memedex.
//!
//! Stored as JSON at `<config dir>/memedex/config.json`. Every section has
//! defaults, so an empty or partial file is valid. `MEMEDEX_BACKEND_URL`
//! overrides the backend URL after loading.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{ConfigError, ConfigResult};
use crate::network::{NetworkDescriptor, NetworkRegistry};
use crate::provider::{HttpEip1193, InjectedProviders};

/// Environment variable overriding [`BackendConfig::url`].
pub const BACKEND_URL_ENV: &str = "MEMEDEX_BACKEND_URL";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemedexConfig {
    /// Backend API.
    pub backend: BackendConfig,
    /// Session manager behaviour.
    pub wallet: WalletConfig,
    /// Wallet endpoints standing in for injected providers.
    pub providers: ProvidersConfig,
    /// Extra networks, merged over the built-in registry.
    pub networks: BTreeMap<u64, NetworkDescriptor>,
}

/// Backend API settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL, without the `/api` prefix.
    pub url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8001".to_string(),
            timeout_secs: 15,
        }
    }
}

impl BackendConfig {
    /// Request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Session manager settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Re-read `eth_chainId` after `wallet_addEthereumChain` before
    /// trusting the switch.
    pub confirm_after_add: bool,
    /// Event poll interval for HTTP wallets, in milliseconds.
    pub poll_interval_ms: u64,
    /// Try the silent reconnect at startup.
    pub auto_connect: bool,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            confirm_after_add: true,
            poll_interval_ms: 4000,
            auto_connect: true,
        }
    }
}

impl WalletConfig {
    /// Event poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Endpoints for the `ethereum` and `BinanceChain` provider slots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// The `ethereum` slot.
    pub ethereum: Option<EndpointConfig>,
    /// The `BinanceChain` slot.
    pub binance_chain: Option<EndpointConfig>,
}

/// A JSON-RPC wallet endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// JSON-RPC URL.
    pub endpoint: String,
    /// Whether the wallet behind it identifies as MetaMask.
    #[serde(default)]
    pub is_metamask: bool,
}

/// Severity of a [`ConfigIssue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueLevel {
    /// Works, but probably not what was meant.
    Warning,
    /// Will fail at runtime.
    Error,
}

/// A problem found by [`MemedexConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    /// Severity.
    pub level: IssueLevel,
    /// Dotted path of the offending field.
    pub field: String,
    /// What is wrong.
    pub message: String,
}

impl ConfigIssue {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl MemedexConfig {
    /// Parse from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed JSON.
    pub fn from_json(content: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Apply environment overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(BACKEND_URL_ENV) {
            if !url.trim().is_empty() {
                debug!(%url, "backend url overridden from environment");
                self.backend.url = url;
            }
        }
        self
    }

    /// Check the configuration for problems.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if Url::parse(&self.backend.url).is_err() {
            issues.push(ConfigIssue::error("backend.url", "not a valid URL"));
        }
        if self.backend.timeout_secs == 0 {
            issues.push(ConfigIssue::error("backend.timeout_secs", "must be non-zero"));
        }
        if self.wallet.poll_interval_ms == 0 {
            issues.push(ConfigIssue::error("wallet.poll_interval_ms", "must be non-zero"));
        }

        for (field, endpoint) in [
            ("providers.ethereum", &self.providers.ethereum),
            ("providers.binance_chain", &self.providers.binance_chain),
        ] {
            if let Some(ep) = endpoint {
                if Url::parse(&ep.endpoint).is_err() {
                    issues.push(ConfigIssue::error(
                        format!("{field}.endpoint"),
                        "not a valid URL",
                    ));
                }
            }
        }
        if self.providers.ethereum.is_none() && self.providers.binance_chain.is_none() {
            issues.push(ConfigIssue::warning(
                "providers",
                "no wallet endpoint configured, connect will report the wallet as unavailable",
            ));
        }

        for (chain_id, network) in &self.networks {
            if Url::parse(&network.rpc_url).is_err() {
                issues.push(ConfigIssue::error(
                    format!("networks.{chain_id}.rpc_url"),
                    "not a valid URL",
                ));
            }
        }

        issues
    }

    /// Built-in networks plus the configured extras.
    #[must_use]
    pub fn network_registry(&self) -> NetworkRegistry {
        self.networks
            .iter()
            .fold(NetworkRegistry::builtin(), |registry, (id, network)| {
                registry.with(*id, network.clone())
            })
    }

    /// Build the provider environment from the configured endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if an endpoint URL is malformed.
    pub fn injected_providers(&self) -> ConfigResult<InjectedProviders> {
        let mut env = InjectedProviders::new();
        if let Some(ep) = &self.providers.ethereum {
            let provider = HttpEip1193::builder(&ep.endpoint)
                .metamask(ep.is_metamask)
                .poll_interval(self.wallet.poll_interval())
                .build()?;
            env = env.with_ethereum(Arc::new(provider));
        }
        if let Some(ep) = &self.providers.binance_chain {
            let provider = HttpEip1193::builder(&ep.endpoint)
                .poll_interval(self.wallet.poll_interval())
                .build()?;
            env = env.with_binance_chain(Arc::new(provider));
        }
        Ok(env)
    }
}

/// Directory holding memedex configuration.
#[must_use]
pub fn config_dir() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("memedex")
}

/// Default configuration file path.
#[must_use]
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load configuration from `path`, or the default path.
///
/// A missing file yields the defaults. Environment overrides are applied.
///
/// # Errors
///
/// Fails if the file exists but cannot be read or parsed.
pub async fn load_config(path: Option<&Path>) -> ConfigResult<MemedexConfig> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    let config = match tokio::fs::read_to_string(&path).await {
        Ok(content) => MemedexConfig::from_json(&content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file, using defaults");
            MemedexConfig::default()
        }
        Err(e) => return Err(e.into()),
    };
    Ok(config.with_env_overrides())
}

/// Write configuration to `path`, creating parent directories.
///
/// # Errors
///
/// Fails on IO or serialization errors.
pub async fn save_config(config: &MemedexConfig, path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, content).await?;
    Ok(())
}
