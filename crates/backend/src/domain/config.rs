//! Configuration for the monitor.
//!
//! Loaded once at startup from a TOML file, then patched from `EXPOSER_STORE_*`
//! environment variables. Any problem here is fatal: the monitor must not start
//! without a usable index store connection.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the environment variable that points at the config file
pub const CONFIG_PATH_ENV: &str = "EXPOSER_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Unable to read config file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Unable to parse config file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
  #[error("Invalid value for {key}: {value}")]
  InvalidOverride { key: &'static str, value: String },
  #[error("Invalid configuration: {0}")]
  Invalid(String),
  #[error("No config path given and no default config directory available")]
  NoConfigDir,
}

// ============================================================================
// Store Configuration
// ============================================================================

/// Connection parameters for the index store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  /// Store hostname, without scheme or port
  #[serde(alias = "URL")]
  pub url: String,

  /// Store port (default: 9200)
  #[serde(alias = "PORT")]
  pub port: u16,

  #[serde(alias = "USERNAME")]
  pub username: String,

  #[serde(alias = "PASSWORD")]
  pub password: String,

  /// URL scheme, "https" or "http" (default: https)
  pub scheme: String,

  /// Skip TLS certificate verification (default: true)
  pub accept_invalid_certs: bool,

  /// Per-request timeout in seconds (default: 20)
  pub timeout_secs: u64,

  /// Retries for transient transport failures and 429/5xx (default: 2, 0 disables)
  pub max_retries: u32,

  /// Primary shards for the session index (default: 1)
  pub shards: u32,

  /// Replicas for the session index (default: 2)
  pub replicas: u32,

  /// Appended to the session start time to build the index name
  pub index_suffix: String,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      url: "localhost".to_string(),
      port: 9200,
      username: "elastic".to_string(),
      password: String::new(),
      scheme: "https".to_string(),
      accept_invalid_certs: true,
      timeout_secs: 20,
      max_retries: 2,
      shards: 1,
      replicas: 2,
      index_suffix: "_uncover_results".to_string(),
    }
  }
}

impl StoreConfig {
  /// Base URL of the store, e.g. `https://localhost:9200`
  pub fn base_url(&self) -> String {
    format!("{}://{}:{}", self.scheme, self.url, self.port)
  }
}

// ============================================================================
// Discovery Configuration
// ============================================================================

/// Settings passed through to the discovery tool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
  /// Executable to run (default: "uncover", resolved through PATH)
  pub binary: String,

  /// Maximum results per provider per pass (default: 50)
  pub limit: u32,

  /// Per-provider query timeout in seconds (default: 20)
  pub timeout_secs: u64,

  /// Provider-side retries (default: 2)
  pub retries: u32,
}

impl Default for DiscoveryConfig {
  fn default() -> Self {
    Self {
      binary: "uncover".to_string(),
      limit: 50,
      timeout_secs: 20,
      retries: 2,
    }
  }
}

// ============================================================================
// Session Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
  /// Pause between polling passes in seconds (default: 10)
  pub poll_interval_secs: u64,

  /// Extra lookup/write rounds after losing a write race (default: 3)
  pub conflict_retries: u32,

  /// Wall-clock cap on one polling pass in seconds, 0 disables (default: 300)
  pub pass_timeout_secs: u64,
}

impl SessionConfig {
  pub fn pass_timeout(&self) -> Option<Duration> {
    (self.pass_timeout_secs > 0).then(|| Duration::from_secs(self.pass_timeout_secs))
  }
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      poll_interval_secs: 10,
      conflict_retries: 3,
      pass_timeout_secs: 300,
    }
  }
}

// ============================================================================
// Root Configuration
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub store: StoreConfig,
  pub discovery: DiscoveryConfig,
  pub session: SessionConfig,
}

impl Config {
  /// Load config from a file and apply environment overrides.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;

    let mut config = Self::parse(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;

    config.apply_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
  }

  pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
    toml::from_str(content)
  }

  /// Resolve the config path: explicit path, then `EXPOSER_CONFIG`, then the user config dir.
  pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
      return Ok(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
      return Ok(PathBuf::from(path));
    }

    Self::user_config_path().ok_or(ConfigError::NoConfigDir)
  }

  /// Get the user-level config path
  pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("exposer").join("config.toml"))
  }

  /// Apply `EXPOSER_STORE_*` overrides using the given lookup.
  ///
  /// Takes the lookup as a closure so tests don't have to touch the process environment.
  pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
  where
    F: Fn(&str) -> Option<String>,
  {
    if let Some(url) = lookup("EXPOSER_STORE_URL") {
      self.store.url = url;
    }
    if let Some(port) = lookup("EXPOSER_STORE_PORT") {
      self.store.port = port.trim().parse().map_err(|_| ConfigError::InvalidOverride {
        key: "EXPOSER_STORE_PORT",
        value: port,
      })?;
    }
    if let Some(username) = lookup("EXPOSER_STORE_USERNAME") {
      self.store.username = username;
    }
    if let Some(password) = lookup("EXPOSER_STORE_PASSWORD") {
      self.store.password = password;
    }
    Ok(())
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.store.url.trim().is_empty() {
      return Err(ConfigError::Invalid("store.url must not be empty".to_string()));
    }
    if !matches!(self.store.scheme.as_str(), "http" | "https") {
      return Err(ConfigError::Invalid(format!(
        "store.scheme must be http or https, got '{}'",
        self.store.scheme
      )));
    }
    if self.store.index_suffix.chars().any(|c| c.is_ascii_uppercase()) {
      return Err(ConfigError::Invalid("store.index_suffix must be lowercase".to_string()));
    }
    Ok(())
  }

  /// Copy of the config that is safe to print
  pub fn redacted(&self) -> Self {
    let mut config = self.clone();
    if !config.store.password.is_empty() {
      config.store.password = "********".to_string();
    }
    config
  }

  /// Generate a default config file as a string
  pub fn template() -> String {
    let defaults = Self::default();
    format!(
      r#"# exposer configuration
# Default location: ~/.config/exposer/config.toml (override with --config or EXPOSER_CONFIG)

# ============================================================================
# Index store (Elasticsearch-compatible)
# ============================================================================
[store]
# Hostname only; scheme and port are separate
url = "{url}"
port = {port}
username = "{username}"
# Prefer EXPOSER_STORE_PASSWORD over storing it here
password = ""
scheme = "{scheme}"
# Accept self-signed certificates
accept_invalid_certs = {accept_invalid_certs}
timeout_secs = {store_timeout}
# Retries on connection errors and 429/502/503/504 (0 disables)
max_retries = {max_retries}
# Settings for the per-session index
shards = {shards}
replicas = {replicas}
index_suffix = "{index_suffix}"

# ============================================================================
# Discovery tool
# ============================================================================
[discovery]
binary = "{binary}"
limit = {limit}
timeout_secs = {discovery_timeout}
retries = {retries}

# ============================================================================
# Session
# ============================================================================
[session]
# Seconds to sleep between polling passes
poll_interval_secs = {poll_interval}
conflict_retries = {conflict_retries}
# Give up on a discovery pass that runs longer than this (0 disables)
pass_timeout_secs = {pass_timeout}
"#,
      url = defaults.store.url,
      port = defaults.store.port,
      username = defaults.store.username,
      scheme = defaults.store.scheme,
      accept_invalid_certs = defaults.store.accept_invalid_certs,
      store_timeout = defaults.store.timeout_secs,
      max_retries = defaults.store.max_retries,
      shards = defaults.store.shards,
      replicas = defaults.store.replicas,
      index_suffix = defaults.store.index_suffix,
      binary = defaults.discovery.binary,
      limit = defaults.discovery.limit,
      discovery_timeout = defaults.discovery.timeout_secs,
      retries = defaults.discovery.retries,
      poll_interval = defaults.session.poll_interval_secs,
      conflict_retries = defaults.session.conflict_retries,
      pass_timeout = defaults.session.pass_timeout_secs,
    )
  }
}
