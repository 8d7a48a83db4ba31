// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Policy Configuration Types
//
// Defines the configuration schema for the assessment service:
// - Kubernetes-style header (apiVersion/kind)
// - Rule database location and pool size
// - Object cache policy
// - Preference, rejection and rearm state files
// - Explicit set bundle location and import cadence
// - Deferred scheduler and authorization settings

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "100monkeys.ai/v1";
pub const KIND: &str = "PolicyConfig";

/// Top-level policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// API version (must be "100monkeys.ai/v1")
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,

    /// Resource kind (must be "PolicyConfig")
    #[serde(default = "default_kind")]
    pub kind: String,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub state: StateConfig,

    #[serde(default)]
    pub explicit_set: ExplicitSetConfig,

    #[serde(default)]
    pub notarization: NotarizationConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub authorization: AuthorizationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Rule database file
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Database of a previous installation, migrated once by `migrate-legacy`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Record verdicts in the object cache
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lifetime of negative "no matching rule" entries
    #[serde(with = "humantime_serde", default = "default_negative_hold")]
    pub negative_hold: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Master switch file
    #[serde(default = "default_preferences_path")]
    pub preferences: PathBuf,

    /// Most recent rejection, readable by unprivileged callers
    #[serde(default = "default_last_rejection_path")]
    pub last_rejection: PathBuf,

    /// Timestamp of the last disable, used to re-enable assessments
    #[serde(default = "default_rearm_path")]
    pub rearm: PathBuf,

    #[serde(with = "humantime_serde", default = "default_rearm_after")]
    pub rearm_after: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplicitSetConfig {
    #[serde(default = "default_explicit_auth_path")]
    pub auth_file: PathBuf,

    #[serde(default = "default_explicit_signatures_path")]
    pub signatures_file: PathBuf,

    /// Minimum time between two import attempts
    #[serde(with = "humantime_serde", default = "default_explicit_interval")]
    pub check_interval: Duration,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotarizationConfig {
    /// JSON map of content hash to ticket status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tickets_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// Only fire deferred evaluations while on external power
    #[serde(default = "default_true")]
    pub require_ac_power: bool,

    #[serde(default = "default_power_supply_dir")]
    pub power_supply_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationConfig {
    /// Effective uid 0 may update rules without a token
    #[serde(default = "default_true")]
    pub allow_root: bool,

    /// Lowercase hex SHA-256 digests of accepted tokens
    #[serde(default)]
    pub token_digests: Vec<String>,
}

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind() -> String {
    KIND.to_string()
}

fn default_true() -> bool {
    true
}

fn default_database_path() -> PathBuf {
    PathBuf::from("/var/lib/gatekeeper/policy.db")
}

fn default_max_connections() -> u32 {
    4
}

fn default_negative_hold() -> Duration {
    Duration::from_secs(60)
}

fn default_preferences_path() -> PathBuf {
    PathBuf::from("/var/lib/gatekeeper/preferences.yaml")
}

fn default_last_rejection_path() -> PathBuf {
    PathBuf::from("/var/lib/gatekeeper/last-rejection.json")
}

fn default_rearm_path() -> PathBuf {
    PathBuf::from("/var/lib/gatekeeper/rearm")
}

fn default_rearm_after() -> Duration {
    Duration::from_secs(30 * 24 * 60 * 60)
}

fn default_explicit_auth_path() -> PathBuf {
    PathBuf::from("/var/lib/gatekeeper/explicit/auth.json")
}

fn default_explicit_signatures_path() -> PathBuf {
    PathBuf::from("/var/lib/gatekeeper/explicit/signatures.json")
}

fn default_explicit_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_power_supply_dir() -> PathBuf {
    PathBuf::from("/sys/class/power_supply")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            legacy_path: None,
            max_connections: default_max_connections(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            negative_hold: default_negative_hold(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            preferences: default_preferences_path(),
            last_rejection: default_last_rejection_path(),
            rearm: default_rearm_path(),
            rearm_after: default_rearm_after(),
        }
    }
}

impl Default for ExplicitSetConfig {
    fn default() -> Self {
        Self {
            auth_file: default_explicit_auth_path(),
            signatures_file: default_explicit_signatures_path(),
            check_interval: default_explicit_interval(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            require_ac_power: true,
            power_supply_dir: default_power_supply_dir(),
        }
    }
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            allow_root: true,
            token_digests: Vec::new(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            state: StateConfig::default(),
            explicit_set: ExplicitSetConfig::default(),
            notarization: NotarizationConfig::default(),
            scheduler: SchedulerConfig::default(),
            authorization: AuthorizationConfig::default(),
        }
    }
}

impl PolicyConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. GATEKEEPER_CONFIG_PATH environment variable
    /// 2. ./gatekeeper.yaml (working directory)
    /// 3. ~/.gatekeeper/config.yaml (user home)
    /// 4. /etc/gatekeeper/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("GATEKEEPER_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./gatekeeper.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".gatekeeper").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/gatekeeper/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::debug!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("GATEKEEPER_DATABASE") {
            if !val.is_empty() {
                tracing::info!("Environment override: GATEKEEPER_DATABASE={}", val);
                self.database.path = PathBuf::from(val);
            }
        }

        if let Ok(val) = std::env::var("GATEKEEPER_CACHE_ENABLED") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => {
                    tracing::info!("Environment override: GATEKEEPER_CACHE_ENABLED=true");
                    self.cache.enabled = true;
                }
                "false" | "0" | "no" | "off" => {
                    tracing::info!("Environment override: GATEKEEPER_CACHE_ENABLED=false");
                    self.cache.enabled = false;
                }
                _ => {
                    tracing::warn!(
                        "Invalid value for GATEKEEPER_CACHE_ENABLED: '{}'. Expected true/false. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        let paths = [
            ("database.path", &self.database.path),
            ("state.preferences", &self.state.preferences),
            ("state.last_rejection", &self.state.last_rejection),
            ("state.rearm", &self.state.rearm),
            ("explicit_set.auth_file", &self.explicit_set.auth_file),
            ("explicit_set.signatures_file", &self.explicit_set.signatures_file),
        ];
        for (name, path) in paths {
            if path.as_os_str().is_empty() {
                anyhow::bail!("{} cannot be empty", name);
            }
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("database.max_connections must be at least 1");
        }

        if self.cache.negative_hold.is_zero() {
            anyhow::bail!("cache.negative_hold must be greater than zero");
        }

        if self.scheduler.poll_interval.is_zero() {
            anyhow::bail!("scheduler.poll_interval must be greater than zero");
        }

        for digest in &self.authorization.token_digests {
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                anyhow::bail!(
                    "authorization.token_digests entry '{}' is not a SHA-256 hex digest",
                    digest
                );
            }
        }

        Ok(())
    }
}
