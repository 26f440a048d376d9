// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Reflexion Configuration Types
//
// Defines the configuration schema for the failure memory engine:
// - Storage backend and database location
// - Advisory thresholds and the store-error policy
// - Class-specific record lifetimes
// - Extra transient-error patterns
// - Periodic expiry sweeper

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::advisory::{AdvisoryPolicy, DEFAULT_BLOCK_THRESHOLD, DEFAULT_WARN_THRESHOLD};
use crate::domain::failure::TtlPolicy;
use crate::domain::repository::{SqliteConfig, StorageBackend};

/// Top-level reflexion configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReflexionConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub ttl: TtlConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub sweeper: SweeperConfig,

    /// Runtime version folded into environment snapshots taken by this host.
    /// Defaults to the engine's own version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Sqlite,
    InMemory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// Database file. `~/` is expanded. Defaults to `~/.aegis/reflexion.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: None,
        }
    }
}

/// What an advisory check returns when the store cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorPolicy {
    /// ALLOW with a diagnostic reason.
    #[default]
    FailOpen,
    /// BLOCK with a diagnostic reason.
    FailClosed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_warn_threshold")]
    pub warn_threshold: u32,

    #[serde(default = "default_block_threshold")]
    pub block_threshold: u32,

    #[serde(default)]
    pub store_error_policy: StoreErrorPolicy,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            warn_threshold: default_warn_threshold(),
            block_threshold: default_block_threshold(),
            store_error_policy: StoreErrorPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlConfig {
    /// Lifetime of logic/syntax-class failures
    #[serde(default = "default_hard_ttl", with = "humantime_serde")]
    pub hard: Duration,

    /// Lifetime of transient failures
    #[serde(default = "default_soft_ttl", with = "humantime_serde")]
    pub soft: Duration,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            hard: default_hard_ttl(),
            soft: default_soft_ttl(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_soft_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: default_sweep_interval(),
        }
    }
}

impl ReflexionConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Discover configuration file using precedence order
    /// 1. REFLEXION_CONFIG_PATH environment variable
    /// 2. ./reflexion-config.yaml (working directory)
    /// 3. ~/.aegis/reflexion.yaml (user home)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("REFLEXION_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./reflexion-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".aegis").join("reflexion.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading reflexion configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!(
                "Loading reflexion configuration from discovered path: {:?}",
                config_path
            );
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::debug!("No reflexion configuration file found. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("REFLEXION_DB_PATH") {
            if !val.trim().is_empty() {
                tracing::info!("Environment override: REFLEXION_DB_PATH={}", val);
                self.storage.backend = BackendKind::Sqlite;
                self.storage.path = Some(PathBuf::from(val));
            }
        }

        for (var, slot) in [
            ("REFLEXION_WARN_THRESHOLD", &mut self.policy.warn_threshold),
            ("REFLEXION_BLOCK_THRESHOLD", &mut self.policy.block_threshold),
        ] {
            if let Ok(val) = std::env::var(var) {
                match val.trim().parse::<u32>() {
                    Ok(parsed) => {
                        tracing::info!("Environment override: {}={}", var, parsed);
                        *slot = parsed;
                    }
                    Err(_) => {
                        tracing::warn!(
                            "Invalid value for {}: '{}'. Expected a positive integer. Ignoring.",
                            var,
                            val
                        );
                    }
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.policy.warn_threshold == 0 {
            anyhow::bail!("policy.warn_threshold must be at least 1");
        }
        if self.policy.block_threshold < self.policy.warn_threshold {
            anyhow::bail!(
                "policy.block_threshold ({}) must not be lower than policy.warn_threshold ({})",
                self.policy.block_threshold,
                self.policy.warn_threshold
            );
        }
        if self.ttl.hard.is_zero() || self.ttl.soft.is_zero() {
            anyhow::bail!("ttl.hard and ttl.soft must be non-zero");
        }
        self.ttl_policy()?;
        if self.sweeper.enabled && self.sweeper.interval.is_zero() {
            anyhow::bail!("sweeper.interval must be non-zero when the sweeper is enabled");
        }
        if let Some(path) = &self.storage.path {
            if path.as_os_str().is_empty() {
                anyhow::bail!("storage.path must not be empty");
            }
        }
        Ok(())
    }

    pub fn advisory_policy(&self) -> AdvisoryPolicy {
        AdvisoryPolicy {
            warn_threshold: self.policy.warn_threshold,
            block_threshold: self.policy.block_threshold,
        }
    }

    pub fn ttl_policy(&self) -> anyhow::Result<TtlPolicy> {
        let hard = chrono::Duration::from_std(self.ttl.hard)
            .map_err(|e| anyhow::anyhow!("ttl.hard out of range: {}", e))?;
        let soft = chrono::Duration::from_std(self.ttl.soft)
            .map_err(|e| anyhow::anyhow!("ttl.soft out of range: {}", e))?;

        let now = chrono::Utc::now();
        for (name, ttl) in [("ttl.hard", hard), ("ttl.soft", soft)] {
            if now.checked_sub_signed(ttl).is_none() {
                anyhow::bail!(
                    "{} out of range: {:?} reaches before the earliest timestamp",
                    name,
                    ttl
                );
            }
        }
        Ok(TtlPolicy::new(hard, soft))
    }

    /// Resolved database location, `~/` expanded.
    pub fn database_path(&self) -> PathBuf {
        match &self.storage.path {
            Some(path) => expand_home(path),
            None => default_database_path(),
        }
    }

    pub fn storage_backend(&self) -> StorageBackend {
        match self.storage.backend {
            BackendKind::InMemory => StorageBackend::InMemory,
            BackendKind::Sqlite => StorageBackend::Sqlite(SqliteConfig {
                path: self.database_path(),
            }),
        }
    }

    pub fn runtime_version(&self) -> String {
        self.runtime_version
            .clone()
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string())
    }
}

/// `~/.aegis/reflexion.db`, or `./.aegis/reflexion.db` when no home directory is known.
pub fn default_database_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".aegis")
        .join("reflexion.db")
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

fn default_backend() -> BackendKind {
    BackendKind::Sqlite
}

fn default_warn_threshold() -> u32 {
    DEFAULT_WARN_THRESHOLD
}

fn default_block_threshold() -> u32 {
    DEFAULT_BLOCK_THRESHOLD
}

fn default_hard_ttl() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_soft_ttl() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(10 * 60)
}
