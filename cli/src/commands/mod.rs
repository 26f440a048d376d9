// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the reflexion CLI

pub mod advisory;
pub mod config;
pub mod store;

pub use self::config::ConfigCommand;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::Value;
use std::path::PathBuf;

use aegis_reflexion::application::{create_failure_repository, StandardAdvisoryService};
use aegis_reflexion::domain::reflexion_config::ReflexionConfig;
use aegis_reflexion::EnvironmentSnapshot;

/// A tool call as given on the command line.
#[derive(Args, Debug)]
pub struct CallArgs {
    /// Tool name
    #[arg(value_name = "TOOL")]
    pub tool: String,

    /// Tool parameters as a JSON object
    #[arg(short, long, default_value = "{}", value_name = "JSON")]
    pub params: String,

    #[command(flatten)]
    pub env: EnvArgs,
}

impl CallArgs {
    pub fn params(&self) -> Result<Value> {
        serde_json::from_str(&self.params)
            .with_context(|| format!("--params is not valid JSON: {}", self.params))
    }
}

/// Environment snapshot overrides. Unset fields come from the current process.
#[derive(Args, Debug, Default)]
pub struct EnvArgs {
    /// Working directory of the call
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Platform identifier (e.g. linux)
    #[arg(long)]
    pub platform: Option<String>,

    /// Runtime version (only major.minor is significant)
    #[arg(long)]
    pub runtime_version: Option<String>,

    /// File in the call's context; repeatable
    #[arg(long = "file", value_name = "PATH")]
    pub files: Vec<String>,
}

impl EnvArgs {
    pub fn snapshot(&self, config: &ReflexionConfig) -> EnvironmentSnapshot {
        let runtime_version = self
            .runtime_version
            .clone()
            .unwrap_or_else(|| config.runtime_version());

        let mut snapshot = EnvironmentSnapshot::capture(runtime_version);
        if let Some(cwd) = &self.cwd {
            snapshot.working_directory = cwd.clone();
        }
        if let Some(platform) = &self.platform {
            snapshot.platform = platform.clone();
        }
        if !self.files.is_empty() {
            snapshot = snapshot.with_file_context(self.files.iter());
        }
        snapshot
    }
}

/// Load configuration and open the configured store.
pub async fn open_service(
    config_override: Option<PathBuf>,
) -> Result<(ReflexionConfig, StandardAdvisoryService)> {
    let config = ReflexionConfig::load_or_default(config_override)
        .context("Failed to load configuration")?;

    let backend = config.storage_backend();
    let repository = create_failure_repository(&backend)
        .await
        .with_context(|| format!("Failed to open failure store ({:?})", backend))?;
    tracing::debug!(backend = ?backend, "Opened failure store");

    let service = StandardAdvisoryService::from_config(repository, &config)
        .context("Invalid reflexion configuration")?;

    Ok((config, service))
}
