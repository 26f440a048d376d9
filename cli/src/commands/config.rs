// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use aegis_reflexion::domain::reflexion_config::{ReflexionConfig, StoreErrorPolicy};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = ReflexionConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. REFLEXION_CONFIG_PATH: {}",
            std::env::var("REFLEXION_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./reflexion-config.yaml");
        println!("  4. ~/.aegis/reflexion.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Storage:".bold());
    println!("  Backend: {:?}", config.storage.backend);
    println!("  Path: {}", config.database_path().display());
    println!();

    println!("{}", "Policy:".bold());
    println!("  Warn threshold: {}", config.policy.warn_threshold);
    println!("  Block threshold: {}", config.policy.block_threshold);
    let on_store_error = match config.policy.store_error_policy {
        StoreErrorPolicy::FailOpen => "fail open (ALLOW)",
        StoreErrorPolicy::FailClosed => "fail closed (BLOCK)",
    };
    println!("  On store error: {}", on_store_error);
    println!();

    println!("{}", "Record lifetimes:".bold());
    println!("  HARD: {}", humanize(config.ttl.hard));
    println!("  SOFT: {}", humanize(config.ttl.soft));
    println!();

    if !config.classifier.extra_soft_patterns.is_empty() {
        println!("{}", "Extra transient-error patterns:".bold());
        for pattern in &config.classifier.extra_soft_patterns {
            println!("  - {}", pattern);
        }
        println!();
    }

    println!("{}", "Sweeper:".bold());
    if config.sweeper.enabled {
        println!("  Every {}", humanize(config.sweeper.interval));
    } else {
        println!("  {}", "disabled".dimmed());
    }
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = ReflexionConfig::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

fn humanize(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    match secs {
        s if s > 0 && s % 86_400 == 0 => format!("{}d", s / 86_400),
        s if s > 0 && s % 3_600 == 0 => format!("{}h", s / 3_600),
        s if s > 0 && s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{}s", s),
    }
}
