// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Store maintenance and introspection commands
//!
//! Commands: sweep, stats, list

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use aegis_reflexion::application::AdvisoryService;
use aegis_reflexion::FailureRecord;

use super::open_service;

pub async fn sweep(config_override: Option<PathBuf>) -> Result<()> {
    let (_, service) = open_service(config_override).await?;

    let removed = service.sweep_expired().await.context("Failed to sweep expired records")?;

    println!("{}", format!("✓ Removed {} expired record(s)", removed).green());
    Ok(())
}

pub async fn stats(json: bool, config_override: Option<PathBuf>) -> Result<()> {
    let (config, service) = open_service(config_override).await?;
    let stats = service.stats().await.context("Failed to read statistics")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&stats).context("Failed to serialize statistics")?
        );
        return Ok(());
    }

    println!("{}", "Failure store:".bold());
    println!("  Location: {}", config.database_path().display());
    println!("  Records: {}", stats.total);
    println!(
        "  Pending: {}  Resolved: {}  Ignored: {}",
        stats.pending, stats.resolved, stats.ignored
    );
    println!("  HARD: {}  SOFT: {}", stats.hard, stats.soft);
    println!("  Expired (awaiting sweep): {}", stats.expired);
    println!(
        "  Blocking (>= {} failures): {}",
        config.policy.block_threshold,
        stats.blocking.to_string().red()
    );
    println!();

    if !stats.top_tools.is_empty() {
        println!("{}", "Tools with pending failures:".bold());
        for tool in &stats.top_tools {
            println!(
                "  {} - {} failure(s) across {} call(s)",
                tool.tool_name.bold(),
                tool.failures,
                tool.records
            );
        }
    }

    Ok(())
}

pub async fn list(limit: usize, json: bool, config_override: Option<PathBuf>) -> Result<()> {
    let (_, service) = open_service(config_override).await?;
    let records = service
        .recent_failures(limit)
        .await
        .context("Failed to list failure records")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&records).context("Failed to serialize records")?
        );
        return Ok(());
    }

    if records.is_empty() {
        println!("{}", "No failure records".dimmed());
        return Ok(());
    }

    for record in &records {
        print_record(record);
    }
    Ok(())
}

fn print_record(record: &FailureRecord) {
    println!(
        "{} {} x{} [{}] {}",
        record.updated_at.format("%Y-%m-%d %H:%M:%S"),
        record.tool_name.bold(),
        record.retry_count,
        record.error_type,
        record.evolution_status
    );
    println!("    {}", record.error_message);
    println!(
        "    {}",
        format!("sig {} env {}", record.tool_signature, record.env_snapshot_hash).dimmed()
    );
}
