// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Advisory commands for a single tool call
//!
//! Commands: check, record, clear, ignore

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use aegis_reflexion::application::AdvisoryService;
use aegis_reflexion::domain::reflexion_config::ReflexionConfig;
use aegis_reflexion::{Advisory, AdvisoryResult, EnvironmentHash};

use super::{open_service, CallArgs};

/// Exit status of `check` when the call is blocked.
pub const BLOCKED_EXIT_CODE: u8 = 2;

/// Process exit status for an advisory: [`BLOCKED_EXIT_CODE`] on BLOCK, 0 otherwise.
pub fn exit_status(advisory: &Advisory) -> u8 {
    if advisory.is_blocked() {
        BLOCKED_EXIT_CODE
    } else {
        0
    }
}

/// Print the advisory for a call and return the exit status for it.
pub async fn check(call: CallArgs, json: bool, config_override: Option<PathBuf>) -> Result<u8> {
    let params = call.params()?;
    let (config, service) = open_service(config_override).await?;
    let env = call.env.snapshot(&config).hash();

    let advisory = service.check(&call.tool, &params, &env).await;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&advisory).context("Failed to serialize advisory")?
        );
    } else {
        let label = match advisory.result {
            AdvisoryResult::Allow => advisory.result.as_str().green(),
            AdvisoryResult::Warn => advisory.result.as_str().yellow(),
            AdvisoryResult::Block => advisory.result.as_str().red(),
        };
        println!("{} {}", label.bold(), advisory.reason);
        if advisory.retry_count > 0 {
            println!("  Failures in this environment: {}", advisory.retry_count);
        }
        if advisory.degraded {
            println!(
                "  {}",
                "Failure store unavailable; verdict from store_error_policy".dimmed()
            );
        }
    }

    Ok(exit_status(&advisory))
}

pub async fn record(call: CallArgs, error: &str, config_override: Option<PathBuf>) -> Result<()> {
    let params = call.params()?;
    let (config, service) = open_service(config_override).await?;
    let env = call.env.snapshot(&config).hash();

    let record = service
        .record_failure(&call.tool, &params, error, &env)
        .await
        .context("Failed to record failure")?;

    println!(
        "{}",
        format!(
            "✓ Recorded {} failure #{} for {} ({})",
            record.error_type, record.retry_count, record.tool_name, record.evolution_status
        )
        .green()
    );
    println!("  Signature: {}", record.tool_signature.as_str().dimmed());
    println!("  Environment: {}", record.env_snapshot_hash.as_str().dimmed());

    Ok(())
}

pub async fn clear(
    call: CallArgs,
    all_envs: bool,
    config_override: Option<PathBuf>,
) -> Result<()> {
    let params = call.params()?;
    let (config, service) = open_service(config_override).await?;
    let env = scope(&call, all_envs, &config);

    let changed = service
        .clear_failure(&call.tool, &params, env.as_ref())
        .await
        .context("Failed to clear failure")?;

    report(changed, "resolved", &call.tool);
    Ok(())
}

pub async fn ignore(
    call: CallArgs,
    all_envs: bool,
    config_override: Option<PathBuf>,
) -> Result<()> {
    let params = call.params()?;
    let (config, service) = open_service(config_override).await?;
    let env = scope(&call, all_envs, &config);

    let changed = service
        .ignore_failure(&call.tool, &params, env.as_ref())
        .await
        .context("Failed to ignore failure")?;

    report(changed, "ignored", &call.tool);
    Ok(())
}

fn scope(call: &CallArgs, all_envs: bool, config: &ReflexionConfig) -> Option<EnvironmentHash> {
    if all_envs {
        None
    } else {
        Some(call.env.snapshot(config).hash())
    }
}

fn report(changed: bool, verb: &str, tool: &str) {
    if changed {
        println!("{}", format!("✓ Pending failures of {} {}", tool, verb).green());
    } else {
        println!(
            "{}",
            format!("No pending failures of {} to mark {}", tool, verb).yellow()
        );
    }
}
