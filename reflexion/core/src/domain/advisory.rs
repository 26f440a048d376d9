// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Advisory Verdicts
//!
//! The engine answers every pre-execution check with an [`Advisory`]:
//!
//! | Result | Caller behaviour |
//! |--------|------------------|
//! | `Allow` | execute normally |
//! | `Warn`  | execute, surface `reason` next to the result |
//! | `Block` | do not execute, surface `reason` to the requester |
//!
//! [`AdvisoryPolicy::evaluate`] is the pure decision function; the application
//! service only feeds it the PENDING candidates loaded from the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::environment::EnvironmentHash;
use super::failure::{FailureRecord, TtlPolicy};

pub const DEFAULT_WARN_THRESHOLD: u32 = 1;
pub const DEFAULT_BLOCK_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdvisoryResult {
    Allow,
    Warn,
    Block,
}

impl AdvisoryResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdvisoryResult::Allow => "ALLOW",
            AdvisoryResult::Warn => "WARN",
            AdvisoryResult::Block => "BLOCK",
        }
    }
}

impl std::fmt::Display for AdvisoryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advisory {
    pub result: AdvisoryResult,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matching_record: Option<FailureRecord>,
    pub retry_count: u32,
    /// Set when the store could not be consulted and the verdict comes from
    /// the store-error policy instead of recorded history.
    #[serde(default)]
    pub degraded: bool,
}

impl Advisory {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            result: AdvisoryResult::Allow,
            reason: reason.into(),
            matching_record: None,
            retry_count: 0,
            degraded: false,
        }
    }

    /// Only BLOCK stops execution.
    pub fn permits_execution(&self) -> bool {
        self.result != AdvisoryResult::Block
    }

    pub fn is_blocked(&self) -> bool {
        self.result == AdvisoryResult::Block
    }
}

/// Threshold-based decision policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvisoryPolicy {
    pub warn_threshold: u32,
    pub block_threshold: u32,
}

impl Default for AdvisoryPolicy {
    fn default() -> Self {
        Self {
            warn_threshold: DEFAULT_WARN_THRESHOLD,
            block_threshold: DEFAULT_BLOCK_THRESHOLD,
        }
    }
}

impl AdvisoryPolicy {
    /// Decide on a call described by `call` (e.g. `file_read({"path":"x"})`)
    /// given the PENDING candidates for its signature, most recently updated first.
    pub fn evaluate(
        &self,
        call: &str,
        env: &EnvironmentHash,
        candidates: &[FailureRecord],
        ttl: &TtlPolicy,
        now: DateTime<Utc>,
    ) -> Advisory {
        let live: Vec<&FailureRecord> = candidates.iter().filter(|r| r.is_live(now, ttl)).collect();

        if live.is_empty() {
            return Advisory::allow("No previous failures recorded for this operation");
        }

        for record in &live {
            if record.env_snapshot_hash != *env {
                continue;
            }

            let count = record.retry_count;
            if count >= self.block_threshold {
                return Advisory {
                    result: AdvisoryResult::Block,
                    reason: format!(
                        "BLOCKED: {} has failed {} times in this environment. Last error: {}. \
                         Change the parameters or the environment before retrying.",
                        call,
                        count,
                        last_error(record)
                    ),
                    matching_record: Some((*record).clone()),
                    retry_count: count,
                    degraded: false,
                };
            }
            if count >= self.warn_threshold {
                return Advisory {
                    result: AdvisoryResult::Warn,
                    reason: format!(
                        "WARNING: {} failed {} time{} in this environment. Last error: {}",
                        call,
                        count,
                        if count == 1 { "" } else { "s" },
                        last_error(record)
                    ),
                    matching_record: Some((*record).clone()),
                    retry_count: count,
                    degraded: false,
                };
            }

            let mut advisory = Advisory::allow(format!(
                "{} failed {} time{} in this environment, below the warning threshold",
                call,
                count,
                if count == 1 { "" } else { "s" },
            ));
            advisory.matching_record = Some((*record).clone());
            advisory.retry_count = count;
            return advisory;
        }

        let elsewhere: u32 = live.iter().map(|r| r.retry_count).max().unwrap_or(0);
        Advisory::allow(format!(
            "Environment changed, retry permitted ({} previously failed up to {} time{} elsewhere)",
            call,
            elsewhere,
            if elsewhere == 1 { "" } else { "s" },
        ))
    }
}

fn last_error(record: &FailureRecord) -> &str {
    let message = record.error_message.trim();
    if message.is_empty() {
        "(no error message)"
    } else {
        message
    }
}
