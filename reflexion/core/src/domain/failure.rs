// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Failure Record Aggregate
//!
//! A [`FailureRecord`] is the single persisted entity of the reflexion engine:
//! one row per (`tool_signature`, `env_snapshot_hash`) pair.
//!
//! ## Lifecycle
//!
//! ```text
//! first failure            → PENDING, retry_count = 1
//! repeated failure         → PENDING, retry_count += 1, updated_at refreshed
//! success / explicit clear → RESOLVED
//! operator override        → IGNORED
//! TTL elapsed              → logically absent, physically deleted by the sweep
//! ```
//!
//! ## Invariants
//!
//! - `retry_count` never decreases within a lifecycle and only grows while PENDING.
//! - A record older than its class TTL (measured from `updated_at`) is expired
//!   on every read path, swept or not.
//! - RESOLVED and IGNORED records never block.
//! - A failure reported against a RESOLVED or expired record starts a new
//!   lifecycle for that key (PENDING, count 1, fresh `created_at`).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::environment::EnvironmentHash;
use super::signature::ToolSignature;

/// Coarse severity class; controls how long a failure is remembered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    /// Logic/syntax-class failure that needs a code or content fix.
    Hard,
    /// Transient infrastructure failure expected to self-resolve.
    Soft,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Hard => "HARD",
            ErrorType::Soft => "SOFT",
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HARD" => Ok(ErrorType::Hard),
            "SOFT" => Ok(ErrorType::Soft),
            other => Err(format!("unknown error type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvolutionStatus {
    Pending,
    Resolved,
    Ignored,
}

impl EvolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvolutionStatus::Pending => "PENDING",
            EvolutionStatus::Resolved => "RESOLVED",
            EvolutionStatus::Ignored => "IGNORED",
        }
    }
}

impl std::fmt::Display for EvolutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvolutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(EvolutionStatus::Pending),
            "RESOLVED" => Ok(EvolutionStatus::Resolved),
            "IGNORED" => Ok(EvolutionStatus::Ignored),
            other => Err(format!("unknown evolution status '{}'", other)),
        }
    }
}

/// Class-specific lifetimes of failure records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub hard: Duration,
    pub soft: Duration,
}

impl TtlPolicy {
    pub fn new(hard: Duration, soft: Duration) -> Self {
        Self { hard, soft }
    }

    pub fn ttl_for(&self, error_type: ErrorType) -> Duration {
        match error_type {
            ErrorType::Hard => self.hard,
            ErrorType::Soft => self.soft,
        }
    }

    /// Records of `error_type` last updated before this instant are expired.
    ///
    /// Saturates at the earliest representable instant when the TTL reaches
    /// further back than chrono can express.
    pub fn cutoff(&self, error_type: ErrorType, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.ttl_for(error_type))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            hard: Duration::days(7),
            soft: Duration::hours(1),
        }
    }
}

/// One observed failure, as handed to the store's upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureAttempt {
    pub tool_signature: ToolSignature,
    pub env_snapshot_hash: EnvironmentHash,
    pub tool_name: String,
    pub error_type: ErrorType,
    pub error_message: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub tool_signature: ToolSignature,
    pub env_snapshot_hash: EnvironmentHash,
    pub tool_name: String,
    pub error_type: ErrorType,
    pub error_message: String,
    pub retry_count: u32,
    pub evolution_status: EvolutionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FailureRecord {
    /// First failure for a key.
    pub fn first_failure(attempt: &FailureAttempt) -> Self {
        Self {
            tool_signature: attempt.tool_signature.clone(),
            env_snapshot_hash: attempt.env_snapshot_hash.clone(),
            tool_name: attempt.tool_name.clone(),
            error_type: attempt.error_type,
            error_message: attempt.error_message.clone(),
            retry_count: 1,
            evolution_status: EvolutionStatus::Pending,
            created_at: attempt.observed_at,
            updated_at: attempt.observed_at,
        }
    }

    /// Fold a repeated failure for the same key into this record.
    pub fn register_repeat(&mut self, attempt: &FailureAttempt, ttl: &TtlPolicy) {
        let restart = self.evolution_status == EvolutionStatus::Resolved
            || self.is_expired(attempt.observed_at, ttl);

        if restart {
            *self = Self::first_failure(attempt);
            return;
        }

        if self.evolution_status == EvolutionStatus::Pending {
            self.retry_count = self.retry_count.saturating_add(1);
        }
        self.tool_name = attempt.tool_name.clone();
        self.error_type = attempt.error_type;
        self.error_message = attempt.error_message.clone();
        self.updated_at = attempt.observed_at;
    }

    pub fn expires_at(&self, ttl: &TtlPolicy) -> DateTime<Utc> {
        self.updated_at
            .checked_add_signed(ttl.ttl_for(self.error_type))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Expired once the age since `updated_at` exceeds the class TTL.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: &TtlPolicy) -> bool {
        now - self.updated_at > ttl.ttl_for(self.error_type)
    }

    pub fn is_pending(&self) -> bool {
        self.evolution_status == EvolutionStatus::Pending
    }

    /// Whether this record may influence an advisory at `now`.
    pub fn is_live(&self, now: DateTime<Utc>, ttl: &TtlPolicy) -> bool {
        self.is_pending() && !self.is_expired(now, ttl)
    }
}

/// Aggregate counts over the store, for introspection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureStats {
    pub total: u64,
    pub pending: u64,
    pub resolved: u64,
    pub ignored: u64,
    pub hard: u64,
    pub soft: u64,
    /// Rows past their TTL that the sweep has not deleted yet.
    pub expired: u64,
    /// Live PENDING rows at or above the block threshold.
    pub blocking: u64,
    /// Live PENDING rows per tool, most failures first.
    pub top_tools: Vec<ToolFailureCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailureCount {
    pub tool_name: String,
    pub records: u64,
    pub failures: u64,
}

impl FailureStats {
    /// Compute stats from a full listing of records.
    ///
    /// Stores that can aggregate natively may skip this, but the in-memory
    /// store and tests share it.
    pub fn from_records<'a, I>(
        records: I,
        now: DateTime<Utc>,
        ttl: &TtlPolicy,
        block_threshold: u32,
    ) -> Self
    where
        I: IntoIterator<Item = &'a FailureRecord>,
    {
        let mut stats = FailureStats::default();
        let mut per_tool: std::collections::BTreeMap<&str, (u64, u64)> = Default::default();

        for record in records {
            stats.total += 1;
            match record.evolution_status {
                EvolutionStatus::Pending => stats.pending += 1,
                EvolutionStatus::Resolved => stats.resolved += 1,
                EvolutionStatus::Ignored => stats.ignored += 1,
            }
            match record.error_type {
                ErrorType::Hard => stats.hard += 1,
                ErrorType::Soft => stats.soft += 1,
            }
            if record.is_expired(now, ttl) {
                stats.expired += 1;
            } else if record.is_pending() {
                if record.retry_count >= block_threshold {
                    stats.blocking += 1;
                }
                let entry = per_tool.entry(record.tool_name.as_str()).or_default();
                entry.0 += 1;
                entry.1 += u64::from(record.retry_count);
            }
        }

        stats.top_tools = per_tool
            .into_iter()
            .map(|(tool_name, (records, failures))| ToolFailureCount {
                tool_name: tool_name.to_string(),
                records,
                failures,
            })
            .collect();
        stats.top_tools.sort_by(|a, b| {
            b.failures
                .cmp(&a.failures)
                .then_with(|| a.tool_name.cmp(&b.tool_name))
        });
        stats
    }
}
