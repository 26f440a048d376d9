// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interface
//!
//! Persistence contract for the [`FailureRecord`] aggregate. The interface is
//! defined here and implemented in `crate::infrastructure::repositories`.
//!
//! | Implementation | Backend |
//! |----------------|---------|
//! | `InMemoryFailureRepository` | process memory (tests, ephemeral hosts) |
//! | `SqliteFailureRepository` | embedded SQLite file (default) |
//!
//! Every implementation owns exactly one lock and holds it across each
//! read-modify-write sequence, so concurrent tool executions never lose an
//! increment.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

use crate::domain::environment::EnvironmentHash;
use crate::domain::failure::{
    EvolutionStatus, FailureAttempt, FailureRecord, FailureStats, TtlPolicy,
};
use crate::domain::signature::ToolSignature;

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone, PartialEq)]
pub enum StorageBackend {
    InMemory,
    Sqlite(SqliteConfig),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqliteConfig {
    pub path: PathBuf,
}

#[async_trait]
pub trait FailureRepository: Send + Sync {
    /// Insert the first failure for a key or fold a repeat into the existing row.
    async fn upsert(
        &self,
        attempt: &FailureAttempt,
        ttl: &TtlPolicy,
    ) -> Result<FailureRecord, RepositoryError>;

    /// Records for `signature`, most recently updated first, optionally filtered by status.
    async fn select_by_signature(
        &self,
        signature: &ToolSignature,
        status: Option<EvolutionStatus>,
    ) -> Result<Vec<FailureRecord>, RepositoryError>;

    /// Move PENDING rows of `signature` (scoped to `env` when given) to RESOLVED.
    /// Returns the number of rows changed.
    async fn mark_resolved(
        &self,
        signature: &ToolSignature,
        env: Option<&EnvironmentHash>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;

    /// Move PENDING rows of `signature` (scoped to `env` when given) to IGNORED.
    async fn mark_ignored(
        &self,
        signature: &ToolSignature,
        env: Option<&EnvironmentHash>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;

    /// Physically delete every row whose TTL elapsed before `now`.
    async fn delete_expired(
        &self,
        now: DateTime<Utc>,
        ttl: &TtlPolicy,
    ) -> Result<u64, RepositoryError>;

    async fn stats(
        &self,
        now: DateTime<Utc>,
        ttl: &TtlPolicy,
        block_threshold: u32,
    ) -> Result<FailureStats, RepositoryError>;

    /// Most recently updated rows, any status.
    async fn list_recent(&self, limit: usize) -> Result<Vec<FailureRecord>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(e) => RepositoryError::Io(e.to_string()),
            sqlx::Error::ColumnDecode { index, source } => {
                RepositoryError::Corrupt(format!("column {}: {}", index, source))
            }
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<std::io::Error> for RepositoryError {
    fn from(err: std::io::Error) -> Self {
        RepositoryError::Io(err.to_string())
    }
}
