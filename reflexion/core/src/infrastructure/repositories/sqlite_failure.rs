// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # SQLite Failure Repository
//!
//! Default `FailureRepository` implementation backed by the `failure_records`
//! table (see [`crate::infrastructure::db::MIGRATIONS`]).
//!
//! Timestamps are stored as Unix milliseconds so the expiry sweep compares
//! integers through the (`error_type`, `updated_at`) index.
//!
//! All calls go through `lock`. The upsert is a read-modify-write inside one
//! transaction, so the lock is what keeps concurrent increments from being lost.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tokio::sync::Mutex;

use crate::domain::environment::EnvironmentHash;
use crate::domain::failure::{
    ErrorType, EvolutionStatus, FailureAttempt, FailureRecord, FailureStats, ToolFailureCount,
    TtlPolicy,
};
use crate::domain::repository::{FailureRepository, RepositoryError};
use crate::domain::signature::ToolSignature;
use crate::infrastructure::db::Database;

const RECORD_COLUMNS: &str = "tool_signature, env_snapshot_hash, tool_name, error_type, \
     error_message, retry_count, evolution_status, created_at, updated_at";

// ?1 = HARD cutoff, ?2 = SOFT cutoff (Unix millis)
const EXPIRED_PREDICATE: &str =
    "((error_type = 'HARD' AND updated_at < ?1) OR (error_type = 'SOFT' AND updated_at < ?2))";

pub struct SqliteFailureRepository {
    pool: SqlitePool,
    lock: Mutex<()>,
}

impl SqliteFailureRepository {
    pub fn new(db: Database) -> Self {
        Self {
            pool: db.get_pool().clone(),
            lock: Mutex::new(()),
        }
    }

    async fn set_status(
        &self,
        signature: &ToolSignature,
        env: Option<&EnvironmentHash>,
        status: EvolutionStatus,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let _guard = self.lock.lock().await;

        let result = match env {
            Some(env) => {
                sqlx::query(
                    r#"
                    UPDATE failure_records
                    SET evolution_status = ?1, updated_at = ?2
                    WHERE tool_signature = ?3 AND env_snapshot_hash = ?4
                      AND evolution_status = 'PENDING'
                    "#,
                )
                .bind(status.as_str())
                .bind(now.timestamp_millis())
                .bind(signature.as_str())
                .bind(env.as_str())
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE failure_records
                    SET evolution_status = ?1, updated_at = ?2
                    WHERE tool_signature = ?3 AND evolution_status = 'PENDING'
                    "#,
                )
                .bind(status.as_str())
                .bind(now.timestamp_millis())
                .bind(signature.as_str())
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl FailureRepository for SqliteFailureRepository {
    async fn upsert(
        &self,
        attempt: &FailureAttempt,
        ttl: &TtlPolicy,
    ) -> Result<FailureRecord, RepositoryError> {
        let _guard = self.lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(&format!(
            "SELECT {} FROM failure_records WHERE tool_signature = ?1 AND env_snapshot_hash = ?2",
            RECORD_COLUMNS
        ))
        .bind(attempt.tool_signature.as_str())
        .bind(attempt.env_snapshot_hash.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let record = match existing {
            Some(row) => {
                let mut record = record_from_row(&row)?;
                record.register_repeat(attempt, ttl);

                sqlx::query(
                    r#"
                    UPDATE failure_records
                    SET tool_name = ?1,
                        error_type = ?2,
                        error_message = ?3,
                        retry_count = ?4,
                        evolution_status = ?5,
                        created_at = ?6,
                        updated_at = ?7
                    WHERE tool_signature = ?8 AND env_snapshot_hash = ?9
                    "#,
                )
                .bind(&record.tool_name)
                .bind(record.error_type.as_str())
                .bind(&record.error_message)
                .bind(i64::from(record.retry_count))
                .bind(record.evolution_status.as_str())
                .bind(record.created_at.timestamp_millis())
                .bind(record.updated_at.timestamp_millis())
                .bind(record.tool_signature.as_str())
                .bind(record.env_snapshot_hash.as_str())
                .execute(&mut *tx)
                .await?;

                record
            }
            None => {
                let record = FailureRecord::first_failure(attempt);

                sqlx::query(
                    r#"
                    INSERT INTO failure_records (
                        tool_signature, env_snapshot_hash, tool_name, error_type, error_message,
                        retry_count, evolution_status, created_at, updated_at
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    "#,
                )
                .bind(record.tool_signature.as_str())
                .bind(record.env_snapshot_hash.as_str())
                .bind(&record.tool_name)
                .bind(record.error_type.as_str())
                .bind(&record.error_message)
                .bind(i64::from(record.retry_count))
                .bind(record.evolution_status.as_str())
                .bind(record.created_at.timestamp_millis())
                .bind(record.updated_at.timestamp_millis())
                .execute(&mut *tx)
                .await?;

                record
            }
        };

        tx.commit().await?;
        Ok(record)
    }

    async fn select_by_signature(
        &self,
        signature: &ToolSignature,
        status: Option<EvolutionStatus>,
    ) -> Result<Vec<FailureRecord>, RepositoryError> {
        let _guard = self.lock.lock().await;

        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {} FROM failure_records \
                     WHERE tool_signature = ?1 AND evolution_status = ?2 \
                     ORDER BY updated_at DESC",
                    RECORD_COLUMNS
                ))
                .bind(signature.as_str())
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM failure_records WHERE tool_signature = ?1 \
                     ORDER BY updated_at DESC",
                    RECORD_COLUMNS
                ))
                .bind(signature.as_str())
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(record_from_row).collect()
    }

    async fn mark_resolved(
        &self,
        signature: &ToolSignature,
        env: Option<&EnvironmentHash>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        self.set_status(signature, env, EvolutionStatus::Resolved, now).await
    }

    async fn mark_ignored(
        &self,
        signature: &ToolSignature,
        env: Option<&EnvironmentHash>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        self.set_status(signature, env, EvolutionStatus::Ignored, now).await
    }

    async fn delete_expired(
        &self,
        now: DateTime<Utc>,
        ttl: &TtlPolicy,
    ) -> Result<u64, RepositoryError> {
        let _guard = self.lock.lock().await;

        let result = sqlx::query(&format!(
            "DELETE FROM failure_records WHERE {}",
            EXPIRED_PREDICATE
        ))
        .bind(ttl.cutoff(ErrorType::Hard, now).timestamp_millis())
        .bind(ttl.cutoff(ErrorType::Soft, now).timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn stats(
        &self,
        now: DateTime<Utc>,
        ttl: &TtlPolicy,
        block_threshold: u32,
    ) -> Result<FailureStats, RepositoryError> {
        let _guard = self.lock.lock().await;
        let hard_cutoff = ttl.cutoff(ErrorType::Hard, now).timestamp_millis();
        let soft_cutoff = ttl.cutoff(ErrorType::Soft, now).timestamp_millis();

        let totals = sqlx::query(&format!(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(evolution_status = 'PENDING'), 0) AS pending,
                COALESCE(SUM(evolution_status = 'RESOLVED'), 0) AS resolved,
                COALESCE(SUM(evolution_status = 'IGNORED'), 0) AS ignored,
                COALESCE(SUM(error_type = 'HARD'), 0) AS hard,
                COALESCE(SUM(error_type = 'SOFT'), 0) AS soft,
                COALESCE(SUM({expired}), 0) AS expired,
                COALESCE(
                    SUM(evolution_status = 'PENDING' AND retry_count >= ?3 AND NOT {expired}),
                    0
                ) AS blocking
            FROM failure_records
            "#,
            expired = EXPIRED_PREDICATE
        ))
        .bind(hard_cutoff)
        .bind(soft_cutoff)
        .bind(i64::from(block_threshold))
        .fetch_one(&self.pool)
        .await?;

        let per_tool = sqlx::query(&format!(
            r#"
            SELECT tool_name, COUNT(*) AS records, SUM(retry_count) AS failures
            FROM failure_records
            WHERE evolution_status = 'PENDING' AND NOT {expired}
            GROUP BY tool_name
            ORDER BY failures DESC, tool_name ASC
            "#,
            expired = EXPIRED_PREDICATE
        ))
        .bind(hard_cutoff)
        .bind(soft_cutoff)
        .fetch_all(&self.pool)
        .await?;

        let top_tools = per_tool
            .iter()
            .map(|row| -> Result<ToolFailureCount, RepositoryError> {
                Ok(ToolFailureCount {
                    tool_name: row.try_get("tool_name")?,
                    records: count(row, "records")?,
                    failures: count(row, "failures")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FailureStats {
            total: count(&totals, "total")?,
            pending: count(&totals, "pending")?,
            resolved: count(&totals, "resolved")?,
            ignored: count(&totals, "ignored")?,
            hard: count(&totals, "hard")?,
            soft: count(&totals, "soft")?,
            expired: count(&totals, "expired")?,
            blocking: count(&totals, "blocking")?,
            top_tools,
        })
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<FailureRecord>, RepositoryError> {
        let _guard = self.lock.lock().await;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM failure_records ORDER BY updated_at DESC LIMIT ?1",
            RECORD_COLUMNS
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}

fn count(row: &SqliteRow, column: &str) -> Result<u64, RepositoryError> {
    let value: i64 = row.try_get(column)?;
    u64::try_from(value)
        .map_err(|_| RepositoryError::Corrupt(format!("negative {}: {}", column, value)))
}

fn timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, RepositoryError> {
    let millis: i64 = row.try_get(column)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| RepositoryError::Corrupt(format!("{} out of range: {}", column, millis)))
}

fn record_from_row(row: &SqliteRow) -> Result<FailureRecord, RepositoryError> {
    let error_type: String = row.try_get("error_type")?;
    let status: String = row.try_get("evolution_status")?;
    let retry_count: i64 = row.try_get("retry_count")?;

    Ok(FailureRecord {
        tool_signature: ToolSignature::from_hash(row.try_get::<String, _>("tool_signature")?),
        env_snapshot_hash: EnvironmentHash::from_hash(
            row.try_get::<String, _>("env_snapshot_hash")?,
        ),
        tool_name: row.try_get("tool_name")?,
        error_type: error_type.parse().map_err(RepositoryError::Corrupt)?,
        error_message: row.try_get("error_message")?,
        retry_count: u32::try_from(retry_count).map_err(|_| {
            RepositoryError::Corrupt(format!("retry_count out of range: {}", retry_count))
        })?,
        evolution_status: status.parse().map_err(RepositoryError::Corrupt)?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}
