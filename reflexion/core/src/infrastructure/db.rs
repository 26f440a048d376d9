// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # SQLite Connection Pool
//!
//! Wraps `sqlx::sqlite::SqlitePool` in a thin `Database` newtype that is
//! injected into
//! [`SqliteFailureRepository`](super::repositories::sqlite_failure::SqliteFailureRepository).
//!
//! The database file (and its parent directory) is created on first use and
//! the schema is brought up to date with the ordered [`MIGRATIONS`] list,
//! tracked through `PRAGMA user_version`.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::repository::RepositoryError;

/// Schema migrations, applied in order. Entry `i` upgrades the schema to version `i + 1`.
pub const MIGRATIONS: &[&[&str]] = &[
    // v1: failure records with the lookup and expiry indexes
    &[
        r#"
        CREATE TABLE IF NOT EXISTS failure_records (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            tool_signature    TEXT    NOT NULL,
            env_snapshot_hash TEXT    NOT NULL,
            tool_name         TEXT    NOT NULL,
            error_type        TEXT    NOT NULL CHECK (error_type IN ('HARD', 'SOFT')),
            error_message     TEXT    NOT NULL DEFAULT '',
            retry_count       INTEGER NOT NULL DEFAULT 1 CHECK (retry_count >= 1),
            evolution_status  TEXT    NOT NULL DEFAULT 'PENDING'
                              CHECK (evolution_status IN ('PENDING', 'RESOLVED', 'IGNORED')),
            created_at        INTEGER NOT NULL,
            updated_at        INTEGER NOT NULL,
            UNIQUE (tool_signature, env_snapshot_hash)
        )
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_failure_records_signature_env
            ON failure_records (tool_signature, env_snapshot_hash)
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_failure_records_type_updated
            ON failure_records (error_type, updated_at)
        "#,
    ],
];

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database file at `path` and migrate it.
    pub async fn open(path: &Path) -> Result<Self, RepositoryError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        // One connection: every repository call is serialized anyway.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        tracing::debug!("Opened reflexion database at {:?}", path);
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Private in-memory database, alive as long as the pool.
    pub async fn in_memory() -> Result<Self, RepositoryError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub fn get_pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Current schema version (`PRAGMA user_version`).
    pub async fn schema_version(&self) -> Result<i64, RepositoryError> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?;
        Ok(version)
    }

    async fn migrate(&self) -> Result<(), RepositoryError> {
        let current = self.schema_version().await?;
        let latest = MIGRATIONS.len() as i64;

        if current > latest {
            return Err(RepositoryError::Migration(format!(
                "database schema version {} is newer than supported version {}",
                current, latest
            )));
        }

        for (index, statements) in MIGRATIONS.iter().enumerate() {
            let version = index as i64 + 1;
            if version <= current {
                continue;
            }

            let mut tx = self.pool.begin().await?;
            for statement in statements.iter() {
                sqlx::query(statement).execute(&mut *tx).await.map_err(|e| {
                    RepositoryError::Migration(format!("migration v{} failed: {}", version, e))
                })?;
            }
            sqlx::query(&format!("PRAGMA user_version = {}", version))
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            tracing::info!(version, "Applied reflexion schema migration");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_creates_file_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("reflexion.db");

        let db = Database::open(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(db.schema_version().await.unwrap(), MIGRATIONS.len() as i64);

        let indexes: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master \
             WHERE type = 'index' AND tbl_name = 'failure_records' ORDER BY name",
        )
        .fetch_all(db.get_pool())
        .await
        .unwrap();
        assert!(indexes.contains(&"idx_failure_records_signature_env".to_string()));
        assert!(indexes.contains(&"idx_failure_records_type_updated".to_string()));
    }

    #[tokio::test]
    async fn test_reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reflexion.db");

        drop(Database::open(&path).await.unwrap());
        let db = Database::open(&path).await.unwrap();
        assert_eq!(db.schema_version().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_newer_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reflexion.db");

        let db = Database::open(&path).await.unwrap();
        sqlx::query("PRAGMA user_version = 99").execute(db.get_pool()).await.unwrap();
        db.get_pool().close().await;

        let result = Database::open(&path).await;
        assert!(matches!(result, Err(RepositoryError::Migration(_))));
    }
}
