// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates the concrete [`FailureRepository`] for the configured storage backend,
//! keeping the domain layer free of infrastructure dependencies.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Implements internal responsibilities for repository factory

use std::sync::Arc;

use crate::domain::repository::{FailureRepository, RepositoryError, StorageBackend};
use crate::infrastructure::db::Database;
use crate::infrastructure::repositories::{InMemoryFailureRepository, SqliteFailureRepository};

/// Creates a FailureRepository implementation based on the configured backend.
/// The SQLite file and its directory are created on first use.
pub async fn create_failure_repository(
    backend: &StorageBackend,
) -> Result<Arc<dyn FailureRepository>, RepositoryError> {
    match backend {
        StorageBackend::InMemory => Ok(Arc::new(InMemoryFailureRepository::new())),
        StorageBackend::Sqlite(config) => {
            let db = Database::open(&config.path).await?;
            Ok(Arc::new(SqliteFailureRepository::new(db)))
        }
    }
}
