// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of [`FailureRepository`].
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve failure records
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **SqliteFailureRepository** - embedded SQLite file, the default backend
//! - **InMemoryFailureRepository** - Mutex-guarded HashMap for tests and ephemeral hosts

pub mod sqlite_failure;

pub use sqlite_failure::SqliteFailureRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::environment::EnvironmentHash;
use crate::domain::failure::{
    EvolutionStatus, FailureAttempt, FailureRecord, FailureStats, TtlPolicy,
};
use crate::domain::repository::{FailureRepository, RepositoryError};
use crate::domain::signature::ToolSignature;

type RecordKey = (ToolSignature, EnvironmentHash);

#[derive(Clone, Default)]
pub struct InMemoryFailureRepository {
    records: Arc<Mutex<HashMap<RecordKey, FailureRecord>>>,
}

impl InMemoryFailureRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_status(
        &self,
        signature: &ToolSignature,
        env: Option<&EnvironmentHash>,
        status: EvolutionStatus,
        now: DateTime<Utc>,
    ) -> u64 {
        let mut records = self.records.lock();
        let mut changed = 0;
        for record in records.values_mut() {
            if record.tool_signature != *signature || !record.is_pending() {
                continue;
            }
            if env.is_some_and(|env| record.env_snapshot_hash != *env) {
                continue;
            }
            record.evolution_status = status;
            record.updated_at = now;
            changed += 1;
        }
        changed
    }
}

#[async_trait]
impl FailureRepository for InMemoryFailureRepository {
    async fn upsert(
        &self,
        attempt: &FailureAttempt,
        ttl: &TtlPolicy,
    ) -> Result<FailureRecord, RepositoryError> {
        let mut records = self.records.lock();
        let key = (attempt.tool_signature.clone(), attempt.env_snapshot_hash.clone());
        let record = records
            .entry(key)
            .and_modify(|existing| existing.register_repeat(attempt, ttl))
            .or_insert_with(|| FailureRecord::first_failure(attempt));
        Ok(record.clone())
    }

    async fn select_by_signature(
        &self,
        signature: &ToolSignature,
        status: Option<EvolutionStatus>,
    ) -> Result<Vec<FailureRecord>, RepositoryError> {
        let records = self.records.lock();
        let mut matching: Vec<FailureRecord> = records
            .values()
            .filter(|r| r.tool_signature == *signature)
            .filter(|r| status.map_or(true, |s| r.evolution_status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(matching)
    }

    async fn mark_resolved(
        &self,
        signature: &ToolSignature,
        env: Option<&EnvironmentHash>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        Ok(self.set_status(signature, env, EvolutionStatus::Resolved, now))
    }

    async fn mark_ignored(
        &self,
        signature: &ToolSignature,
        env: Option<&EnvironmentHash>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        Ok(self.set_status(signature, env, EvolutionStatus::Ignored, now))
    }

    async fn delete_expired(
        &self,
        now: DateTime<Utc>,
        ttl: &TtlPolicy,
    ) -> Result<u64, RepositoryError> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now, ttl));
        Ok((before - records.len()) as u64)
    }

    async fn stats(
        &self,
        now: DateTime<Utc>,
        ttl: &TtlPolicy,
        block_threshold: u32,
    ) -> Result<FailureStats, RepositoryError> {
        let records = self.records.lock();
        Ok(FailureStats::from_records(records.values(), now, ttl, block_threshold))
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<FailureRecord>, RepositoryError> {
        let records = self.records.lock();
        let mut all: Vec<FailureRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all.truncate(limit);
        Ok(all)
    }
}
