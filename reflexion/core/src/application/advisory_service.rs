// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # AdvisoryService - Reflexion Loop
//!
//! Application service that remembers failed tool calls and advises against
//! repeating them in an unchanged environment.
//!
//! ## Flow
//!
//! 1. **Before execution** ([`AdvisoryService::check`]): sweep expired records,
//!    load the PENDING records for the call's signature and let
//!    [`AdvisoryPolicy`] decide ALLOW / WARN / BLOCK.
//! 2. **After execution** ([`AdvisoryService::report_outcome`]): a failure is
//!    classified and folded into the record for (signature, environment); a
//!    success resolves the matching PENDING records.
//!
//! ## Store errors
//!
//! `check` never fails. When the store cannot be read the verdict comes from
//! the configured [`StoreErrorPolicy`] and is flagged `degraded`. Write
//! operations return [`ReflexionError`] and leave the decision to the caller.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::advisory::{Advisory, AdvisoryPolicy, AdvisoryResult};
use crate::domain::classifier::ErrorClassifier;
use crate::domain::environment::EnvironmentHash;
use crate::domain::failure::{
    EvolutionStatus, FailureAttempt, FailureRecord, FailureStats, TtlPolicy,
};
use crate::domain::reflexion_config::{ReflexionConfig, StoreErrorPolicy};
use crate::domain::repository::{FailureRepository, RepositoryError};
use crate::domain::signature::{describe_call, ToolSignature};

/// Engine-level errors
#[derive(Debug, thiserror::Error)]
pub enum ReflexionError {
    #[error("Failure store error: {0}")]
    Store(#[from] RepositoryError),

    #[error("Invalid reflexion configuration: {0}")]
    Config(String),
}

/// Result of a tool execution, as reported after the fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Success,
    Failure { error_message: String },
}

impl ToolOutcome {
    pub fn failure(error_message: impl Into<String>) -> Self {
        ToolOutcome::Failure {
            error_message: error_message.into(),
        }
    }
}

/// AdvisoryService interface
#[async_trait]
pub trait AdvisoryService: Send + Sync {
    /// Advise on a prospective call. Never fails; see the module docs.
    async fn check(&self, tool_name: &str, params: &Value, env: &EnvironmentHash) -> Advisory;

    /// Record a failed call, classifying `error_message` to pick its TTL.
    async fn record_failure(
        &self,
        tool_name: &str,
        params: &Value,
        error_message: &str,
        env: &EnvironmentHash,
    ) -> Result<FailureRecord, ReflexionError>;

    /// Resolve PENDING records for the call, in `env` only or in every environment.
    /// Returns whether anything changed.
    async fn clear_failure(
        &self,
        tool_name: &str,
        params: &Value,
        env: Option<&EnvironmentHash>,
    ) -> Result<bool, ReflexionError>;

    /// Operator override: PENDING records for the call stop influencing advisories.
    async fn ignore_failure(
        &self,
        tool_name: &str,
        params: &Value,
        env: Option<&EnvironmentHash>,
    ) -> Result<bool, ReflexionError>;

    /// Post-execution report: failures are recorded, successes clear the
    /// records of this environment.
    async fn report_outcome(
        &self,
        tool_name: &str,
        params: &Value,
        env: &EnvironmentHash,
        outcome: &ToolOutcome,
    ) -> Result<(), ReflexionError>;

    /// Delete every expired record now. Returns the number removed.
    async fn sweep_expired(&self) -> Result<u64, ReflexionError>;

    async fn stats(&self) -> Result<FailureStats, ReflexionError>;

    async fn recent_failures(&self, limit: usize) -> Result<Vec<FailureRecord>, ReflexionError>;
}

/// Standard implementation of AdvisoryService
pub struct StandardAdvisoryService {
    repository: Arc<dyn FailureRepository>,
    classifier: ErrorClassifier,
    policy: AdvisoryPolicy,
    ttl: TtlPolicy,
    store_error_policy: StoreErrorPolicy,
}

impl StandardAdvisoryService {
    pub fn new(repository: Arc<dyn FailureRepository>) -> Self {
        Self {
            repository,
            classifier: ErrorClassifier::default(),
            policy: AdvisoryPolicy::default(),
            ttl: TtlPolicy::default(),
            store_error_policy: StoreErrorPolicy::default(),
        }
    }

    /// Build the service from validated configuration.
    pub fn from_config(
        repository: Arc<dyn FailureRepository>,
        config: &ReflexionConfig,
    ) -> Result<Self, ReflexionError> {
        config
            .validate()
            .map_err(|e| ReflexionError::Config(e.to_string()))?;
        let ttl = config
            .ttl_policy()
            .map_err(|e| ReflexionError::Config(e.to_string()))?;

        Ok(Self::new(repository)
            .with_classifier(
                ErrorClassifier::new()
                    .with_extra_patterns(config.classifier.extra_soft_patterns.iter()),
            )
            .with_policy(config.advisory_policy())
            .with_ttl(ttl)
            .with_store_error_policy(config.policy.store_error_policy))
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_policy(mut self, policy: AdvisoryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_ttl(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_store_error_policy(mut self, store_error_policy: StoreErrorPolicy) -> Self {
        self.store_error_policy = store_error_policy;
        self
    }

    pub fn policy(&self) -> &AdvisoryPolicy {
        &self.policy
    }

    pub fn ttl(&self) -> &TtlPolicy {
        &self.ttl
    }

    async fn sweep_at(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let removed = self.repository.delete_expired(now, &self.ttl).await?;
        if removed > 0 {
            info!(removed, "Swept expired failure records");
            metrics::counter!("reflexion_records_expired_total").increment(removed);
        }
        Ok(removed)
    }

    async fn evaluate(
        &self,
        tool_name: &str,
        params: &Value,
        signature: &ToolSignature,
        env: &EnvironmentHash,
    ) -> Result<Advisory, RepositoryError> {
        let now = now();
        self.sweep_at(now).await?;

        let candidates = self
            .repository
            .select_by_signature(signature, Some(EvolutionStatus::Pending))
            .await?;
        debug!(
            tool_name,
            signature = %signature,
            candidates = candidates.len(),
            "Loaded pending failure records"
        );

        let call = describe_call(tool_name, params);
        Ok(self.policy.evaluate(&call, env, &candidates, &self.ttl, now))
    }

    fn degraded(
        &self,
        tool_name: &str,
        signature: &ToolSignature,
        error: &RepositoryError,
    ) -> Advisory {
        metrics::counter!("reflexion_store_errors_total").increment(1);

        let (result, reason) = match self.store_error_policy {
            StoreErrorPolicy::FailOpen => (
                AdvisoryResult::Allow,
                format!(
                    "Failure memory unavailable ({}); execution allowed without advisory",
                    error
                ),
            ),
            StoreErrorPolicy::FailClosed => (
                AdvisoryResult::Block,
                format!(
                    "Failure memory unavailable ({}); execution blocked until the store recovers",
                    error
                ),
            ),
        };
        warn!(
            tool_name,
            signature = %signature,
            result = %result,
            "Advisory check could not read the failure store: {}",
            error
        );

        Advisory {
            result,
            reason,
            matching_record: None,
            retry_count: 0,
            degraded: true,
        }
    }

    fn store_error(&self, operation: &str, error: RepositoryError) -> ReflexionError {
        metrics::counter!("reflexion_store_errors_total").increment(1);
        warn!(operation, "Failure store operation failed: {}", error);
        ReflexionError::Store(error)
    }

    async fn set_status(
        &self,
        tool_name: &str,
        params: &Value,
        env: Option<&EnvironmentHash>,
        status: EvolutionStatus,
    ) -> Result<bool, ReflexionError> {
        let signature = ToolSignature::compute(tool_name, params);
        let now = now();

        let changed = match status {
            EvolutionStatus::Resolved => self.repository.mark_resolved(&signature, env, now).await,
            EvolutionStatus::Ignored => self.repository.mark_ignored(&signature, env, now).await,
            EvolutionStatus::Pending => Ok(0),
        }
        .map_err(|e| self.store_error(status.as_str(), e))?;

        if changed > 0 {
            info!(
                tool_name,
                signature = %signature,
                status = %status,
                records = changed,
                "Failure records settled"
            );
        }
        Ok(changed > 0)
    }
}

#[async_trait]
impl AdvisoryService for StandardAdvisoryService {
    async fn check(&self, tool_name: &str, params: &Value, env: &EnvironmentHash) -> Advisory {
        let signature = ToolSignature::compute(tool_name, params);

        let advisory = match self.evaluate(tool_name, params, &signature, env).await {
            Ok(advisory) => advisory,
            Err(e) => self.degraded(tool_name, &signature, &e),
        };

        metrics::counter!("reflexion_advisories_total", "result" => advisory.result.as_str())
            .increment(1);
        match advisory.result {
            AdvisoryResult::Allow => debug!(tool_name, signature = %signature, "Advisory: ALLOW"),
            AdvisoryResult::Warn | AdvisoryResult::Block => info!(
                tool_name,
                signature = %signature,
                retry_count = advisory.retry_count,
                result = %advisory.result,
                "Advisory issued for previously failed call"
            ),
        }

        advisory
    }

    async fn record_failure(
        &self,
        tool_name: &str,
        params: &Value,
        error_message: &str,
        env: &EnvironmentHash,
    ) -> Result<FailureRecord, ReflexionError> {
        let signature = ToolSignature::compute(tool_name, params);
        let error_type = self.classifier.classify(error_message);

        let attempt = FailureAttempt {
            tool_signature: signature,
            env_snapshot_hash: env.clone(),
            tool_name: tool_name.to_string(),
            error_type,
            error_message: error_message.to_string(),
            observed_at: now(),
        };

        let record = self
            .repository
            .upsert(&attempt, &self.ttl)
            .await
            .map_err(|e| self.store_error("record_failure", e))?;

        metrics::counter!(
            "reflexion_failures_recorded_total",
            "error_type" => error_type.as_str()
        )
        .increment(1);
        info!(
            tool_name,
            signature = %record.tool_signature,
            error_type = %error_type,
            retry_count = record.retry_count,
            "Recorded tool failure"
        );

        Ok(record)
    }

    async fn clear_failure(
        &self,
        tool_name: &str,
        params: &Value,
        env: Option<&EnvironmentHash>,
    ) -> Result<bool, ReflexionError> {
        self.set_status(tool_name, params, env, EvolutionStatus::Resolved).await
    }

    async fn ignore_failure(
        &self,
        tool_name: &str,
        params: &Value,
        env: Option<&EnvironmentHash>,
    ) -> Result<bool, ReflexionError> {
        self.set_status(tool_name, params, env, EvolutionStatus::Ignored).await
    }

    async fn report_outcome(
        &self,
        tool_name: &str,
        params: &Value,
        env: &EnvironmentHash,
        outcome: &ToolOutcome,
    ) -> Result<(), ReflexionError> {
        match outcome {
            ToolOutcome::Success => {
                self.clear_failure(tool_name, params, Some(env)).await?;
            }
            ToolOutcome::Failure { error_message } => {
                self.record_failure(tool_name, params, error_message, env).await?;
            }
        }
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<u64, ReflexionError> {
        self.sweep_at(now())
            .await
            .map_err(|e| self.store_error("sweep_expired", e))
    }

    async fn stats(&self) -> Result<FailureStats, ReflexionError> {
        self.repository
            .stats(now(), &self.ttl, self.policy.block_threshold)
            .await
            .map_err(|e| self.store_error("stats", e))
    }

    async fn recent_failures(&self, limit: usize) -> Result<Vec<FailureRecord>, ReflexionError> {
        self.repository
            .list_recent(limit)
            .await
            .map_err(|e| self.store_error("recent_failures", e))
    }
}

// Millisecond precision, matching what the SQLite store persists.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::failure::ErrorType;
    use chrono::Duration;
    use crate::infrastructure::repositories::{InMemoryFailureRepository, SqliteFailureRepository};
    use crate::infrastructure::Database;
    use serde_json::json;

    struct FailingRepository;

    #[async_trait]
    impl FailureRepository for FailingRepository {
        async fn upsert(
            &self,
            _attempt: &FailureAttempt,
            _ttl: &TtlPolicy,
        ) -> Result<FailureRecord, RepositoryError> {
            Err(RepositoryError::Database("disk I/O error".to_string()))
        }

        async fn select_by_signature(
            &self,
            _signature: &ToolSignature,
            _status: Option<EvolutionStatus>,
        ) -> Result<Vec<FailureRecord>, RepositoryError> {
            Err(RepositoryError::Database("disk I/O error".to_string()))
        }

        async fn mark_resolved(
            &self,
            _signature: &ToolSignature,
            _env: Option<&EnvironmentHash>,
            _now: DateTime<Utc>,
        ) -> Result<u64, RepositoryError> {
            Err(RepositoryError::Database("disk I/O error".to_string()))
        }

        async fn mark_ignored(
            &self,
            _signature: &ToolSignature,
            _env: Option<&EnvironmentHash>,
            _now: DateTime<Utc>,
        ) -> Result<u64, RepositoryError> {
            Err(RepositoryError::Database("disk I/O error".to_string()))
        }

        async fn delete_expired(
            &self,
            _now: DateTime<Utc>,
            _ttl: &TtlPolicy,
        ) -> Result<u64, RepositoryError> {
            Ok(0)
        }

        async fn stats(
            &self,
            _now: DateTime<Utc>,
            _ttl: &TtlPolicy,
            _block_threshold: u32,
        ) -> Result<FailureStats, RepositoryError> {
            Err(RepositoryError::Database("disk I/O error".to_string()))
        }

        async fn list_recent(&self, _limit: usize) -> Result<Vec<FailureRecord>, RepositoryError> {
            Err(RepositoryError::Database("disk I/O error".to_string()))
        }
    }

    fn service() -> StandardAdvisoryService {
        StandardAdvisoryService::new(Arc::new(InMemoryFailureRepository::new()))
    }

    fn env(name: &str) -> EnvironmentHash {
        EnvironmentHash::from_hash(name)
    }

    #[tokio::test]
    async fn test_escalation() {
        let service = service();
        let params = json!({"path": "missing.py"});

        let verdict = service.check("file_read", &params, &env("e1")).await.result;
        assert_eq!(verdict, AdvisoryResult::Allow);

        service
            .record_failure("file_read", &params, "File not found", &env("e1"))
            .await
            .unwrap();
        let verdict = service.check("file_read", &params, &env("e1")).await.result;
        assert_eq!(verdict, AdvisoryResult::Warn);

        service
            .record_failure("file_read", &params, "File not found", &env("e1"))
            .await
            .unwrap();
        let record = service
            .record_failure("file_read", &params, "File not found", &env("e1"))
            .await
            .unwrap();
        assert_eq!(record.retry_count, 3);
        assert_eq!(record.error_type, ErrorType::Hard);

        let advisory = service.check("file_read", &params, &env("e1")).await;
        assert_eq!(advisory.result, AdvisoryResult::Block);
        assert_eq!(advisory.retry_count, 3);
        assert!(advisory.reason.contains("missing.py"));
        assert!(!advisory.degraded);
    }

    #[tokio::test]
    async fn test_report_outcome_resolves_on_success() {
        let service = service();
        let params = json!({"cmd": "make"});

        for _ in 0..3 {
            service
                .report_outcome(
                    "shell",
                    &params,
                    &env("e1"),
                    &ToolOutcome::failure("exit status 2"),
                )
                .await
                .unwrap();
        }
        assert!(service.check("shell", &params, &env("e1")).await.is_blocked());

        service
            .report_outcome("shell", &params, &env("e1"), &ToolOutcome::Success)
            .await
            .unwrap();
        let verdict = service.check("shell", &params, &env("e1")).await.result;
        assert_eq!(verdict, AdvisoryResult::Allow);
    }

    #[tokio::test]
    async fn test_clear_and_ignore_report_changes() {
        let service = service();
        let params = json!({"q": 1});

        assert!(!service.clear_failure("search", &params, None).await.unwrap());

        service
            .record_failure("search", &params, "bad query", &env("e1"))
            .await
            .unwrap();
        assert!(service
            .ignore_failure("search", &params, Some(&env("e1")))
            .await
            .unwrap());
        assert!(!service.clear_failure("search", &params, None).await.unwrap());
        let verdict = service.check("search", &params, &env("e1")).await.result;
        assert_eq!(verdict, AdvisoryResult::Allow);
    }

    #[tokio::test]
    async fn test_soft_classification_with_extra_patterns() {
        let service = StandardAdvisoryService::new(Arc::new(InMemoryFailureRepository::new()))
            .with_classifier(ErrorClassifier::new().with_extra_patterns(["lock contention"]));

        let record = service
            .record_failure("db_write", &json!({}), "Lock contention on table", &env("e1"))
            .await
            .unwrap();
        assert_eq!(record.error_type, ErrorType::Soft);
    }

    #[tokio::test]
    async fn test_fail_open_on_store_error() {
        let service = StandardAdvisoryService::new(Arc::new(FailingRepository));

        let advisory = service.check("file_read", &json!({}), &env("e1")).await;
        assert_eq!(advisory.result, AdvisoryResult::Allow);
        assert!(advisory.degraded);
        assert!(advisory.reason.contains("disk I/O error"));

        let result = service
            .record_failure("file_read", &json!({}), "boom", &env("e1"))
            .await;
        assert!(matches!(result, Err(ReflexionError::Store(_))));
    }

    #[tokio::test]
    async fn test_fail_closed_on_store_error() {
        let service = StandardAdvisoryService::new(Arc::new(FailingRepository))
            .with_store_error_policy(StoreErrorPolicy::FailClosed);

        let advisory = service.check("file_read", &json!({}), &env("e1")).await;
        assert_eq!(advisory.result, AdvisoryResult::Block);
        assert!(advisory.degraded);
    }

    #[tokio::test]
    async fn test_from_config_rejects_invalid_thresholds() {
        let mut config = ReflexionConfig::default();
        config.policy.warn_threshold = 5;
        config.policy.block_threshold = 2;

        let repository = Arc::new(InMemoryFailureRepository::new());
        let result = StandardAdvisoryService::from_config(repository, &config);
        assert!(matches!(result, Err(ReflexionError::Config(_))));
    }

    #[tokio::test]
    async fn test_from_config_applies_thresholds() {
        let mut config = ReflexionConfig::default();
        config.policy.block_threshold = 1;

        let repository = Arc::new(InMemoryFailureRepository::new());
        let service = StandardAdvisoryService::from_config(repository, &config).unwrap();
        service.record_failure("op", &json!({}), "boom", &env("e1")).await.unwrap();
        assert!(service.check("op", &json!({}), &env("e1")).await.is_blocked());
    }

    #[tokio::test]
    async fn test_stats_and_recent() {
        let service = service();
        service
            .record_failure("a", &json!({}), "boom", &env("e1"))
            .await
            .unwrap();
        service
            .record_failure("b", &json!({}), "Connection refused", &env("e1"))
            .await
            .unwrap();

        let stats = service.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.hard, 1);
        assert_eq!(stats.soft, 1);

        let recent = service.recent_failures(1).await.unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn test_huge_ttl_does_not_break_check() {
        let repository = SqliteFailureRepository::new(Database::in_memory().await.unwrap());
        let huge = Duration::days(365_000_000);
        let service = StandardAdvisoryService::new(Arc::new(repository))
            .with_ttl(TtlPolicy::new(huge, huge));
        let params = json!({"path": "missing.py"});

        let advisory = service.check("file_read", &params, &env("e1")).await;
        assert_eq!(advisory.result, AdvisoryResult::Allow);
        assert!(!advisory.degraded);

        service
            .record_failure("file_read", &params, "File not found", &env("e1"))
            .await
            .unwrap();
        let advisory = service.check("file_read", &params, &env("e1")).await;
        assert_eq!(advisory.result, AdvisoryResult::Warn);
        assert!(!advisory.degraded);

        assert_eq!(service.sweep_expired().await.unwrap(), 0);
        assert_eq!(service.stats().await.unwrap().total, 1);
    }
}
