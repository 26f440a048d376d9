// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! End-to-end advisory behaviour, exercised against both store implementations.

use std::sync::Arc;

use aegis_reflexion::application::advisory_service::{AdvisoryService, StandardAdvisoryService};
use aegis_reflexion::domain::repository::FailureRepository;
use aegis_reflexion::infrastructure::db::Database;
use aegis_reflexion::infrastructure::repositories::{
    InMemoryFailureRepository, SqliteFailureRepository,
};
use aegis_reflexion::{
    classify, AdvisoryResult, EnvironmentHash, EnvironmentSnapshot, ErrorType, EvolutionStatus,
    FailureAttempt, FailureRecord, ToolSignature, TtlPolicy,
};
use chrono::{Duration, SubsecRound, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;

struct Harness {
    name: &'static str,
    repository: Arc<dyn FailureRepository>,
    service: Arc<StandardAdvisoryService>,
    _dir: Option<TempDir>,
}

async fn harnesses() -> Vec<Harness> {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("reflexion.db")).await.unwrap();
    let sqlite: Arc<dyn FailureRepository> = Arc::new(SqliteFailureRepository::new(db));
    let memory: Arc<dyn FailureRepository> = Arc::new(InMemoryFailureRepository::new());

    vec![
        Harness {
            name: "sqlite",
            service: Arc::new(StandardAdvisoryService::new(sqlite.clone())),
            repository: sqlite,
            _dir: Some(dir),
        },
        Harness {
            name: "in_memory",
            service: Arc::new(StandardAdvisoryService::new(memory.clone())),
            repository: memory,
            _dir: None,
        },
    ]
}

fn env_in(cwd: &str) -> EnvironmentHash {
    EnvironmentSnapshot::new(cwd, "linux", "3.11.4").hash()
}

fn missing_file() -> Value {
    json!({"path": "missing.py"})
}

async fn fail_missing(service: &StandardAdvisoryService, env: &EnvironmentHash) -> FailureRecord {
    service
        .record_failure("file_read", &missing_file(), "File not found", env)
        .await
        .unwrap()
}

async fn verdict(service: &StandardAdvisoryService, env: &EnvironmentHash) -> AdvisoryResult {
    service.check("file_read", &missing_file(), env).await.result
}

/// Insert a failure directly into the store, as if observed `age` ago.
async fn backdated_failure(
    repo: &Arc<dyn FailureRepository>,
    error_type: ErrorType,
    age: Duration,
    env: &EnvironmentHash,
) {
    let attempt = FailureAttempt {
        tool_signature: ToolSignature::compute("file_read", &missing_file()),
        env_snapshot_hash: env.clone(),
        tool_name: "file_read".to_string(),
        error_type,
        error_message: "File not found".to_string(),
        observed_at: (Utc::now() - age).trunc_subsecs(3),
    };
    repo.upsert(&attempt, &TtlPolicy::default()).await.unwrap();
}

#[test]
fn signature_ignores_key_order() {
    assert_eq!(
        ToolSignature::compute("op", &json!({"a": 1, "b": 2})),
        ToolSignature::compute("op", &json!({"b": 2, "a": 1}))
    );
}

#[test]
fn signature_is_sensitive_to_values() {
    assert_ne!(
        ToolSignature::compute("op", &json!({"path": "a.py"})),
        ToolSignature::compute("op", &json!({"path": "b.py"}))
    );
}

#[test]
fn classification_examples() {
    assert_eq!(classify("Connection refused"), ErrorType::Soft);
    assert_eq!(classify("SyntaxError: invalid syntax"), ErrorType::Hard);
}

#[tokio::test]
async fn first_attempt_is_allowed() {
    for h in harnesses().await {
        let advisory = h.service.check("file_read", &missing_file(), &env_in("/work")).await;
        assert_eq!(advisory.result, AdvisoryResult::Allow, "{}", h.name);
        assert_eq!(advisory.retry_count, 0, "{}", h.name);
    }
}

#[tokio::test]
async fn failures_escalate_from_warn_to_block() {
    for h in harnesses().await {
        let env = env_in("/work");

        fail_missing(&h.service, &env).await;
        assert_eq!(verdict(&h.service, &env).await, AdvisoryResult::Warn, "{}", h.name);

        fail_missing(&h.service, &env).await;
        fail_missing(&h.service, &env).await;
        assert_eq!(verdict(&h.service, &env).await, AdvisoryResult::Block, "{}", h.name);
    }
}

#[tokio::test]
async fn environments_are_isolated() {
    for h in harnesses().await {
        for _ in 0..3 {
            fail_missing(&h.service, &env_in("/env1")).await;
        }

        let advisory = h.service.check("file_read", &missing_file(), &env_in("/env2")).await;
        assert_eq!(advisory.result, AdvisoryResult::Allow, "{}", h.name);
        assert!(advisory.reason.contains("Environment changed"), "{}", h.name);
    }
}

#[tokio::test]
async fn clearing_resolves_the_block() {
    for h in harnesses().await {
        let env = env_in("/work");
        for _ in 0..3 {
            fail_missing(&h.service, &env).await;
        }

        assert!(h
            .service
            .clear_failure("file_read", &missing_file(), Some(&env))
            .await
            .unwrap());
        assert_eq!(verdict(&h.service, &env).await, AdvisoryResult::Allow, "{}", h.name);

        let rows = h
            .repository
            .select_by_signature(&ToolSignature::compute("file_read", &missing_file()), None)
            .await
            .unwrap();
        assert_eq!(rows[0].evolution_status, EvolutionStatus::Resolved, "{}", h.name);
    }
}

#[tokio::test]
async fn failure_after_resolution_starts_over() {
    for h in harnesses().await {
        let env = env_in("/work");
        for _ in 0..3 {
            fail_missing(&h.service, &env).await;
        }
        h.service.clear_failure("file_read", &missing_file(), None).await.unwrap();

        let record = fail_missing(&h.service, &env).await;
        assert_eq!(record.retry_count, 1, "{}", h.name);
        assert_eq!(record.evolution_status, EvolutionStatus::Pending, "{}", h.name);
        assert_eq!(verdict(&h.service, &env).await, AdvisoryResult::Warn, "{}", h.name);
    }
}

#[tokio::test]
async fn soft_failures_expire_after_an_hour() {
    for h in harnesses().await {
        let env = env_in("/work");
        for _ in 0..3 {
            backdated_failure(&h.repository, ErrorType::Soft, Duration::minutes(61), &env).await;
        }

        assert_eq!(verdict(&h.service, &env).await, AdvisoryResult::Allow, "{}", h.name);
        assert!(h.repository.list_recent(10).await.unwrap().is_empty(), "{}", h.name);
    }
}

#[tokio::test]
async fn soft_failures_within_the_hour_still_count() {
    for h in harnesses().await {
        let env = env_in("/work");
        backdated_failure(&h.repository, ErrorType::Soft, Duration::minutes(59), &env).await;
        assert_eq!(verdict(&h.service, &env).await, AdvisoryResult::Warn, "{}", h.name);

        backdated_failure(&h.repository, ErrorType::Soft, Duration::minutes(59), &env).await;
        backdated_failure(&h.repository, ErrorType::Soft, Duration::minutes(59), &env).await;
        let advisory = h.service.check("file_read", &missing_file(), &env).await;
        assert_eq!(advisory.result, AdvisoryResult::Block, "{}", h.name);
        assert_eq!(advisory.retry_count, 3, "{}", h.name);
        assert_eq!(h.repository.list_recent(10).await.unwrap().len(), 1, "{}", h.name);
    }
}

#[tokio::test]
async fn hard_failures_survive_an_hour_but_not_a_week() {
    for h in harnesses().await {
        let env = env_in("/work");
        for _ in 0..3 {
            backdated_failure(&h.repository, ErrorType::Hard, Duration::minutes(61), &env).await;
        }
        assert_eq!(verdict(&h.service, &env).await, AdvisoryResult::Block, "{}", h.name);

        let stale_env = env_in("/stale");
        for _ in 0..3 {
            backdated_failure(&h.repository, ErrorType::Hard, Duration::days(8), &stale_env).await;
        }
        assert_eq!(verdict(&h.service, &stale_env).await, AdvisoryResult::Allow, "{}", h.name);
        assert_eq!(h.repository.list_recent(10).await.unwrap().len(), 1, "{}", h.name);
    }
}

#[tokio::test]
async fn missing_file_scenario() {
    for h in harnesses().await {
        let project = env_in("/home/dev/project");
        for _ in 0..3 {
            let advisory = h.service.check("file_read", &missing_file(), &project).await;
            assert!(advisory.permits_execution(), "{}", h.name);
            fail_missing(&h.service, &project).await;
        }

        let fourth = h.service.check("file_read", &missing_file(), &project).await;
        assert_eq!(fourth.result, AdvisoryResult::Block, "{}", h.name);
        assert!(fourth.reason.contains("missing.py"), "{}", h.name);
        assert!(fourth.reason.contains("File not found"), "{}", h.name);
        assert_eq!(fourth.retry_count, 3, "{}", h.name);

        let other = h.service.check("file_read", &missing_file(), &env_in("/home/dev/other")).await;
        assert_eq!(other.result, AdvisoryResult::Allow, "{}", h.name);
    }
}

#[tokio::test]
async fn concurrent_failures_are_all_counted() {
    for h in harnesses().await {
        let env = env_in("/work");
        let params = json!({"cmd": "cargo build"});

        let tasks = (0..20).map(|_| {
            let service = h.service.clone();
            let env = env.clone();
            let params = params.clone();
            tokio::spawn(async move {
                service
                    .record_failure("shell", &params, "exit status 101", &env)
                    .await
                    .unwrap();
            })
        });
        for joined in futures::future::join_all(tasks).await {
            joined.unwrap();
        }

        let advisory = h.service.check("shell", &params, &env).await;
        assert_eq!(advisory.retry_count, 20, "{}", h.name);
        assert_eq!(advisory.result, AdvisoryResult::Block, "{}", h.name);
    }
}

#[tokio::test]
async fn ignored_failures_never_block() {
    for h in harnesses().await {
        let env = env_in("/work");
        for _ in 0..3 {
            fail_missing(&h.service, &env).await;
        }
        assert!(h.service.ignore_failure("file_read", &missing_file(), None).await.unwrap());

        let record = fail_missing(&h.service, &env).await;
        assert_eq!(record.evolution_status, EvolutionStatus::Ignored, "{}", h.name);
        assert_eq!(verdict(&h.service, &env).await, AdvisoryResult::Allow, "{}", h.name);
    }
}

#[tokio::test]
async fn sqlite_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reflexion.db");
    let env = env_in("/work");

    {
        let db = Database::open(&path).await.unwrap();
        let service = StandardAdvisoryService::new(Arc::new(SqliteFailureRepository::new(db)));
        for _ in 0..3 {
            fail_missing(&service, &env).await;
        }
    }

    let db = Database::open(&path).await.unwrap();
    let service = StandardAdvisoryService::new(Arc::new(SqliteFailureRepository::new(db)));
    assert!(service.check("file_read", &missing_file(), &env).await.is_blocked());
}
