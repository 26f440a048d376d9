// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Failure Sweeper - Background task for record expiry
//!
//! Periodically deletes failure records whose TTL has elapsed. Advisory
//! checks already ignore expired records and sweep eagerly; this task keeps
//! the store small on hosts that record far more often than they check.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Periodic physical deletion of expired failure records

use anyhow::Result;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::advisory_service::AdvisoryService;
use crate::domain::reflexion_config::SweeperConfig;

/// Failure Sweeper - Background task
pub struct FailureSweeper {
    advisory_service: Arc<dyn AdvisoryService>,
    config: SweeperConfig,
    shutdown_token: CancellationToken,
}

impl FailureSweeper {
    pub fn new(advisory_service: Arc<dyn AdvisoryService>, config: SweeperConfig) -> Self {
        Self {
            advisory_service,
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Start the sweeper background task
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        if !self.config.enabled {
            info!("Failure sweeper is disabled");
            return;
        }

        info!(
            interval_seconds = self.config.interval.as_secs(),
            "Starting failure sweeper background task"
        );

        let mut tick = interval(self.config.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    debug!("Running failure sweeper cycle");

                    match self.sweep_cycle().await {
                        Ok(removed) => debug!(removed, "Failure sweeper cycle completed"),
                        Err(e) => warn!("Failure sweeper cycle failed: {}", e),
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping failure sweeper");
                    break;
                }
            }
        }

        info!("Failure sweeper background task stopped");
    }

    async fn sweep_cycle(&self) -> Result<u64> {
        Ok(self.advisory_service.sweep_expired().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::advisory_service::StandardAdvisoryService;
    use crate::domain::environment::EnvironmentHash;
    use crate::domain::failure::{ErrorType, FailureAttempt, TtlPolicy};
    use crate::domain::repository::FailureRepository;
    use crate::domain::signature::ToolSignature;
    use crate::infrastructure::repositories::InMemoryFailureRepository;
    use chrono::{Duration, Utc};
    use std::time::Duration as StdDuration;

    async fn seeded_repository() -> Arc<InMemoryFailureRepository> {
        let repo = Arc::new(InMemoryFailureRepository::new());
        let attempt = FailureAttempt {
            tool_signature: ToolSignature::from_hash("sig"),
            env_snapshot_hash: EnvironmentHash::from_hash("env"),
            tool_name: "http_get".to_string(),
            error_type: ErrorType::Soft,
            error_message: "503 Service Unavailable".to_string(),
            observed_at: Utc::now() - Duration::hours(2),
        };
        repo.upsert(&attempt, &TtlPolicy::default()).await.unwrap();
        repo
    }

    #[tokio::test]
    async fn test_sweep_cycle() {
        let repo = seeded_repository().await;
        let service: Arc<dyn AdvisoryService> =
            Arc::new(StandardAdvisoryService::new(repo.clone()));
        let sweeper = FailureSweeper::new(service, SweeperConfig::default());

        assert_eq!(sweeper.sweep_cycle().await.unwrap(), 1);
        assert_eq!(sweeper.sweep_cycle().await.unwrap(), 0);
        assert!(repo.list_recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_disabled() {
        let repo = seeded_repository().await;
        let service: Arc<dyn AdvisoryService> =
            Arc::new(StandardAdvisoryService::new(repo.clone()));
        let sweeper = Arc::new(FailureSweeper::new(service, SweeperConfig::default()));

        // Disabled sweeper returns immediately without touching the store
        sweeper.start().await.unwrap();
        assert_eq!(repo.list_recent(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_runs_and_stops() {
        let repo = seeded_repository().await;
        let service: Arc<dyn AdvisoryService> =
            Arc::new(StandardAdvisoryService::new(repo.clone()));
        let config = SweeperConfig {
            enabled: true,
            interval: StdDuration::from_millis(10),
        };
        let sweeper = Arc::new(FailureSweeper::new(service, config));
        let token = sweeper.shutdown_token();
        let handle = sweeper.start();

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        token.cancel();
        tokio::time::timeout(StdDuration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();

        assert!(repo.list_recent(10).await.unwrap().is_empty());
    }
}
