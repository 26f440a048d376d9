// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Tool Gate
//!
//! Wraps tool execution with the reflexion advisory: consult the service
//! before running a tool, report the outcome afterwards.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Pre-execution gate and post-execution report for tool calls

use serde_json::Value;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::application::advisory_service::{AdvisoryService, ToolOutcome};
use crate::domain::advisory::{Advisory, AdvisoryResult};
use crate::domain::environment::{EnvironmentHash, EnvironmentSnapshot};

/// A prospective tool call and the environment it runs in.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub tool_name: String,
    pub params: Value,
    pub environment: EnvironmentSnapshot,
}

impl ToolCall {
    pub fn new(
        tool_name: impl Into<String>,
        params: Value,
        environment: EnvironmentSnapshot,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            params,
            environment,
        }
    }

    pub fn env_hash(&self) -> EnvironmentHash {
        self.environment.hash()
    }
}

/// Outcome of [`ToolGate::guard`].
#[derive(Debug)]
pub enum GuardedExecution<T, E> {
    /// The tool was not run. `reason` must be surfaced to the requester.
    Blocked(Advisory),
    /// The tool ran. A WARN advisory is carried along with the result.
    Executed {
        advisory: Advisory,
        result: Result<T, E>,
    },
}

impl<T, E> GuardedExecution<T, E> {
    pub fn advisory(&self) -> &Advisory {
        match self {
            GuardedExecution::Blocked(advisory) => advisory,
            GuardedExecution::Executed { advisory, .. } => advisory,
        }
    }

    /// Advisory text to show next to the tool result, for WARN and BLOCK.
    pub fn notice(&self) -> Option<&str> {
        let advisory = self.advisory();
        match advisory.result {
            AdvisoryResult::Allow => None,
            AdvisoryResult::Warn | AdvisoryResult::Block => Some(advisory.reason.as_str()),
        }
    }
}

#[derive(Clone)]
pub struct ToolGate {
    service: Arc<dyn AdvisoryService>,
}

impl ToolGate {
    pub fn new(service: Arc<dyn AdvisoryService>) -> Self {
        Self { service }
    }

    pub async fn before_execution(&self, call: &ToolCall) -> Advisory {
        let advisory = self
            .service
            .check(&call.tool_name, &call.params, &call.env_hash())
            .await;

        if advisory.is_blocked() {
            info!(
                tool_name = %call.tool_name,
                retry_count = advisory.retry_count,
                "Tool call blocked by reflexion"
            );
        }
        advisory
    }

    /// Report the outcome. Store errors are logged, never returned.
    pub async fn after_execution(&self, call: &ToolCall, outcome: &ToolOutcome) {
        if let Err(e) = self
            .service
            .report_outcome(&call.tool_name, &call.params, &call.env_hash(), outcome)
            .await
        {
            warn!(tool_name = %call.tool_name, "Failed to report tool outcome to reflexion: {}", e);
        }
    }

    /// Run `execute` between [`before_execution`](Self::before_execution) and
    /// [`after_execution`](Self::after_execution). An `Err` from the tool is
    /// recorded using its `Display` text.
    pub async fn guard<F, Fut, T, E>(&self, call: &ToolCall, execute: F) -> GuardedExecution<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let advisory = self.before_execution(call).await;
        if advisory.is_blocked() {
            return GuardedExecution::Blocked(advisory);
        }

        let result = execute().await;
        let outcome = match &result {
            Ok(_) => ToolOutcome::Success,
            Err(e) => ToolOutcome::failure(e.to_string()),
        };
        self.after_execution(call, &outcome).await;

        GuardedExecution::Executed { advisory, result }
    }
}
