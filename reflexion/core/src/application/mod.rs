// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod advisory_service;
pub mod tool_gate;
pub mod failure_sweeper;
pub mod repository_factory;

// Re-export use cases for convenience
pub use advisory_service::{AdvisoryService, ReflexionError, StandardAdvisoryService, ToolOutcome};
pub use tool_gate::{GuardedExecution, ToolCall, ToolGate};
pub use failure_sweeper::FailureSweeper;
pub use repository_factory::create_failure_repository;
