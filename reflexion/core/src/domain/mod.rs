// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mod
//!
//! Provides the reflexion domain model.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Failure records, fingerprints, classification and advisory verdicts

pub mod failure;
pub mod signature;
pub mod environment;
pub mod classifier;
pub mod advisory;
pub mod repository;
pub mod reflexion_config;

pub use failure::*;
pub use signature::*;
pub use environment::*;
pub use classifier::*;
pub use advisory::*;
