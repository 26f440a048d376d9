// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Lib
//!
//! Failure memory and advisory engine ("reflexion") for tool execution.
//!
//! # Architecture
//!
//! - **Layer:** Learning & Memory Layer
//! - **Purpose:** Stops an agent from blindly repeating a failed tool call in an
//!   unchanged environment

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
