// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Environment Snapshots
//!
//! An [`EnvironmentSnapshot`] captures *where* an operation was attempted. Two
//! identical tool calls made in different directories, on different platforms
//! or against a different set of referenced files are distinct attempts, which
//! is what lets an agent retry after fixing its surroundings.
//!
//! The hash input is the fields joined with `|` in this order:
//!
//! ```text
//! working_directory | platform | runtime major.minor [| sorted files joined by '|']
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::signature::fingerprint;

/// Deterministic fingerprint of an [`EnvironmentSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentHash(String);

impl EnvironmentHash {
    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EnvironmentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EnvironmentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Execution context of a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub working_directory: PathBuf,
    pub platform: String,
    pub runtime_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_context: Option<Vec<String>>,
}

impl EnvironmentSnapshot {
    pub fn new(
        working_directory: impl Into<PathBuf>,
        platform: impl Into<String>,
        runtime_version: impl Into<String>,
    ) -> Self {
        Self {
            working_directory: working_directory.into(),
            platform: platform.into(),
            runtime_version: runtime_version.into(),
            file_context: None,
        }
    }

    /// Attach the set of files the operation refers to.
    pub fn with_file_context<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.file_context = Some(files.into_iter().map(Into::into).collect());
        self
    }

    /// Snapshot the current process: working directory and OS identifier.
    ///
    /// Falls back to `.` when the working directory cannot be read (deleted
    /// directory, missing permissions).
    pub fn capture(runtime_version: impl Into<String>) -> Self {
        let working_directory = std::env::current_dir().unwrap_or_else(|e| {
            tracing::warn!("Could not read working directory for environment snapshot: {}", e);
            PathBuf::from(".")
        });
        Self::new(working_directory, std::env::consts::OS, runtime_version)
    }

    /// Hash the snapshot.
    pub fn hash(&self) -> EnvironmentHash {
        EnvironmentHash(fingerprint(self.canonical().as_bytes()))
    }

    fn canonical(&self) -> String {
        let mut parts = vec![
            self.working_directory.to_string_lossy().into_owned(),
            self.platform.clone(),
            major_minor(&self.runtime_version),
        ];

        // An empty file list is the same environment as none at all.
        if let Some(files) = self.file_context.as_ref().filter(|files| !files.is_empty()) {
            let mut files = files.clone();
            files.sort();
            parts.push(files.join("|"));
        }

        parts.join("|")
    }
}

/// Reduce a version string to `major.minor` (`"3.11.4"` → `"3.11"`).
///
/// Anything after the first non-numeric component is dropped, so
/// `"1.88.0-nightly"` becomes `"1.88"`. Unparseable input is returned trimmed.
pub fn major_minor(version: &str) -> String {
    let version = version.trim().trim_start_matches('v');
    let components: Vec<&str> = version
        .split('.')
        .take(2)
        .map(|c| c.split(|ch: char| !ch.is_ascii_digit()).next().unwrap_or(""))
        .take_while(|c| !c.is_empty())
        .collect();

    if components.is_empty() {
        version.to_string()
    } else {
        components.join(".")
    }
}
