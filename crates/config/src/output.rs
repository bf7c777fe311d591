// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Artifact output settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How much per-request detail is persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportLevel {
    /// Only the final metric summary.
    #[default]
    Summary,
    /// Summary plus one JSONL line per record.
    Records,
    /// Records plus raw parsed responses.
    Raw,
}

/// Settings for run artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory all artifacts are written under.
    #[serde(default = "default_artifact_directory")]
    pub artifact_directory: PathBuf,
    /// How much per-request detail to persist.
    #[serde(default)]
    pub export_level: ExportLevel,
    /// Timeslice width in seconds for sliced post-processing, when enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice_duration: Option<f64>,
    /// Include `INTERNAL`-flagged metrics in the report.
    #[serde(default)]
    pub show_internal_metrics: bool,
}

fn default_artifact_directory() -> PathBuf {
    PathBuf::from("artifacts")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            artifact_directory: default_artifact_directory(),
            export_level: ExportLevel::default(),
            slice_duration: None,
            show_internal_metrics: false,
        }
    }
}
