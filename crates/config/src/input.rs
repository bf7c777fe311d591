// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Input dataset settings.

use serde::{Deserialize, Serialize};

/// Settings for the dataset fed to workers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    /// Dataset file to load; synthetic single-turn data when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Named custom dataset loader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_dataset_type: Option<String>,
    /// Seed for every PRNG in the run; unseeded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_seed: Option<u64>,
    /// Use the earliest schedule timestamp as the zero reference.
    #[serde(default = "default_true")]
    pub fixed_schedule_auto_offset: bool,
    /// Explicit zero reference in milliseconds; used when auto-offset is off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_schedule_start_offset: Option<u64>,
    /// Truncate schedule entries past this offset in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_schedule_end_offset: Option<u64>,
}

fn default_true() -> bool {
    true
}
