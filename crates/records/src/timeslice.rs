// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Optional timeslice post-processing: request counts and latency per
//! fixed-width wall-clock slice.

use crate::error::Error;
use aiperf_config::UserConfig;
use aiperf_messages::MetricRecordEntry;
use aiperf_messages::time::NANOS_PER_SECOND;
use aiperf_metrics::tags;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Accumulated stats for one slice.
#[derive(Debug, Default, Clone, Serialize)]
struct SliceStats {
    requests: u64,
    errors: u64,
    latency_sum_ns: f64,
    latency_count: u64,
}

/// One exported timeslice row.
#[derive(Debug, Serialize)]
struct TimesliceRow {
    slice_index: u64,
    start_offset_sec: f64,
    requests: u64,
    errors: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    avg_request_latency_ms: Option<f64>,
}

/// Buckets records into fixed-width slices anchored at the first observed
/// request start.
pub struct TimesliceProcessor {
    slice_ns: u64,
    origin_ns: Option<u64>,
    slices: BTreeMap<u64, SliceStats>,
}

impl TimesliceProcessor {
    /// The timeslice export filename.
    pub const FILE_NAME: &'static str = "profile_export_timeslices.json";

    /// Builds the processor when `output.slice_duration` is configured.
    ///
    /// Signals the orchestrator to skip timeslicing otherwise.
    pub fn new(user_config: &UserConfig) -> Result<Self, Error> {
        match user_config.output.slice_duration {
            Some(duration) if duration > 0.0 => Ok(Self {
                slice_ns: (duration * NANOS_PER_SECOND as f64) as u64,
                origin_ns: None,
                slices: BTreeMap::new(),
            }),
            Some(duration) => Err(Error::PostProcessorDisabled {
                details: format!("slice_duration must be positive, got {duration}"),
            }),
            None => Err(Error::PostProcessorDisabled {
                details: "timeslice processing requires output.slice_duration".to_string(),
            }),
        }
    }

    /// Folds one record entry into its slice.
    pub fn observe_entry(&mut self, entry: &MetricRecordEntry) {
        let origin = *self.origin_ns.get_or_insert(entry.metadata.request_start_ns);
        let offset = entry.metadata.request_start_ns.saturating_sub(origin);
        let index = offset / self.slice_ns.max(1);
        let slice = self.slices.entry(index).or_default();
        if entry.error.is_some() {
            slice.errors += 1;
        } else {
            slice.requests += 1;
        }
        if let Some(latency) =
            entry.metrics.get(tags::REQUEST_LATENCY).and_then(|v| v.as_scalar_f64())
        {
            slice.latency_sum_ns += latency;
            slice.latency_count += 1;
        }
    }

    /// Writes the slice table under `artifact_dir`.
    pub fn export(&self, artifact_dir: &Path) -> Result<(), Error> {
        let rows: Vec<TimesliceRow> = self
            .slices
            .iter()
            .map(|(index, stats)| TimesliceRow {
                slice_index: *index,
                start_offset_sec: (*index * self.slice_ns) as f64 / NANOS_PER_SECOND as f64,
                requests: stats.requests,
                errors: stats.errors,
                avg_request_latency_ms: (stats.latency_count > 0).then(|| {
                    stats.latency_sum_ns / stats.latency_count as f64 / 1e6
                }),
            })
            .collect();
        let path = artifact_dir.join(Self::FILE_NAME);
        let json = serde_json::to_string_pretty(&rows).map_err(|e| Error::Export {
            path: path.display().to_string(),
            details: e.to_string(),
        })?;
        std::fs::write(&path, json).map_err(|e| Error::Export {
            path: path.display().to_string(),
            details: e.to_string(),
        })
    }
}
