// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Fixed-schedule construction: load, truncate, group, and anchor a
//! `(timestamp_ms, conversation_id)` trace.

use crate::config::TimingManagerConfig;
use crate::error::Error;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// One trace entry as stored on disk.
#[derive(Debug, Deserialize)]
struct ScheduleEntry {
    timestamp_ms: u64,
    conversation_id: String,
}

/// A grouped, anchored fixed schedule ready for replay.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedSchedule {
    /// `(timestamp_ms, conversation ids)` groups, ascending by timestamp.
    pub groups: Vec<(u64, Vec<String>)>,
    /// Zero reference in milliseconds; offsets are relative to this.
    pub zero_ms: u64,
    /// Total credits the schedule will issue.
    pub total_requests: u64,
}

impl FixedSchedule {
    /// Builds a schedule from raw entries under the configured offsets.
    ///
    /// Entries past `fixed_schedule_end_offset` are truncated before
    /// grouping, and the truncated count is what the profiling phase
    /// expects.
    pub fn build(
        entries: Vec<(u64, String)>,
        config: &TimingManagerConfig,
    ) -> Result<Self, Error> {
        let entries: Vec<(u64, String)> = match config.fixed_schedule_end_offset {
            Some(end) => entries.into_iter().filter(|(ts, _)| *ts <= end).collect(),
            None => entries,
        };
        if entries.is_empty() {
            return Err(Error::Configuration {
                details: "fixed schedule is empty after applying offsets".to_string(),
            });
        }

        let mut groups: BTreeMap<u64, Vec<String>> = BTreeMap::new();
        let mut total_requests = 0u64;
        for (timestamp, conversation_id) in entries {
            groups.entry(timestamp).or_default().push(conversation_id);
            total_requests += 1;
        }

        let first_timestamp = *groups.keys().next().unwrap_or(&0);
        let zero_ms = if config.auto_offset_timestamps {
            first_timestamp
        } else {
            config.fixed_schedule_start_offset.unwrap_or(0)
        };

        Ok(Self { groups: groups.into_iter().collect(), zero_ms, total_requests })
    }

    /// Loads raw entries from a JSONL trace file.
    pub fn load_entries(path: impl AsRef<Path>) -> Result<Vec<(u64, String)>, Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| Error::ScheduleLoad {
            path: path.display().to_string(),
            details: e.to_string(),
        })?;
        let mut entries = Vec::new();
        for (line_number, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let entry: ScheduleEntry =
                serde_json::from_str(line).map_err(|e| Error::ScheduleLoad {
                    path: path.display().to_string(),
                    details: format!("line {}: {e}", line_number + 1),
                })?;
            entries.push((entry.timestamp_ms, entry.conversation_id));
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn entries() -> Vec<(u64, String)> {
        vec![
            (1_500, "c".to_string()),
            (1_000, "a".to_string()),
            (1_000, "b".to_string()),
            (2_000, "d".to_string()),
        ]
    }

    #[test]
    fn groups_by_timestamp_and_sorts() {
        let schedule =
            FixedSchedule::build(entries(), &TimingManagerConfig::default()).expect("schedule");
        assert_eq!(schedule.total_requests, 4);
        assert_eq!(
            schedule.groups,
            vec![
                (1_000, vec!["a".to_string(), "b".to_string()]),
                (1_500, vec!["c".to_string()]),
                (2_000, vec!["d".to_string()]),
            ]
        );
        // Auto offset anchors at the earliest timestamp.
        assert_eq!(schedule.zero_ms, 1_000);
    }

    #[test]
    fn explicit_start_offset_wins_when_auto_offset_is_off() {
        let config = TimingManagerConfig {
            auto_offset_timestamps: false,
            fixed_schedule_start_offset: Some(500),
            ..TimingManagerConfig::default()
        };
        let schedule = FixedSchedule::build(entries(), &config).expect("schedule");
        assert_eq!(schedule.zero_ms, 500);

        let config = TimingManagerConfig {
            auto_offset_timestamps: false,
            ..TimingManagerConfig::default()
        };
        let schedule = FixedSchedule::build(entries(), &config).expect("schedule");
        assert_eq!(schedule.zero_ms, 0);
    }

    #[test]
    fn end_offset_truncates_the_tail() {
        let config = TimingManagerConfig {
            fixed_schedule_end_offset: Some(1_500),
            ..TimingManagerConfig::default()
        };
        let schedule = FixedSchedule::build(entries(), &config).expect("schedule");
        assert_eq!(schedule.total_requests, 3);
        assert!(schedule.groups.iter().all(|(ts, _)| *ts <= 1_500));
    }

    #[test]
    fn empty_after_truncation_is_an_error() {
        let config = TimingManagerConfig {
            fixed_schedule_end_offset: Some(10),
            ..TimingManagerConfig::default()
        };
        assert!(FixedSchedule::build(entries(), &config).is_err());
    }

    #[test]
    fn loads_jsonl_traces() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "{{\"timestamp_ms\": 100, \"conversation_id\": \"x\"}}").expect("write");
        writeln!(file).expect("write");
        writeln!(file, "{{\"timestamp_ms\": 200, \"conversation_id\": \"y\"}}").expect("write");
        let entries = FixedSchedule::load_entries(file.path()).expect("load");
        assert_eq!(entries, vec![(100, "x".to_string()), (200, "y".to_string())]);
    }

    #[test]
    fn malformed_lines_are_schedule_load_errors() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "not json").expect("write");
        assert!(matches!(
            FixedSchedule::load_entries(file.path()),
            Err(Error::ScheduleLoad { .. })
        ));
    }
}
