// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Artifact writers: per-record JSONL and the end-of-run summary.

use crate::error::Error;
use aiperf_messages::{MetricRecordEntry, MetricResult, MetricValue, RequestErrorInfo};
use aiperf_metrics::MetricRegistry;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One exported metric value with its unit.
#[derive(Debug, Serialize)]
struct TaggedValue {
    value: MetricValue,
    unit: String,
}

/// One JSONL line of the records export.
#[derive(Debug, Serialize)]
struct MetricRecordInfo<'a> {
    metadata: &'a aiperf_messages::MetricRecordMetadata,
    metrics: BTreeMap<&'a str, TaggedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a RequestErrorInfo>,
}

/// Writes one JSON object per record to `profile_export.jsonl`.
///
/// Existing content is truncated at open. Records with an empty metric map
/// are still written so record counts reconcile across export levels.
pub struct RecordsJsonlWriter {
    registry: Arc<MetricRegistry>,
    path: PathBuf,
    file: std::io::BufWriter<std::fs::File>,
}

impl RecordsJsonlWriter {
    /// The export filename within the artifact directory.
    pub const FILE_NAME: &'static str = "profile_export.jsonl";

    /// Opens (and truncates) the export file under `artifact_dir`.
    pub fn create(artifact_dir: &Path, registry: Arc<MetricRegistry>) -> Result<Self, Error> {
        std::fs::create_dir_all(artifact_dir).map_err(|e| Error::Export {
            path: artifact_dir.display().to_string(),
            details: e.to_string(),
        })?;
        let path = artifact_dir.join(Self::FILE_NAME);
        let file = std::fs::File::create(&path).map_err(|e| Error::Export {
            path: path.display().to_string(),
            details: e.to_string(),
        })?;
        Ok(Self { registry, path, file: std::io::BufWriter::new(file) })
    }

    /// Appends one record line.
    pub fn write_entry(&mut self, entry: &MetricRecordEntry) -> Result<(), Error> {
        let metrics: BTreeMap<&str, TaggedValue> = entry
            .metrics
            .iter()
            .map(|(tag, value)| {
                let unit = self
                    .registry
                    .spec(tag)
                    .map(|spec| spec.unit.as_str().to_string())
                    .unwrap_or_default();
                (tag.as_str(), TaggedValue { value: value.clone(), unit })
            })
            .collect();
        let info =
            MetricRecordInfo { metadata: &entry.metadata, metrics, error: entry.error.as_ref() };
        let line = serde_json::to_string(&info).map_err(|e| Error::Export {
            path: self.path.display().to_string(),
            details: e.to_string(),
        })?;
        writeln!(self.file, "{line}").map_err(|e| Error::Export {
            path: self.path.display().to_string(),
            details: e.to_string(),
        })
    }

    /// Flushes buffered lines to disk.
    pub fn flush(&mut self) -> Result<(), Error> {
        self.file.flush().map_err(|e| Error::Export {
            path: self.path.display().to_string(),
            details: e.to_string(),
        })
    }
}

/// Writes the end-of-run summary as JSON and CSV.
pub struct SummaryWriter;

impl SummaryWriter {
    /// The JSON summary filename.
    pub const JSON_FILE_NAME: &'static str = "profile_export_aiperf.json";
    /// The CSV summary filename.
    pub const CSV_FILE_NAME: &'static str = "profile_export_aiperf.csv";

    /// Writes both summary artifacts under `artifact_dir`.
    pub fn write(artifact_dir: &Path, results: &[MetricResult]) -> Result<(), Error> {
        std::fs::create_dir_all(artifact_dir).map_err(|e| Error::Export {
            path: artifact_dir.display().to_string(),
            details: e.to_string(),
        })?;

        let json_path = artifact_dir.join(Self::JSON_FILE_NAME);
        let json = serde_json::to_string_pretty(results).map_err(|e| Error::Export {
            path: json_path.display().to_string(),
            details: e.to_string(),
        })?;
        std::fs::write(&json_path, json).map_err(|e| Error::Export {
            path: json_path.display().to_string(),
            details: e.to_string(),
        })?;

        let csv_path = artifact_dir.join(Self::CSV_FILE_NAME);
        let mut csv = String::from(
            "tag,header,unit,avg,min,max,std,p1,p5,p25,p50,p75,p90,p95,p99,count\n",
        );
        for row in results {
            let opt = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
            csv.push_str(&format!(
                "{},{:?},{},{},{},{},{},{},{},{},{},{},{},{},{},{}\n",
                row.tag,
                row.header,
                row.unit,
                row.avg,
                opt(row.min),
                opt(row.max),
                opt(row.std),
                opt(row.p1),
                opt(row.p5),
                opt(row.p25),
                opt(row.p50),
                opt(row.p75),
                opt(row.p90),
                opt(row.p95),
                opt(row.p99),
                row.count,
            ));
        }
        std::fs::write(&csv_path, csv).map_err(|e| Error::Export {
            path: csv_path.display().to_string(),
            details: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiperf_messages::{CreditPhase, MetricRecordMetadata};
    use std::collections::BTreeMap as Map;

    fn entry(metrics: Map<String, MetricValue>) -> MetricRecordEntry {
        MetricRecordEntry {
            metadata: MetricRecordMetadata {
                x_request_id: Some("x-1".to_string()),
                conversation_id: "conv".to_string(),
                turn_index: 0,
                request_start_ns: 123,
                worker_id: "w-0".to_string(),
                record_processor_id: "rp-0".to_string(),
                benchmark_phase: CreditPhase::Profiling,
            },
            metrics,
            error: None,
        }
    }

    #[test]
    fn writes_one_json_object_per_line_with_units() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry =
            Arc::new(MetricRegistry::builtin(&Map::new()).expect("registry"));
        let mut writer =
            RecordsJsonlWriter::create(dir.path(), Arc::clone(&registry)).expect("writer");

        let mut metrics = Map::new();
        let _ = metrics.insert(
            aiperf_metrics::tags::REQUEST_LATENCY.to_string(),
            MetricValue::Int(5_000_000),
        );
        writer.write_entry(&entry(metrics)).expect("write");
        writer.write_entry(&entry(Map::new())).expect("write empty");
        writer.flush().expect("flush");

        let contents =
            std::fs::read_to_string(dir.path().join(RecordsJsonlWriter::FILE_NAME))
                .expect("read");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(first["metadata"]["worker_id"], "w-0");
        assert_eq!(first["metrics"]["request_latency"]["value"], 5_000_000);
        assert_eq!(first["metrics"]["request_latency"]["unit"], "ns");
        // Empty-metric records still export with an empty map.
        let second: serde_json::Value = serde_json::from_str(lines[1]).expect("json");
        assert_eq!(second["metrics"], serde_json::json!({}));
    }

    #[test]
    fn create_truncates_previous_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry =
            Arc::new(MetricRegistry::builtin(&Map::new()).expect("registry"));
        let path = dir.path().join(RecordsJsonlWriter::FILE_NAME);
        std::fs::write(&path, "stale\n").expect("seed");
        let mut writer =
            RecordsJsonlWriter::create(dir.path(), registry).expect("writer");
        writer.flush().expect("flush");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "");
    }

    #[test]
    fn summary_writer_emits_json_and_csv() {
        let dir = tempfile::tempdir().expect("tempdir");
        let results = vec![MetricResult {
            tag: "request_throughput".to_string(),
            header: "Request Throughput".to_string(),
            unit: "requests/sec".to_string(),
            avg: 20.0,
            min: None,
            max: None,
            std: None,
            p1: None,
            p5: None,
            p25: None,
            p50: None,
            p75: None,
            p90: None,
            p95: None,
            p99: None,
            count: 1,
        }];
        SummaryWriter::write(dir.path(), &results).expect("write");
        let json = std::fs::read_to_string(dir.path().join(SummaryWriter::JSON_FILE_NAME))
            .expect("json");
        assert!(json.contains("request_throughput"));
        let csv = std::fs::read_to_string(dir.path().join(SummaryWriter::CSV_FILE_NAME))
            .expect("csv");
        assert!(csv.starts_with("tag,header"));
        assert!(csv.contains("request_throughput"));
    }
}
