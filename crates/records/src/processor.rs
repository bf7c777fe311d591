// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Stage 1: per-record metric computation, distributed across record
//! processors.

use crate::error::Error;
use crate::filters::flag_filters;
use aiperf_config::UserConfig;
use aiperf_messages::{
    MetricRecordEntry, MetricRecordMetadata, ParsedResponseRecord,
};
use aiperf_metrics::{
    MetricFlags, MetricInstance, MetricRecordMap, MetricRegistry, MetricType,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Computes RECORD and AGGREGATE values for each incoming record.
///
/// Parse lists are pre-ordered so dependencies precede dependents, and are
/// split by record validity: valid records run the non-error list, error
/// records run the `ERROR_ONLY` list.
pub struct StageOneProcessor {
    record_processor_id: String,
    valid_metrics: Vec<MetricInstance>,
    error_metrics: Vec<MetricInstance>,
}

impl StageOneProcessor {
    /// Builds the ordered parse lists for this run's capability filter.
    pub fn new(
        registry: &Arc<MetricRegistry>,
        user_config: &UserConfig,
        record_processor_id: impl Into<String>,
    ) -> Result<Self, Error> {
        let (required, disallowed) = flag_filters(user_config);
        let types = [MetricType::Record, MetricType::Aggregate];

        let valid_tags = registry.tags_applicable_to(
            required,
            disallowed | MetricFlags::ERROR_ONLY,
            Some(&types),
        );
        let error_tags = registry.tags_applicable_to(
            required | MetricFlags::ERROR_ONLY,
            disallowed,
            Some(&types),
        );

        let mut valid_metrics = Vec::with_capacity(valid_tags.len());
        for tag in registry.dependency_order_for(&valid_tags)? {
            valid_metrics.push(registry.create_instance(&tag)?);
        }
        let mut error_metrics = Vec::with_capacity(error_tags.len());
        for tag in registry.dependency_order_for(&error_tags)? {
            error_metrics.push(registry.create_instance(&tag)?);
        }

        Ok(Self { record_processor_id: record_processor_id.into(), valid_metrics, error_metrics })
    }

    /// This processor's id, stamped into batch metadata.
    #[must_use]
    pub fn record_processor_id(&self) -> &str {
        &self.record_processor_id
    }

    /// Computes every applicable metric for one record.
    ///
    /// A metric that cannot be computed is skipped; other metrics and other
    /// records proceed.
    #[must_use]
    pub fn process_record(&self, record: &ParsedResponseRecord) -> MetricRecordMap {
        let mut so_far = MetricRecordMap::new();
        let metrics =
            if record.valid() { &self.valid_metrics } else { &self.error_metrics };
        for metric in metrics {
            let spec = metric.spec();
            if spec.required_metrics.iter().any(|tag| !so_far.contains(tag)) {
                debug!(tag = %spec.tag, "skipping metric with missing dependencies");
                continue;
            }
            let parsed = match metric {
                MetricInstance::Record(m) => m.parse_record(record, &so_far),
                MetricInstance::Aggregate(m) => m.parse_record(record, &so_far),
                MetricInstance::Derived(_) => continue,
            };
            match parsed {
                Ok(value) => so_far.insert(spec.tag.clone(), value),
                Err(e) if e.is_no_value() => {
                    debug!(tag = %spec.tag, error = %e, "no metric value for record");
                }
                Err(e) => {
                    warn!(tag = %spec.tag, error = %e, "error parsing record for metric");
                }
            }
        }
        so_far
    }

    /// Wraps one processed record as a batch entry for the results
    /// processor.
    #[must_use]
    pub fn to_entry(
        &self,
        record: &ParsedResponseRecord,
        metrics: MetricRecordMap,
    ) -> MetricRecordEntry {
        MetricRecordEntry {
            metadata: MetricRecordMetadata {
                x_request_id: record.request.x_request_id.clone(),
                conversation_id: record.request.conversation_id.clone(),
                turn_index: record.request.turn_index,
                request_start_ns: record.request.timestamp_ns,
                worker_id: record.request.worker_id.clone(),
                record_processor_id: self.record_processor_id.clone(),
                benchmark_phase: record.request.credit_phase,
            },
            metrics: metrics.into_inner(),
            error: record.request.error.clone(),
        }
    }
}
