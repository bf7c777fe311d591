// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Stages 2 and 3: run-wide accumulation and result synthesis.

use crate::error::Error;
use crate::filters::flag_filters;
use aiperf_config::UserConfig;
use aiperf_messages::{MetricRecordEntry, MetricResult, PhaseProcessingStats};
use aiperf_metrics::{
    MetricInstance, MetricRegistry, MetricResultsMap, MetricType, ResultsValue,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// The single consumer of stage-1 batches.
///
/// RECORD values append to per-metric arrays; AGGREGATE values fold into
/// singleton instances. DERIVED and SUM_AGGREGATE values are computed only
/// at summarize time, against a snapshot, so summarizing twice over
/// unchanged state yields identical results.
pub struct ResultsAccumulator {
    registry: Arc<MetricRegistry>,
    aggregates: HashMap<String, MetricInstance>,
    results: MetricResultsMap,
    derive_order: Vec<String>,
    processing: PhaseProcessingStats,
}

impl ResultsAccumulator {
    /// Builds the accumulator for this run's capability filter.
    pub fn new(registry: Arc<MetricRegistry>, user_config: &UserConfig) -> Result<Self, Error> {
        let (required, disallowed) = flag_filters(user_config);
        let aggregate_tags = registry.tags_applicable_to(
            required,
            disallowed,
            Some(&[MetricType::Aggregate]),
        );
        let mut aggregates = HashMap::with_capacity(aggregate_tags.len());
        for tag in &aggregate_tags {
            let _ = aggregates.insert(tag.clone(), registry.create_instance(tag)?);
        }

        let derived_tags = registry.tags_applicable_to(
            required,
            disallowed,
            Some(&[MetricType::Derived, MetricType::SumAggregate]),
        );
        let derive_order = registry.dependency_order_for(&derived_tags)?;

        Ok(Self {
            registry,
            aggregates,
            results: MetricResultsMap::new(),
            derive_order,
            processing: PhaseProcessingStats::default(),
        })
    }

    /// Folds one stage-1 entry into the run state.
    pub fn process_entry(&mut self, entry: &MetricRecordEntry) {
        if entry.error.is_some() {
            self.processing.errors += 1;
        } else {
            self.processing.processed += 1;
        }
        for (tag, value) in &entry.metrics {
            let Ok(spec) = self.registry.spec(tag) else {
                warn!(%tag, "dropping value for unregistered metric");
                continue;
            };
            match spec.metric_type {
                MetricType::Record => self.results.append_record_value(tag, value),
                MetricType::Aggregate => {
                    let Some(MetricInstance::Aggregate(aggregate)) =
                        self.aggregates.get_mut(tag)
                    else {
                        debug!(%tag, "aggregate value for a filtered metric");
                        continue;
                    };
                    aggregate.aggregate_value(value);
                    self.results.insert_scalar(tag.clone(), aggregate.current_value());
                }
                MetricType::Derived | MetricType::SumAggregate => {
                    // Derived values are computed only at summarize time.
                    debug!(%tag, "ignoring derived value in record stream");
                }
            }
        }
    }

    /// Record processing counters for realtime snapshots.
    #[must_use]
    pub fn processing_stats(&self) -> PhaseProcessingStats {
        self.processing
    }

    /// Computes derived metrics and assembles the final result rows.
    ///
    /// Deterministic and side-effect free: the accumulated state is not
    /// modified, so repeated calls over unchanged state are identical.
    #[must_use]
    pub fn summarize(&self) -> Vec<MetricResult> {
        // Work over a snapshot so derived values never leak back into the
        // accumulated state.
        let mut snapshot = MetricResultsMap::new();
        for (tag, value) in self.results.iter() {
            match value {
                ResultsValue::Array(array) => snapshot.append_record_value(
                    tag,
                    &aiperf_messages::MetricValue::FloatList(array.data().to_vec()),
                ),
                ResultsValue::Scalar(scalar) => snapshot.insert_scalar(tag.clone(), scalar.clone()),
            }
        }
        for tag in &self.derive_order {
            let Ok(instance) = self.registry.create_instance(tag) else { continue };
            let MetricInstance::Derived(metric) = instance else { continue };
            match metric.derive_value(&snapshot) {
                Ok(value) => snapshot.insert_scalar(tag.clone(), value),
                Err(e) if e.is_no_value() => {
                    debug!(%tag, error = %e, "derived metric unavailable");
                }
                Err(e) => {
                    // The metric is omitted from the report; everything else
                    // proceeds.
                    warn!(%tag, error = %e, "error deriving metric");
                }
            }
        }

        let mut rows = Vec::new();
        for (tag, value) in snapshot.iter() {
            let Ok(spec) = self.registry.spec(tag) else { continue };
            let row = match value {
                ResultsValue::Array(array) => {
                    array.to_result(&spec.tag, &spec.header, spec.unit.as_str())
                }
                ResultsValue::Scalar(scalar) => scalar.as_scalar_f64().map(|avg| MetricResult {
                    tag: spec.tag.clone(),
                    header: spec.header.clone(),
                    unit: spec.unit.as_str().to_string(),
                    avg,
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
                }),
            };
            if let Some(row) = row {
                rows.push(row);
            }
        }

        // Ordered metrics first by display order, the rest after by tag.
        rows.sort_by(|a, b| {
            let order = |row: &MetricResult| {
                self.registry
                    .spec(&row.tag)
                    .ok()
                    .and_then(|spec| spec.display_order)
                    .unwrap_or(u32::MAX)
            };
            order(a).cmp(&order(b)).then_with(|| a.tag.cmp(&b.tag))
        });
        rows
    }
}
