// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Goodput metrics: requests satisfying every user-supplied SLO, and their
//! per-second rate.

use crate::error::MetricError;
use crate::flags::MetricFlags;
use crate::tags;
use crate::traits::{AggregateMetric, DerivedMetric, MetricSpec, MetricType};
use crate::units::MetricUnit;
use crate::value::{MetricRecordMap, MetricResultsMap};
use aiperf_messages::{MetricValue, ParsedResponseRecord};

/// One SLO threshold normalized into its metric's native unit.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSlo {
    /// Tag of the constrained metric.
    pub tag: String,
    /// Threshold in the metric's native unit.
    pub threshold: f64,
    /// Comparison direction: `value >= threshold` when true, else `<=`.
    pub larger_is_better: bool,
}

impl NormalizedSlo {
    fn passes(&self, value: f64) -> bool {
        if self.larger_is_better { value >= self.threshold } else { value <= self.threshold }
    }
}

/// Counts requests that satisfy all configured SLO thresholds.
pub struct GoodRequestCountMetric {
    spec: MetricSpec,
    slos: Vec<NormalizedSlo>,
    total: i64,
}

impl GoodRequestCountMetric {
    /// Counter over the given normalized SLOs. With no SLOs every record
    /// contributes zero.
    #[must_use]
    pub fn new(slos: Vec<NormalizedSlo>) -> Self {
        let required: Vec<&str> = slos.iter().map(|slo| slo.tag.as_str()).collect();
        Self {
            spec: MetricSpec::new(
                tags::GOOD_REQUEST_COUNT,
                "Good Request Count",
                MetricUnit::Requests,
                MetricType::Aggregate,
            )
            .flags(MetricFlags::GOODPUT | MetricFlags::NO_CONSOLE)
            .requires(&required),
            slos,
            total: 0,
        }
    }
}

impl AggregateMetric for GoodRequestCountMetric {
    fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    fn parse_record(
        &self,
        _record: &ParsedResponseRecord,
        so_far: &MetricRecordMap,
    ) -> Result<MetricValue, MetricError> {
        if self.slos.is_empty() {
            return Ok(MetricValue::Int(0));
        }
        for slo in &self.slos {
            // A record missing a constrained metric cannot be good.
            let value = match so_far.scalar_or_raise(&slo.tag) {
                Ok(value) => value,
                Err(_) => return Ok(MetricValue::Int(0)),
            };
            if !slo.passes(value) {
                return Ok(MetricValue::Int(0));
            }
        }
        Ok(MetricValue::Int(1))
    }

    fn aggregate_value(&mut self, value: &MetricValue) {
        self.total += value.as_scalar_i64().unwrap_or(0);
    }

    fn current_value(&self) -> MetricValue {
        MetricValue::Int(self.total)
    }
}

/// Goodput: good requests per second of benchmark duration.
pub struct GoodputMetric {
    spec: MetricSpec,
}

impl GoodputMetric {
    /// New instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spec: MetricSpec::new(
                tags::GOODPUT,
                "Goodput",
                MetricUnit::RequestsPerSecond,
                MetricType::Derived,
            )
            .display_order(950)
            .flags(MetricFlags::GOODPUT | MetricFlags::LARGER_IS_BETTER)
            .requires(&[tags::GOOD_REQUEST_COUNT, tags::BENCHMARK_DURATION]),
        }
    }
}

impl Default for GoodputMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl DerivedMetric for GoodputMetric {
    fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    fn derive_value(&self, results: &MetricResultsMap) -> Result<MetricValue, MetricError> {
        let good = results.scalar_or_raise(tags::GOOD_REQUEST_COUNT)?;
        let duration_sec = results.converted_or_raise(
            tags::BENCHMARK_DURATION,
            MetricUnit::Nanoseconds,
            MetricUnit::Seconds,
        )?;
        if duration_sec <= 0.0 {
            return Err(MetricError::invalid("benchmark duration must be positive"));
        }
        Ok(MetricValue::Float(good / duration_sec))
    }
}
