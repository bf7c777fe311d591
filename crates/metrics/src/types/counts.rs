// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! AGGREGATE counter and extremum metrics.

use crate::error::MetricError;
use crate::flags::MetricFlags;
use crate::tags;
use crate::traits::{AggregateMetric, MetricSpec, MetricType};
use crate::units::MetricUnit;
use crate::value::MetricRecordMap;
use aiperf_messages::{MetricValue, ParsedResponseRecord};

/// Count of valid requests.
pub struct RequestCountMetric {
    spec: MetricSpec,
    total: i64,
}

impl RequestCountMetric {
    /// New instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spec: MetricSpec::new(
                tags::REQUEST_COUNT,
                "Request Count",
                MetricUnit::Requests,
                MetricType::Aggregate,
            )
            .short_header("Requests")
            .display_order(1000)
            .flags(MetricFlags::LARGER_IS_BETTER),
            total: 0,
        }
    }
}

impl Default for RequestCountMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregateMetric for RequestCountMetric {
    fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    fn parse_record(
        &self,
        _record: &ParsedResponseRecord,
        _so_far: &MetricRecordMap,
    ) -> Result<MetricValue, MetricError> {
        Ok(MetricValue::Int(1))
    }

    fn aggregate_value(&mut self, value: &MetricValue) {
        self.total += value.as_scalar_i64().unwrap_or(0);
    }

    fn current_value(&self) -> MetricValue {
        MetricValue::Int(self.total)
    }
}

/// Count of error requests.
pub struct ErrorRequestCountMetric {
    spec: MetricSpec,
    total: i64,
}

impl ErrorRequestCountMetric {
    /// New instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spec: MetricSpec::new(
                tags::ERROR_REQUEST_COUNT,
                "Error Request Count",
                MetricUnit::Requests,
                MetricType::Aggregate,
            )
            .short_header("Error Count")
            .flags(MetricFlags::ERROR_ONLY),
            total: 0,
        }
    }
}

impl Default for ErrorRequestCountMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregateMetric for ErrorRequestCountMetric {
    fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    fn parse_record(
        &self,
        _record: &ParsedResponseRecord,
        _so_far: &MetricRecordMap,
    ) -> Result<MetricValue, MetricError> {
        Ok(MetricValue::Int(1))
    }

    fn aggregate_value(&mut self, value: &MetricValue) {
        self.total += value.as_scalar_i64().unwrap_or(0);
    }

    fn current_value(&self) -> MetricValue {
        MetricValue::Int(self.total)
    }
}

/// Minimum wall-clock request timestamp across the run.
pub struct MinRequestTimestampMetric {
    spec: MetricSpec,
    min: i64,
}

impl MinRequestTimestampMetric {
    /// New instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spec: MetricSpec::new(
                tags::MIN_REQUEST_TIMESTAMP,
                "Minimum Request Timestamp",
                MetricUnit::Nanoseconds,
                MetricType::Aggregate,
            )
            .short_header("Min Req")
            .flags(MetricFlags::NO_CONSOLE | MetricFlags::NO_INDIVIDUAL_RECORDS),
            min: i64::MAX,
        }
    }
}

impl Default for MinRequestTimestampMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregateMetric for MinRequestTimestampMetric {
    fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    fn parse_record(
        &self,
        record: &ParsedResponseRecord,
        _so_far: &MetricRecordMap,
    ) -> Result<MetricValue, MetricError> {
        // Wall-clock timestamp, not the monotonic start: extrema must be
        // comparable across worker processes.
        Ok(MetricValue::Int(record.request.timestamp_ns as i64))
    }

    fn aggregate_value(&mut self, value: &MetricValue) {
        if let Some(v) = value.as_scalar_i64()
            && v < self.min
        {
            self.min = v;
        }
    }

    fn current_value(&self) -> MetricValue {
        MetricValue::Int(self.min)
    }
}

/// Maximum wall-clock response timestamp across the run.
pub struct MaxResponseTimestampMetric {
    spec: MetricSpec,
    max: i64,
}

impl MaxResponseTimestampMetric {
    /// New instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spec: MetricSpec::new(
                tags::MAX_RESPONSE_TIMESTAMP,
                "Maximum Response Timestamp",
                MetricUnit::Nanoseconds,
                MetricType::Aggregate,
            )
            .short_header("Max Resp")
            .flags(MetricFlags::HIDDEN)
            .requires(&[tags::REQUEST_LATENCY]),
            max: i64::MIN,
        }
    }
}

impl Default for MaxResponseTimestampMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregateMetric for MaxResponseTimestampMetric {
    fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    fn parse_record(
        &self,
        record: &ParsedResponseRecord,
        so_far: &MetricRecordMap,
    ) -> Result<MetricValue, MetricError> {
        // Wall clock for the response end is reconstructed from the
        // wall-clock start plus the monotonic request latency.
        let latency = so_far.scalar_or_raise(tags::REQUEST_LATENCY)?;
        Ok(MetricValue::Int(record.request.timestamp_ns as i64 + latency as i64))
    }

    fn aggregate_value(&mut self, value: &MetricValue) {
        if let Some(v) = value.as_scalar_i64()
            && v > self.max
        {
            self.max = v;
        }
    }

    fn current_value(&self) -> MetricValue {
        MetricValue::Int(self.max)
    }
}
