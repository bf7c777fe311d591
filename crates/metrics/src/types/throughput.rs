// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! DERIVED duration and throughput metrics.

use crate::error::MetricError;
use crate::flags::MetricFlags;
use crate::tags;
use crate::traits::{DerivedMetric, MetricSpec, MetricType};
use crate::units::MetricUnit;
use crate::value::MetricResultsMap;
use aiperf_messages::MetricValue;

/// Benchmark duration: max response timestamp minus min request timestamp.
pub struct BenchmarkDurationMetric {
    spec: MetricSpec,
}

impl BenchmarkDurationMetric {
    /// New instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spec: MetricSpec::new(
                tags::BENCHMARK_DURATION,
                "Benchmark Duration",
                MetricUnit::Nanoseconds,
                MetricType::Derived,
            )
            .display_unit(MetricUnit::Seconds)
            .flags(MetricFlags::HIDDEN)
            .requires(&[tags::MIN_REQUEST_TIMESTAMP, tags::MAX_RESPONSE_TIMESTAMP]),
        }
    }
}

impl Default for BenchmarkDurationMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl DerivedMetric for BenchmarkDurationMetric {
    fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    fn derive_value(&self, results: &MetricResultsMap) -> Result<MetricValue, MetricError> {
        let min_request = results.scalar_i64_or_raise(tags::MIN_REQUEST_TIMESTAMP)?;
        let max_response = results.scalar_i64_or_raise(tags::MAX_RESPONSE_TIMESTAMP)?;
        if min_request >= max_response {
            return Err(MetricError::invalid(
                "min request timestamp must precede max response timestamp",
            ));
        }
        Ok(MetricValue::Int(max_response - min_request))
    }
}

/// Request throughput: valid requests per second of benchmark duration.
pub struct RequestThroughputMetric {
    spec: MetricSpec,
}

impl RequestThroughputMetric {
    /// New instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spec: MetricSpec::new(
                tags::REQUEST_THROUGHPUT,
                "Request Throughput",
                MetricUnit::RequestsPerSecond,
                MetricType::Derived,
            )
            .display_order(900)
            .flags(MetricFlags::LARGER_IS_BETTER)
            .requires(&[tags::REQUEST_COUNT, tags::BENCHMARK_DURATION]),
        }
    }
}

impl Default for RequestThroughputMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl DerivedMetric for RequestThroughputMetric {
    fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    fn derive_value(&self, results: &MetricResultsMap) -> Result<MetricValue, MetricError> {
        let requests = results.scalar_or_raise(tags::REQUEST_COUNT)?;
        let duration_sec = results.converted_or_raise(
            tags::BENCHMARK_DURATION,
            MetricUnit::Nanoseconds,
            MetricUnit::Seconds,
        )?;
        if duration_sec <= 0.0 {
            return Err(MetricError::invalid("benchmark duration must be positive"));
        }
        Ok(MetricValue::Float(requests / duration_sec))
    }
}

/// Output token throughput: total output tokens per second of duration.
pub struct OutputTokenThroughputMetric {
    spec: MetricSpec,
}

impl OutputTokenThroughputMetric {
    /// New instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spec: MetricSpec::new(
                tags::OUTPUT_TOKEN_THROUGHPUT,
                "Output Token Throughput",
                MetricUnit::TokensPerSecond,
                MetricType::Derived,
            )
            .short_header("Output TPS")
            .display_order(800)
            .flags(MetricFlags::PRODUCES_TOKENS_ONLY | MetricFlags::LARGER_IS_BETTER)
            .requires(&[tags::BENCHMARK_TOKEN_COUNT, tags::BENCHMARK_DURATION]),
        }
    }
}

impl Default for OutputTokenThroughputMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl DerivedMetric for OutputTokenThroughputMetric {
    fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    fn derive_value(&self, results: &MetricResultsMap) -> Result<MetricValue, MetricError> {
        let tokens = results.scalar_or_raise(tags::BENCHMARK_TOKEN_COUNT)?;
        let duration_sec = results.converted_or_raise(
            tags::BENCHMARK_DURATION,
            MetricUnit::Nanoseconds,
            MetricUnit::Seconds,
        )?;
        if duration_sec <= 0.0 {
            return Err(MetricError::invalid("benchmark duration must be positive"));
        }
        Ok(MetricValue::Float(tokens / duration_sec))
    }
}
