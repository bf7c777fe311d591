// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Latency-family RECORD metrics.

use crate::error::MetricError;
use crate::flags::MetricFlags;
use crate::tags;
use crate::traits::{MetricSpec, MetricType, RecordMetric};
use crate::units::MetricUnit;
use crate::value::MetricRecordMap;
use aiperf_messages::{MetricValue, ParsedResponseRecord};

/// Request latency: final response timestamp minus request start.
pub struct RequestLatencyMetric {
    spec: MetricSpec,
}

impl RequestLatencyMetric {
    /// New instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spec: MetricSpec::new(
                tags::REQUEST_LATENCY,
                "Request Latency",
                MetricUnit::Nanoseconds,
                MetricType::Record,
            )
            .display_unit(MetricUnit::Milliseconds)
            .display_order(300),
        }
    }
}

impl Default for RequestLatencyMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordMetric for RequestLatencyMetric {
    fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    fn parse_record(
        &self,
        record: &ParsedResponseRecord,
        _so_far: &MetricRecordMap,
    ) -> Result<MetricValue, MetricError> {
        let final_response = record
            .responses
            .last()
            .ok_or_else(|| MetricError::no_value("record has no responses"))?;
        Ok(MetricValue::Int(
            final_response.perf_ns as i64 - record.request.start_perf_ns as i64,
        ))
    }
}

/// Time to first token: first content response minus request start.
pub struct TtftMetric {
    spec: MetricSpec,
}

impl TtftMetric {
    /// New instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spec: MetricSpec::new(
                tags::TTFT,
                "Time to First Token",
                MetricUnit::Nanoseconds,
                MetricType::Record,
            )
            .short_header("TTFT")
            .display_unit(MetricUnit::Milliseconds)
            .display_order(100)
            .flags(MetricFlags::STREAMING_TOKENS_ONLY),
        }
    }
}

impl Default for TtftMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordMetric for TtftMetric {
    fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    fn parse_record(
        &self,
        record: &ParsedResponseRecord,
        _so_far: &MetricRecordMap,
    ) -> Result<MetricValue, MetricError> {
        let first = record
            .content_responses()
            .next()
            .ok_or_else(|| MetricError::no_value("record has no content responses"))?;
        if first.perf_ns < record.request.start_perf_ns {
            return Err(MetricError::invalid(
                "first response timestamp precedes request start",
            ));
        }
        Ok(MetricValue::Int((first.perf_ns - record.request.start_perf_ns) as i64))
    }
}

/// Time to second token: second content response minus the first.
pub struct TtstMetric {
    spec: MetricSpec,
}

impl TtstMetric {
    /// New instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spec: MetricSpec::new(
                tags::TTST,
                "Time to Second Token",
                MetricUnit::Nanoseconds,
                MetricType::Record,
            )
            .short_header("TTST")
            .display_unit(MetricUnit::Milliseconds)
            .display_order(200)
            .flags(MetricFlags::STREAMING_TOKENS_ONLY | MetricFlags::EXPERIMENTAL),
        }
    }
}

impl Default for TtstMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordMetric for TtstMetric {
    fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    fn parse_record(
        &self,
        record: &ParsedResponseRecord,
        _so_far: &MetricRecordMap,
    ) -> Result<MetricValue, MetricError> {
        let mut content = record.content_responses();
        let first = content
            .next()
            .ok_or_else(|| MetricError::no_value("record has no content responses"))?;
        let second = content
            .next()
            .ok_or_else(|| MetricError::no_value("record has fewer than two content responses"))?;
        if second.perf_ns < first.perf_ns {
            return Err(MetricError::invalid("second response precedes the first"));
        }
        Ok(MetricValue::Int((second.perf_ns - first.perf_ns) as i64))
    }
}

/// Inter-chunk latency: deltas between consecutive response chunks.
///
/// List-valued: every request with `n >= 2` chunks contributes `n - 1`
/// values to the shared array.
pub struct InterChunkLatencyMetric {
    spec: MetricSpec,
}

impl InterChunkLatencyMetric {
    /// New instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spec: MetricSpec::new(
                tags::INTER_CHUNK_LATENCY,
                "Inter Chunk Latency",
                MetricUnit::Nanoseconds,
                MetricType::Record,
            )
            .short_header("ICL")
            .display_unit(MetricUnit::Milliseconds)
            .flags(MetricFlags::STREAMING_TOKENS_ONLY | MetricFlags::EXPERIMENTAL),
        }
    }
}

impl Default for InterChunkLatencyMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordMetric for InterChunkLatencyMetric {
    fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    fn parse_record(
        &self,
        record: &ParsedResponseRecord,
        _so_far: &MetricRecordMap,
    ) -> Result<MetricValue, MetricError> {
        if record.responses.len() < 2 {
            return Err(MetricError::no_value(
                "record needs at least two responses for inter-chunk latency",
            ));
        }
        let mut latencies = Vec::with_capacity(record.responses.len() - 1);
        for pair in record.responses.windows(2) {
            let delta = pair[1].perf_ns as i64 - pair[0].perf_ns as i64;
            if delta <= 0 {
                return Err(MetricError::invalid("non-positive inter-chunk latency"));
            }
            latencies.push(delta);
        }
        Ok(MetricValue::IntList(latencies))
    }
}

/// Inter-token latency: `(request_latency - ttft) / (output_tokens - 1)`.
pub struct InterTokenLatencyMetric {
    spec: MetricSpec,
}

impl InterTokenLatencyMetric {
    /// New instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spec: MetricSpec::new(
                tags::INTER_TOKEN_LATENCY,
                "Inter Token Latency",
                MetricUnit::Nanoseconds,
                MetricType::Record,
            )
            .short_header("ITL")
            .display_unit(MetricUnit::Milliseconds)
            .display_order(400)
            .flags(MetricFlags::STREAMING_TOKENS_ONLY)
            .requires(&[tags::REQUEST_LATENCY, tags::TTFT, tags::OUTPUT_SEQUENCE_LENGTH]),
        }
    }
}

impl Default for InterTokenLatencyMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordMetric for InterTokenLatencyMetric {
    fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    fn parse_record(
        &self,
        _record: &ParsedResponseRecord,
        so_far: &MetricRecordMap,
    ) -> Result<MetricValue, MetricError> {
        let latency = so_far.scalar_or_raise(tags::REQUEST_LATENCY)?;
        let ttft = so_far.scalar_or_raise(tags::TTFT)?;
        let output_tokens = so_far.scalar_or_raise(tags::OUTPUT_SEQUENCE_LENGTH)?;
        if output_tokens <= 1.0 {
            return Err(MetricError::no_value(
                "inter-token latency needs more than one output token",
            ));
        }
        Ok(MetricValue::Float((latency - ttft) / (output_tokens - 1.0)))
    }
}

/// Output token throughput per user: the inverse of inter-token latency.
pub struct OutputTokenThroughputPerUserMetric {
    spec: MetricSpec,
}

impl OutputTokenThroughputPerUserMetric {
    /// New instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spec: MetricSpec::new(
                tags::OUTPUT_TOKEN_THROUGHPUT_PER_USER,
                "Output Token Throughput Per User",
                MetricUnit::TokensPerSecondPerUser,
                MetricType::Record,
            )
            .display_order(500)
            .flags(MetricFlags::STREAMING_TOKENS_ONLY | MetricFlags::LARGER_IS_BETTER)
            .requires(&[tags::INTER_TOKEN_LATENCY]),
        }
    }
}

impl Default for OutputTokenThroughputPerUserMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordMetric for OutputTokenThroughputPerUserMetric {
    fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    fn parse_record(
        &self,
        _record: &ParsedResponseRecord,
        so_far: &MetricRecordMap,
    ) -> Result<MetricValue, MetricError> {
        let itl_sec = so_far.converted_or_raise(
            tags::INTER_TOKEN_LATENCY,
            MetricUnit::Nanoseconds,
            MetricUnit::Seconds,
        )?;
        if itl_sec <= 0.0 {
            return Err(MetricError::invalid("inter-token latency must be positive"));
        }
        Ok(MetricValue::Float(1.0 / itl_sec))
    }
}
