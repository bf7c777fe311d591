// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Token-accounting RECORD metrics.

use crate::error::MetricError;
use crate::flags::MetricFlags;
use crate::tags;
use crate::traits::{MetricSpec, MetricType, RecordMetric};
use crate::units::MetricUnit;
use crate::value::MetricRecordMap;
use aiperf_messages::{MetricValue, ParsedResponseRecord};

/// Input sequence length: prompt tokens per request.
pub struct InputSequenceLengthMetric {
    spec: MetricSpec,
}

impl InputSequenceLengthMetric {
    /// New instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spec: MetricSpec::new(
                tags::INPUT_SEQUENCE_LENGTH,
                "Input Sequence Length",
                MetricUnit::Tokens,
                MetricType::Record,
            )
            .short_header("ISL")
            .display_order(600)
            .flags(MetricFlags::TOKENIZES_INPUT_ONLY),
        }
    }
}

impl Default for InputSequenceLengthMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordMetric for InputSequenceLengthMetric {
    fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    fn parse_record(
        &self,
        record: &ParsedResponseRecord,
        _so_far: &MetricRecordMap,
    ) -> Result<MetricValue, MetricError> {
        record
            .input_token_count
            .map(|count| MetricValue::Int(count as i64))
            .ok_or_else(|| MetricError::no_value("record has no input token count"))
    }
}

/// Output sequence length: completion tokens per request.
pub struct OutputSequenceLengthMetric {
    spec: MetricSpec,
}

impl OutputSequenceLengthMetric {
    /// New instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spec: MetricSpec::new(
                tags::OUTPUT_SEQUENCE_LENGTH,
                "Output Sequence Length",
                MetricUnit::Tokens,
                MetricType::Record,
            )
            .short_header("OSL")
            .display_order(700)
            .flags(MetricFlags::PRODUCES_TOKENS_ONLY),
        }
    }
}

impl Default for OutputSequenceLengthMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordMetric for OutputSequenceLengthMetric {
    fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    fn parse_record(
        &self,
        record: &ParsedResponseRecord,
        _so_far: &MetricRecordMap,
    ) -> Result<MetricValue, MetricError> {
        record
            .output_token_count
            .map(|count| MetricValue::Int(count as i64))
            .ok_or_else(|| MetricError::no_value("record has no output token count"))
    }
}

/// Reasoning token count per request, for reasoning-capable models.
pub struct ReasoningTokenCountMetric {
    spec: MetricSpec,
}

impl ReasoningTokenCountMetric {
    /// New instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spec: MetricSpec::new(
                tags::REASONING_TOKEN_COUNT,
                "Reasoning Token Count",
                MetricUnit::Tokens,
                MetricType::Record,
            )
            .flags(MetricFlags::PRODUCES_TOKENS_ONLY | MetricFlags::SUPPORTS_REASONING),
        }
    }
}

impl Default for ReasoningTokenCountMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordMetric for ReasoningTokenCountMetric {
    fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    fn parse_record(
        &self,
        record: &ParsedResponseRecord,
        _so_far: &MetricRecordMap,
    ) -> Result<MetricValue, MetricError> {
        record
            .reasoning_token_count
            .map(|count| MetricValue::Int(count as i64))
            .ok_or_else(|| MetricError::no_value("record has no reasoning token count"))
    }
}

/// Prefill throughput: input tokens over time to first token.
pub struct InputThroughputMetric {
    spec: MetricSpec,
}

impl InputThroughputMetric {
    /// New instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spec: MetricSpec::new(
                tags::INPUT_THROUGHPUT,
                "Input Throughput",
                MetricUnit::TokensPerSecond,
                MetricType::Record,
            )
            .flags(
                MetricFlags::STREAMING_TOKENS_ONLY
                    | MetricFlags::EXPERIMENTAL
                    | MetricFlags::LARGER_IS_BETTER,
            )
            .requires(&[tags::INPUT_SEQUENCE_LENGTH, tags::TTFT]),
        }
    }
}

impl Default for InputThroughputMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordMetric for InputThroughputMetric {
    fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    fn parse_record(
        &self,
        _record: &ParsedResponseRecord,
        so_far: &MetricRecordMap,
    ) -> Result<MetricValue, MetricError> {
        let isl = so_far.scalar_or_raise(tags::INPUT_SEQUENCE_LENGTH)?;
        let ttft_sec = so_far.converted_or_raise(
            tags::TTFT,
            MetricUnit::Nanoseconds,
            MetricUnit::Seconds,
        )?;
        if ttft_sec <= 0.0 {
            return Err(MetricError::invalid("time to first token must be positive"));
        }
        Ok(MetricValue::Float(isl / ttft_sec))
    }
}

/// Credit drop latency: delay between credit issue and worker pickup.
pub struct CreditDropLatencyMetric {
    spec: MetricSpec,
}

impl CreditDropLatencyMetric {
    /// New instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spec: MetricSpec::new(
                tags::CREDIT_DROP_LATENCY,
                "Credit Drop Latency",
                MetricUnit::Nanoseconds,
                MetricType::Record,
            )
            .display_unit(MetricUnit::Milliseconds)
            .flags(MetricFlags::INTERNAL | MetricFlags::NO_CONSOLE),
        }
    }
}

impl Default for CreditDropLatencyMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordMetric for CreditDropLatencyMetric {
    fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    fn parse_record(
        &self,
        record: &ParsedResponseRecord,
        _so_far: &MetricRecordMap,
    ) -> Result<MetricValue, MetricError> {
        record
            .request
            .credit_drop_latency
            .map(|latency| MetricValue::Int(latency as i64))
            .ok_or_else(|| MetricError::no_value("record has no credit drop latency"))
    }
}
