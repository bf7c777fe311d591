// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Request records produced by workers and the metric shapes derived from
//! them as they move through the processing pipeline.

use crate::credit::CreditPhase;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Classified failure attached to a request record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestErrorInfo {
    /// Failure class: `cancelled`, `http`, `transport`, `timeout`, `worker`.
    #[serde(rename = "type")]
    pub error_type: String,
    /// HTTP status code when the failure came from the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    /// Human-readable failure description.
    pub message: String,
}

impl RequestErrorInfo {
    /// An error record for a request cancelled by the cancellation strategy.
    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            error_type: "cancelled".to_string(),
            code: None,
            message: "request cancelled by cancellation strategy".to_string(),
        }
    }
}

/// Timing and identity for one HTTP exchange, captured by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Conversation this request belongs to.
    pub conversation_id: String,
    /// Index of the executed turn within the conversation.
    pub turn_index: u32,
    /// Model the request targeted.
    pub model_name: String,
    /// Id of the worker that performed the call.
    pub worker_id: String,
    /// `X-Request-ID` header value, when one was attached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_request_id: Option<String>,
    /// Monotonic timestamp taken immediately before the HTTP call.
    pub start_perf_ns: u64,
    /// Wall-clock timestamp taken immediately before the HTTP call.
    pub timestamp_ns: u64,
    /// Monotonic timestamp taken when the exchange finished.
    pub end_perf_ns: u64,
    /// Monotonic timestamp when response headers arrived, for streaming calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recv_start_perf_ns: Option<u64>,
    /// Delay between the credit drop and the worker picking it up, in ns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit_drop_latency: Option<u64>,
    /// Phase the authorizing credit belonged to.
    pub credit_phase: CreditPhase,
    /// Failure details; `Some` makes this an error record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RequestErrorInfo>,
}

/// Parsed content of a single response chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseData {
    /// Completion text carried by the chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Reasoning text carried by the chunk, for reasoning-capable models.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Token accounting reported by the endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt token count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    /// Completion token count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    /// Reasoning token count, when reported separately.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
}

/// One parsed response chunk with its arrival timestamp.
///
/// Usage-only chunks (`data == None`) are retained for token accounting but
/// do not count as content responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedResponse {
    /// Monotonic arrival timestamp of the chunk.
    pub perf_ns: u64,
    /// Parsed content, absent for usage-only chunks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
    /// Usage block carried by the chunk, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl ParsedResponse {
    /// True when the chunk carried completion or reasoning content.
    #[must_use]
    pub fn is_content(&self) -> bool {
        self.data.is_some()
    }
}

/// The worker's distilled view of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedResponseRecord {
    /// Request identity and timing.
    pub request: RequestRecord,
    /// Parsed response chunks in arrival order.
    pub responses: Vec<ParsedResponse>,
    /// Prompt tokens, from usage or tokenizer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_token_count: Option<u64>,
    /// Completion tokens, from usage or tokenizer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_token_count: Option<u64>,
    /// Reasoning tokens, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_token_count: Option<u64>,
}

impl ParsedResponseRecord {
    /// A record is valid when the exchange succeeded and produced at least
    /// one content response. Only error-flagged metrics apply otherwise.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.request.error.is_none() && self.responses.iter().any(ParsedResponse::is_content)
    }

    /// Content-carrying responses in arrival order.
    pub fn content_responses(&self) -> impl Iterator<Item = &ParsedResponse> {
        self.responses.iter().filter(|r| r.is_content())
    }
}

/// A single metric value as it travels between pipeline stages.
///
/// Integer and float domains are kept distinct so nanosecond timestamps
/// survive the wire without precision loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// Scalar integer value (counts, nanosecond timestamps).
    Int(i64),
    /// Scalar floating-point value (rates, ratios).
    Float(f64),
    /// Per-record list of integer values (e.g. inter-chunk latencies).
    IntList(Vec<i64>),
    /// Per-record list of floating-point values.
    FloatList(Vec<f64>),
}

impl MetricValue {
    /// Scalar view of the value, if it is not a list.
    #[must_use]
    pub fn as_scalar_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Int(v) => Some(*v as f64),
            MetricValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Scalar integer view of the value, if it is an integer scalar.
    #[must_use]
    pub fn as_scalar_i64(&self) -> Option<i64> {
        match self {
            MetricValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// All contained values flattened to `f64`, one element for scalars.
    #[must_use]
    pub fn flatten_f64(&self) -> Vec<f64> {
        match self {
            MetricValue::Int(v) => vec![*v as f64],
            MetricValue::Float(v) => vec![*v],
            MetricValue::IntList(vs) => vs.iter().map(|v| *v as f64).collect(),
            MetricValue::FloatList(vs) => vs.clone(),
        }
    }

    /// True for list-valued entries.
    #[must_use]
    pub fn is_list(&self) -> bool {
        matches!(self, MetricValue::IntList(_) | MetricValue::FloatList(_))
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        MetricValue::Int(v as i64)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<Vec<i64>> for MetricValue {
    fn from(v: Vec<i64>) -> Self {
        MetricValue::IntList(v)
    }
}

impl From<Vec<f64>> for MetricValue {
    fn from(v: Vec<f64>) -> Self {
        MetricValue::FloatList(v)
    }
}

/// Identity of the record a metric batch entry was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecordMetadata {
    /// `X-Request-ID` of the originating request, when attached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_request_id: Option<String>,
    /// Conversation the request belonged to.
    pub conversation_id: String,
    /// Turn index the request executed.
    pub turn_index: u32,
    /// Wall-clock start of the request in nanoseconds.
    pub request_start_ns: u64,
    /// Worker that performed the request.
    pub worker_id: String,
    /// Record processor that computed the metrics.
    pub record_processor_id: String,
    /// Phase the request ran in.
    pub benchmark_phase: CreditPhase,
}

/// One record's worth of computed metric values, as shipped from a record
/// processor to the results processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecordEntry {
    /// Identity of the originating record.
    pub metadata: MetricRecordMetadata,
    /// Computed metric values keyed by metric tag.
    pub metrics: BTreeMap<String, MetricValue>,
    /// Error block, present for error records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RequestErrorInfo>,
}

/// Summary row for a single metric in the final report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    /// Unique metric tag.
    pub tag: String,
    /// Display header.
    pub header: String,
    /// Unit of the reported values.
    pub unit: String,
    /// Mean over the collected values, or the value itself for scalars.
    pub avg: f64,
    /// Minimum collected value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Maximum collected value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Population standard deviation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std: Option<f64>,
    /// 1st percentile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p1: Option<f64>,
    /// 5th percentile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p5: Option<f64>,
    /// 25th percentile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p25: Option<f64>,
    /// 50th percentile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p50: Option<f64>,
    /// 75th percentile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p75: Option<f64>,
    /// 90th percentile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p90: Option<f64>,
    /// 95th percentile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p95: Option<f64>,
    /// 99th percentile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p99: Option<f64>,
    /// Number of values the row summarizes.
    pub count: u64,
}
