// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Canonical metric tag strings.
//!
//! Tags are the wire identity of a metric; display headers can change, tags
//! cannot.

/// Request latency (last response minus request start).
pub const REQUEST_LATENCY: &str = "request_latency";
/// Time to first token.
pub const TTFT: &str = "ttft";
/// Time to second token.
pub const TTST: &str = "ttst";
/// Inter-chunk latency list.
pub const INTER_CHUNK_LATENCY: &str = "inter_chunk_latency";
/// Inter-token latency.
pub const INTER_TOKEN_LATENCY: &str = "inter_token_latency";
/// Output token throughput per user.
pub const OUTPUT_TOKEN_THROUGHPUT_PER_USER: &str = "output_token_throughput_per_user";
/// Input sequence length in tokens.
pub const INPUT_SEQUENCE_LENGTH: &str = "input_sequence_length";
/// Output sequence length in tokens.
pub const OUTPUT_SEQUENCE_LENGTH: &str = "output_sequence_length";
/// Reasoning token count.
pub const REASONING_TOKEN_COUNT: &str = "reasoning_token_count";
/// Prefill throughput (input tokens over time to first token).
pub const INPUT_THROUGHPUT: &str = "input_throughput";
/// Credit drop latency.
pub const CREDIT_DROP_LATENCY: &str = "credit_drop_latency";
/// Valid request count.
pub const REQUEST_COUNT: &str = "request_count";
/// Error request count.
pub const ERROR_REQUEST_COUNT: &str = "error_request_count";
/// Minimum wall-clock request timestamp.
pub const MIN_REQUEST_TIMESTAMP: &str = "min_request_timestamp";
/// Maximum wall-clock response timestamp.
pub const MAX_RESPONSE_TIMESTAMP: &str = "max_response_timestamp";
/// Requests meeting every goodput SLO.
pub const GOOD_REQUEST_COUNT: &str = "good_request_count";
/// Benchmark duration.
pub const BENCHMARK_DURATION: &str = "benchmark_duration";
/// Request throughput.
pub const REQUEST_THROUGHPUT: &str = "request_throughput";
/// Total output tokens across the run.
pub const BENCHMARK_TOKEN_COUNT: &str = "benchmark_token_count";
/// Total reasoning tokens across the run.
pub const TOTAL_REASONING_TOKENS: &str = "total_reasoning_tokens";
/// Total input tokens across the run.
pub const TOTAL_INPUT_TOKENS: &str = "total_input_tokens";
/// Output token throughput.
pub const OUTPUT_TOKEN_THROUGHPUT: &str = "output_token_throughput";
/// Goodput (good requests per second).
pub const GOODPUT: &str = "goodput";
