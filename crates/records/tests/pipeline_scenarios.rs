// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end metric pipeline scenarios with literal inputs and expected
//! outputs, run through stage 1 and the results accumulator.

use aiperf_config::{
    EndpointConfig, EndpointType, InputConfig, LoadGenConfig, ModelSelectionStrategy,
    OutputConfig, UserConfig,
};
use aiperf_messages::{
    CreditPhase, MetricResult, ParsedResponse, ParsedResponseRecord, RequestErrorInfo,
    RequestRecord, ResponseData, TokenUsage,
};
use aiperf_metrics::{MetricRegistry, tags};
use aiperf_records::{ResultsAccumulator, StageOneProcessor};
use std::collections::BTreeMap;
use std::sync::Arc;

fn user_config(streaming: bool, goodput_slos: BTreeMap<String, f64>) -> UserConfig {
    UserConfig {
        endpoint: EndpointConfig {
            endpoint_type: EndpointType::Chat,
            base_url: "http://localhost:8000".to_string(),
            custom_endpoint: None,
            streaming,
            model_names: vec!["model-a".to_string()],
            model_selection_strategy: ModelSelectionStrategy::RoundRobin,
            endpoint_params: BTreeMap::new(),
            request_timeout_sec: 600.0,
        },
        loadgen: LoadGenConfig::default(),
        input: InputConfig::default(),
        output: OutputConfig::default(),
        goodput_slos,
    }
}

fn content(perf_ns: u64) -> ParsedResponse {
    ParsedResponse {
        perf_ns,
        data: Some(ResponseData { text: Some("tok".to_string()), reasoning: None }),
        usage: None,
    }
}

/// Record whose wall clock equals its monotonic start, which keeps the
/// duration math literal.
fn record(start_ns: u64, response_ns: &[u64]) -> ParsedResponseRecord {
    ParsedResponseRecord {
        request: RequestRecord {
            conversation_id: "conv".to_string(),
            turn_index: 0,
            model_name: "model-a".to_string(),
            worker_id: "w-0".to_string(),
            x_request_id: None,
            start_perf_ns: start_ns,
            timestamp_ns: start_ns,
            end_perf_ns: response_ns.last().copied().unwrap_or(start_ns),
            recv_start_perf_ns: None,
            credit_drop_latency: None,
            credit_phase: CreditPhase::Profiling,
            error: None,
        },
        responses: response_ns.iter().map(|ns| content(*ns)).collect(),
        input_token_count: Some(10),
        output_token_count: Some(3),
        reasoning_token_count: None,
    }
}

struct Pipeline {
    processor: StageOneProcessor,
    accumulator: ResultsAccumulator,
}

impl Pipeline {
    fn new(config: &UserConfig) -> Self {
        let registry =
            Arc::new(MetricRegistry::builtin(&config.goodput_slos).expect("registry"));
        let processor =
            StageOneProcessor::new(&registry, config, "rp-0").expect("stage one");
        let accumulator =
            ResultsAccumulator::new(Arc::clone(&registry), config).expect("accumulator");
        Self { processor, accumulator }
    }

    fn feed(&mut self, records: &[ParsedResponseRecord]) {
        for record in records {
            let metrics = self.processor.process_record(record);
            let entry = self.processor.to_entry(record, metrics);
            self.accumulator.process_entry(&entry);
        }
    }

    fn summarize(&self) -> Vec<MetricResult> {
        self.accumulator.summarize()
    }
}

fn row<'a>(results: &'a [MetricResult], tag: &str) -> &'a MetricResult {
    results
        .iter()
        .find(|r| r.tag == tag)
        .unwrap_or_else(|| panic!("metric `{tag}` missing from {results:?}"))
}

#[test]
fn three_records_request_latency_and_duration() {
    // Records (start, responses): (10, [15]), (20, [25]), (30, [40]).
    let config = user_config(false, BTreeMap::new());
    let mut pipeline = Pipeline::new(&config);
    pipeline.feed(&[record(10, &[15]), record(20, &[25]), record(30, &[40])]);
    let results = pipeline.summarize();

    let latency = row(&results, tags::REQUEST_LATENCY);
    assert_eq!(latency.count, 3);
    assert_eq!(latency.min, Some(5.0));
    assert_eq!(latency.max, Some(10.0));
    assert!((latency.avg - 20.0 / 3.0).abs() < 1e-9);

    assert_eq!(row(&results, tags::MIN_REQUEST_TIMESTAMP).avg, 10.0);
    assert_eq!(row(&results, tags::MAX_RESPONSE_TIMESTAMP).avg, 40.0);
    assert_eq!(row(&results, tags::BENCHMARK_DURATION).avg, 30.0);
}

#[test]
fn request_throughput_over_five_seconds() {
    // 100 requests spanning exactly 5e9 ns of wall clock.
    let config = user_config(false, BTreeMap::new());
    let mut pipeline = Pipeline::new(&config);
    let latency: u64 = 1_000_000;
    let records: Vec<ParsedResponseRecord> = (0..100)
        .map(|i| {
            // Last record's response lands exactly at 5e9.
            let start = if i == 99 { 5_000_000_000 - latency } else { i * 10_000_000 };
            record(start, &[start + latency])
        })
        .collect();
    pipeline.feed(&records);
    let results = pipeline.summarize();

    assert_eq!(row(&results, tags::REQUEST_COUNT).avg, 100.0);
    assert_eq!(row(&results, tags::BENCHMARK_DURATION).avg, 5e9);
    assert_eq!(row(&results, tags::REQUEST_THROUGHPUT).avg, 20.0);
}

#[test]
fn inter_token_latency_from_latency_ttft_and_tokens() {
    // start 1000, responses [1040, 1080, 1120], 3 tokens per response:
    // ttft = 40, latency = 120, output tokens = 9, itl = 80 / 8 = 10.
    let config = user_config(true, BTreeMap::new());
    let mut pipeline = Pipeline::new(&config);
    let mut rec = record(1_000, &[1_040, 1_080, 1_120]);
    rec.output_token_count = Some(9);
    pipeline.feed(&[rec]);
    let results = pipeline.summarize();

    assert_eq!(row(&results, tags::TTFT).avg, 40.0);
    assert_eq!(row(&results, tags::REQUEST_LATENCY).avg, 120.0);
    assert_eq!(row(&results, tags::OUTPUT_SEQUENCE_LENGTH).avg, 9.0);
    assert_eq!(row(&results, tags::INTER_TOKEN_LATENCY).avg, 10.0);
}

#[test]
fn goodput_counts_records_meeting_every_slo() {
    // SLO: request_latency <= 250ms. Latencies 100ms, 200ms, 450ms -> 2.
    let mut slos = BTreeMap::new();
    let _ = slos.insert(tags::REQUEST_LATENCY.to_string(), 250.0);
    let config = user_config(false, slos);
    let mut pipeline = Pipeline::new(&config);
    pipeline.feed(&[
        record(0, &[100_000_000]),
        record(0, &[200_000_000]),
        record(0, &[450_000_000]),
    ]);
    let results = pipeline.summarize();

    assert_eq!(row(&results, tags::GOOD_REQUEST_COUNT).avg, 2.0);
    // goodput = good / duration_sec = 2 / 0.45.
    assert!((row(&results, tags::GOODPUT).avg - 2.0 / 0.45).abs() < 1e-9);
}

#[test]
fn loosening_an_slo_never_decreases_the_good_count() {
    let latencies_ms = [100u64, 200, 300, 400, 450];
    let mut counts = Vec::new();
    for threshold_ms in [150.0, 250.0, 350.0, 500.0] {
        let mut slos = BTreeMap::new();
        let _ = slos.insert(tags::REQUEST_LATENCY.to_string(), threshold_ms);
        let config = user_config(false, slos);
        let mut pipeline = Pipeline::new(&config);
        let records: Vec<ParsedResponseRecord> = latencies_ms
            .iter()
            .map(|ms| record(0, &[ms * 1_000_000]))
            .collect();
        pipeline.feed(&records);
        let results = pipeline.summarize();
        counts.push(row(&results, tags::GOOD_REQUEST_COUNT).avg);
    }
    assert!(counts.windows(2).all(|w| w[0] <= w[1]), "goodput not monotone: {counts:?}");
}

#[test]
fn streaming_only_metrics_are_absent_for_non_streaming_endpoints() {
    let config = user_config(false, BTreeMap::new());
    let mut pipeline = Pipeline::new(&config);
    pipeline.feed(&[record(10, &[15, 20, 25])]);
    let results = pipeline.summarize();

    assert!(results.iter().all(|r| r.tag != tags::TTFT));
    assert!(results.iter().all(|r| r.tag != tags::INTER_TOKEN_LATENCY));
    assert!(results.iter().all(|r| r.tag != tags::INTER_CHUNK_LATENCY));
    assert!(results.iter().any(|r| r.tag == tags::REQUEST_LATENCY));
}

#[test]
fn inter_chunk_latency_flattens_lists_and_skips_bad_records() {
    let config = user_config(true, BTreeMap::new());
    let mut pipeline = Pipeline::new(&config);
    // First record: chunk gaps [40, 40]. Second record: non-positive gap,
    // skipped for ICL but still counted elsewhere.
    pipeline.feed(&[record(1_000, &[1_040, 1_080]), record(2_000, &[2_050, 2_050])]);
    let results = pipeline.summarize();

    // The first record contributes both of its gaps; the second none.
    let icl = row(&results, tags::INTER_CHUNK_LATENCY);
    assert_eq!(icl.count, 2);
    assert_eq!(icl.avg, 40.0);
    assert_eq!(row(&results, tags::REQUEST_COUNT).avg, 2.0);
}

#[test]
fn ttft_rejects_first_response_before_request_start() {
    let config = user_config(true, BTreeMap::new());
    let mut pipeline = Pipeline::new(&config);
    // First response timestamp precedes the request start.
    pipeline.feed(&[record(1_000, &[900, 1_100])]);
    let results = pipeline.summarize();

    assert!(results.iter().all(|r| r.tag != tags::TTFT), "ttft should be skipped");
    assert!(results.iter().any(|r| r.tag == tags::REQUEST_COUNT));
}

#[test]
fn error_records_only_feed_error_metrics() {
    let config = user_config(false, BTreeMap::new());
    let mut pipeline = Pipeline::new(&config);
    let mut errored = record(10, &[15]);
    errored.request.error = Some(RequestErrorInfo {
        error_type: "http".to_string(),
        code: Some(500),
        message: "boom".to_string(),
    });
    pipeline.feed(&[errored, record(20, &[25])]);
    let results = pipeline.summarize();

    assert_eq!(row(&results, tags::ERROR_REQUEST_COUNT).avg, 1.0);
    assert_eq!(row(&results, tags::REQUEST_COUNT).avg, 1.0);
    let latency = row(&results, tags::REQUEST_LATENCY);
    assert_eq!(latency.count, 1, "error record must not contribute latency");
}

#[test]
fn summarize_is_idempotent() {
    let config = user_config(true, BTreeMap::new());
    let mut pipeline = Pipeline::new(&config);
    let mut rec = record(1_000, &[1_040, 1_080, 1_120]);
    rec.responses.push(ParsedResponse {
        perf_ns: 1_130,
        data: None,
        usage: Some(TokenUsage {
            input_tokens: Some(12),
            output_tokens: Some(9),
            reasoning_tokens: None,
        }),
    });
    pipeline.feed(&[rec, record(2_000, &[2_040, 2_100])]);

    let first = pipeline.summarize();
    let second = pipeline.summarize();
    assert_eq!(first, second);
}

#[test]
fn dependency_order_holds_during_stage_one() {
    // output_token_throughput_per_user depends on inter_token_latency which
    // depends on request_latency, ttft, and output_sequence_length; all must
    // be present for the chain to produce values.
    let config = user_config(true, BTreeMap::new());
    let mut pipeline = Pipeline::new(&config);
    let mut rec = record(1_000, &[1_040, 1_080, 1_120]);
    rec.output_token_count = Some(9);
    pipeline.feed(&[rec]);
    let results = pipeline.summarize();

    // itl = 10ns -> 1e9 / 10 tokens/sec/user.
    let per_user = row(&results, tags::OUTPUT_TOKEN_THROUGHPUT_PER_USER);
    assert!((per_user.avg - 1e8).abs() < 1.0);
}
