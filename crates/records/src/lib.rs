// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! The three-stage metrics pipeline.
//!
//! Stage 1 ([`StageOneProcessor`]) runs distributed across record
//! processors: each raw record is parsed into per-metric values in
//! dependency order. Stage 2 ([`ResultsAccumulator`]) is the singleton
//! accumulator: RECORD values grow arrays, AGGREGATE values fold into
//! running totals. Stage 3 is summarize: DERIVED metrics are computed over
//! a snapshot and the final [`aiperf_messages::MetricResult`] rows emerge.

pub mod error;
pub mod export;
pub mod filters;
pub mod processor;
pub mod record_service;
pub mod results;
pub mod results_service;
pub mod timeslice;

pub use error::Error;
pub use export::{RecordsJsonlWriter, SummaryWriter};
pub use processor::StageOneProcessor;
pub use record_service::run_record_processor;
pub use results::ResultsAccumulator;
pub use results_service::run_results_processor;
pub use timeslice::TimesliceProcessor;
