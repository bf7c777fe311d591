// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! The AIPerf metric catalog and computation model.
//!
//! Metrics come in four types forming a DAG: RECORD values are computed per
//! record and collected into arrays, AGGREGATE values fold per-record
//! contributions into running totals, SUM_AGGREGATE sums a RECORD array, and
//! DERIVED values are computed from other results at summarize time. The
//! registry validates the DAG once at startup; processing then follows the
//! topological order it produces.

pub mod array;
pub mod error;
pub mod flags;
pub mod registry;
pub mod tags;
pub mod traits;
pub mod types;
pub mod units;
pub mod value;

pub use array::MetricArray;
pub use error::{MetricError, MetricTypeError};
pub use flags::MetricFlags;
pub use registry::MetricRegistry;
pub use traits::{
    AggregateMetric, DerivedMetric, DerivedSumMetric, MetricFactory, MetricInstance, MetricSpec,
    MetricType, RecordMetric,
};
pub use units::MetricUnit;
pub use value::{MetricRecordMap, MetricResultsMap, ResultsValue};
