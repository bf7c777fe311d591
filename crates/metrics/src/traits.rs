// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! The metric catalog model: specs, the four metric types, and the trait
//! seams each type implements.
//!
//! Registration is explicit: every concrete metric is constructed by a
//! factory listed at registry build time. No reflection, no global state.

use crate::error::MetricError;
use crate::flags::MetricFlags;
use crate::units::MetricUnit;
use crate::value::{MetricRecordMap, MetricResultsMap};
use aiperf_messages::{MetricValue, ParsedResponseRecord};
use std::fmt;

/// The four metric types, which determine pipeline stage and allowed
/// dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    /// One value (or list) per valid record, collected into an array.
    Record,
    /// Each record contributes a value folded into a running total.
    Aggregate,
    /// A derived sum over a RECORD metric's array.
    SumAggregate,
    /// Computed from other metrics' results at summarize time only.
    Derived,
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MetricType::Record => "record",
            MetricType::Aggregate => "aggregate",
            MetricType::SumAggregate => "sum_aggregate",
            MetricType::Derived => "derived",
        };
        write!(f, "{label}")
    }
}

/// Static description of one metric.
#[derive(Debug, Clone)]
pub struct MetricSpec {
    /// Unique tag identifying the metric.
    pub tag: String,
    /// Display header for reports.
    pub header: String,
    /// Shortened header for dashboards.
    pub short_header: Option<String>,
    /// Internal unit of the metric's values.
    pub unit: MetricUnit,
    /// Unit used for presentation when it differs from `unit`.
    pub display_unit: Option<MetricUnit>,
    /// Behavior flags.
    pub flags: MetricFlags,
    /// Which pipeline type this metric is.
    pub metric_type: MetricType,
    /// Tags this metric depends on; dependencies are computed first.
    pub required_metrics: Vec<String>,
    /// Display ordering; lower first, unordered metrics after ordered ones.
    pub display_order: Option<u32>,
}

impl MetricSpec {
    /// Minimal spec; refine with the builder methods.
    #[must_use]
    pub fn new(
        tag: impl Into<String>,
        header: impl Into<String>,
        unit: MetricUnit,
        metric_type: MetricType,
    ) -> Self {
        Self {
            tag: tag.into(),
            header: header.into(),
            short_header: None,
            unit,
            display_unit: None,
            flags: MetricFlags::empty(),
            metric_type,
            required_metrics: Vec::new(),
            display_order: None,
        }
    }

    /// Sets the short header.
    #[must_use]
    pub fn short_header(mut self, short: impl Into<String>) -> Self {
        self.short_header = Some(short.into());
        self
    }

    /// Sets the display unit.
    #[must_use]
    pub fn display_unit(mut self, unit: MetricUnit) -> Self {
        self.display_unit = Some(unit);
        self
    }

    /// Sets the behavior flags.
    #[must_use]
    pub fn flags(mut self, flags: MetricFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the required metric tags.
    #[must_use]
    pub fn requires(mut self, tags: &[&str]) -> Self {
        self.required_metrics = tags.iter().map(|t| (*t).to_string()).collect();
        self
    }

    /// Sets the display order.
    #[must_use]
    pub fn display_order(mut self, order: u32) -> Self {
        self.display_order = Some(order);
        self
    }

    /// The unit results are presented in.
    #[must_use]
    pub fn effective_display_unit(&self) -> MetricUnit {
        self.display_unit.unwrap_or(self.unit)
    }
}

/// A metric computed per record.
///
/// `parse_record` is only invoked for records of the matching validity class
/// (error records for `ERROR_ONLY` metrics, valid records otherwise) and
/// after every tag in `required_metrics` is present in `so_far`.
pub trait RecordMetric: Send {
    /// The metric's static description.
    fn spec(&self) -> &MetricSpec;

    /// Computes this record's value.
    fn parse_record(
        &self,
        record: &ParsedResponseRecord,
        so_far: &MetricRecordMap,
    ) -> Result<MetricValue, MetricError>;
}

/// A metric whose per-record values fold into a running total.
///
/// Stage 1 calls `parse_record` on per-processor instances; the singleton in
/// the results processor folds those values with `aggregate_value`.
pub trait AggregateMetric: Send {
    /// The metric's static description.
    fn spec(&self) -> &MetricSpec;

    /// Computes this record's contribution. Must not touch the running total.
    fn parse_record(
        &self,
        record: &ParsedResponseRecord,
        so_far: &MetricRecordMap,
    ) -> Result<MetricValue, MetricError>;

    /// Folds one contribution into the running total. Order-insensitive.
    fn aggregate_value(&mut self, value: &MetricValue);

    /// The current running total.
    fn current_value(&self) -> MetricValue;
}

/// A metric computed from other metrics' results at summarize time.
pub trait DerivedMetric: Send {
    /// The metric's static description.
    fn spec(&self) -> &MetricSpec;

    /// Computes the final value from accumulated results.
    fn derive_value(&self, results: &MetricResultsMap) -> Result<MetricValue, MetricError>;
}

/// A registered metric of any type.
pub enum MetricInstance {
    /// RECORD metric.
    Record(Box<dyn RecordMetric>),
    /// AGGREGATE metric.
    Aggregate(Box<dyn AggregateMetric>),
    /// DERIVED or SUM_AGGREGATE metric.
    Derived(Box<dyn DerivedMetric>),
}

impl MetricInstance {
    /// The metric's static description.
    #[must_use]
    pub fn spec(&self) -> &MetricSpec {
        match self {
            MetricInstance::Record(m) => m.spec(),
            MetricInstance::Aggregate(m) => m.spec(),
            MetricInstance::Derived(m) => m.spec(),
        }
    }
}

/// Factory producing fresh metric instances, listed at registry build time.
pub type MetricFactory = Box<dyn Fn() -> MetricInstance + Send + Sync>;

/// A derived sum over a RECORD metric's array (the SUM_AGGREGATE type).
pub struct DerivedSumMetric {
    spec: MetricSpec,
    source_tag: String,
}

impl DerivedSumMetric {
    /// Sum metric over `source`'s array, inheriting its unit and flags.
    #[must_use]
    pub fn over(
        tag: impl Into<String>,
        header: impl Into<String>,
        source: &MetricSpec,
        extra_flags: MetricFlags,
    ) -> Self {
        let spec = MetricSpec::new(tag, header, source.unit, MetricType::SumAggregate)
            .flags(source.flags | extra_flags)
            .requires(&[source.tag.as_str()]);
        Self { spec, source_tag: source.tag.clone() }
    }
}

impl DerivedMetric for DerivedSumMetric {
    fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    fn derive_value(&self, results: &MetricResultsMap) -> Result<MetricValue, MetricError> {
        let array = results.array_or_raise(&self.source_tag)?;
        Ok(MetricValue::Float(array.sum()))
    }
}
