// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the metrics crate.
//!
//! Per-record failures (`MetricError`) are expected and recoverable: the
//! offending metric is skipped for that record and everything else proceeds.
//! Registry failures (`MetricTypeError`) indicate a misconfigured catalog
//! and are fatal at startup.

use thiserror::Error;

/// A metric could not be computed for one record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetricError {
    /// Expected absence: the record simply does not carry what this metric
    /// needs. Logged at debug level.
    #[error("no metric value: {details}")]
    NoValue {
        /// Why the value is unavailable.
        details: String,
    },

    /// Unexpected per-record failure. Logged at warning level; the metric is
    /// omitted from the record and other metrics proceed.
    #[error("invalid metric input: {details}")]
    Invalid {
        /// What was wrong with the inputs.
        details: String,
    },
}

impl MetricError {
    /// Expected-absence error.
    #[must_use]
    pub fn no_value(details: impl Into<String>) -> Self {
        MetricError::NoValue { details: details.into() }
    }

    /// Unexpected-input error.
    #[must_use]
    pub fn invalid(details: impl Into<String>) -> Self {
        MetricError::Invalid { details: details.into() }
    }

    /// True for the expected-absence case.
    #[must_use]
    pub fn is_no_value(&self) -> bool {
        matches!(self, MetricError::NoValue { .. })
    }
}

/// Registry-wide misconfiguration. Fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetricTypeError {
    /// Two metrics registered the same tag.
    #[error("metric tag `{tag}` already registered")]
    DuplicateTag {
        /// The duplicated tag.
        tag: String,
    },

    /// A metric registered with an empty tag.
    #[error("metric registered with an empty tag")]
    EmptyTag,

    /// A metric depends on a tag that is not registered.
    #[error("metric `{tag}` depends on `{dependency}`, which is not registered")]
    UnknownDependency {
        /// The dependent metric.
        tag: String,
        /// The missing dependency tag.
        dependency: String,
    },

    /// A metric depends on a tag its type is not allowed to depend on.
    #[error(
        "metric `{tag}` ({metric_type}) may not depend on `{dependency}` ({dependency_type})"
    )]
    DisallowedDependency {
        /// The dependent metric.
        tag: String,
        /// The dependent metric's type.
        metric_type: String,
        /// The dependency tag.
        dependency: String,
        /// The dependency's type.
        dependency_type: String,
    },

    /// The dependency graph contains a cycle.
    #[error("circular dependency detected among metrics: {tags:?}")]
    Cycle {
        /// Tags that could not be topologically ordered.
        tags: Vec<String>,
    },

    /// A lookup referenced a tag that is not registered.
    #[error("metric tag `{tag}` not found")]
    UnknownTag {
        /// The unknown tag.
        tag: String,
    },

    /// A goodput SLO referenced an unknown metric tag.
    #[error("unknown metric tag in goodput SLOs: `{tag}`")]
    UnknownGoodputTag {
        /// The unknown tag.
        tag: String,
    },

    /// A unit conversion between incompatible units was requested.
    #[error("cannot convert {from} to {to}")]
    UnitConversion {
        /// The source unit.
        from: String,
        /// The target unit.
        to: String,
    },
}
