// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Tag-keyed value maps used between pipeline stages.
//!
//! `MetricRecordMap` holds one record's computed values (RECORD values plus
//! AGGREGATE contributions). `MetricResultsMap` holds run-wide state in the
//! results processor: arrays for RECORD metrics, scalars for everything
//! else. Access goes through narrow raising accessors; no raw casting.

use crate::array::MetricArray;
use crate::error::MetricError;
use crate::units::MetricUnit;
use aiperf_messages::MetricValue;
use std::collections::BTreeMap;

/// One record's computed metric values, keyed by tag.
#[derive(Debug, Default)]
pub struct MetricRecordMap {
    values: BTreeMap<String, MetricValue>,
}

impl MetricRecordMap {
    /// Empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `tag`, replacing any previous value.
    pub fn insert(&mut self, tag: impl Into<String>, value: MetricValue) {
        let _ = self.values.insert(tag.into(), value);
    }

    /// Whether `tag` has a value.
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.values.contains_key(tag)
    }

    /// The value for `tag`, if computed.
    #[must_use]
    pub fn get(&self, tag: &str) -> Option<&MetricValue> {
        self.values.get(tag)
    }

    /// The value for `tag`, or a `NoValue` error.
    pub fn get_or_raise(&self, tag: &str) -> Result<&MetricValue, MetricError> {
        self.values
            .get(tag)
            .ok_or_else(|| MetricError::no_value(format!("metric `{tag}` is not available")))
    }

    /// The scalar value for `tag` as `f64`, or a `NoValue` error.
    pub fn scalar_or_raise(&self, tag: &str) -> Result<f64, MetricError> {
        self.get_or_raise(tag)?.as_scalar_f64().ok_or_else(|| {
            MetricError::invalid(format!("metric `{tag}` is list-valued, expected a scalar"))
        })
    }

    /// The scalar value for `tag` converted from `from` to `to` units.
    pub fn converted_or_raise(
        &self,
        tag: &str,
        from: MetricUnit,
        to: MetricUnit,
    ) -> Result<f64, MetricError> {
        let value = self.scalar_or_raise(tag)?;
        from.convert_to(to, value).map_err(|e| MetricError::invalid(e.to_string()))
    }

    /// Iterates over `(tag, value)` pairs in tag order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetricValue)> {
        self.values.iter()
    }

    /// Number of computed values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when nothing was computed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consumes the map into its underlying tag-keyed values.
    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, MetricValue> {
        self.values
    }
}

impl From<BTreeMap<String, MetricValue>> for MetricRecordMap {
    fn from(values: BTreeMap<String, MetricValue>) -> Self {
        Self { values }
    }
}

/// Run-wide value of one metric in the results processor.
#[derive(Debug)]
pub enum ResultsValue {
    /// A RECORD metric's collected values.
    Array(MetricArray),
    /// An AGGREGATE, SUM_AGGREGATE, or DERIVED metric's scalar.
    Scalar(MetricValue),
}

/// Run-wide metric state, keyed by tag.
#[derive(Debug, Default)]
pub struct MetricResultsMap {
    values: BTreeMap<String, ResultsValue>,
}

impl MetricResultsMap {
    /// Empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a RECORD metric value (scalars append one element, lists
    /// extend) to the tag's array, creating it on first use.
    pub fn append_record_value(&mut self, tag: &str, value: &MetricValue) {
        let entry = self
            .values
            .entry(tag.to_string())
            .or_insert_with(|| ResultsValue::Array(MetricArray::new()));
        if let ResultsValue::Array(array) = entry {
            match value {
                MetricValue::IntList(vs) => {
                    for v in vs {
                        array.append(*v as f64);
                    }
                }
                MetricValue::FloatList(vs) => array.extend(vs),
                scalar => {
                    if let Some(v) = scalar.as_scalar_f64() {
                        array.append(v);
                    }
                }
            }
        }
    }

    /// Stores a scalar result, replacing any previous value.
    pub fn insert_scalar(&mut self, tag: impl Into<String>, value: MetricValue) {
        let _ = self.values.insert(tag.into(), ResultsValue::Scalar(value));
    }

    /// Whether `tag` has any state.
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.values.contains_key(tag)
    }

    /// The raw state for `tag`.
    #[must_use]
    pub fn get(&self, tag: &str) -> Option<&ResultsValue> {
        self.values.get(tag)
    }

    /// The array for `tag`, or a `NoValue` error.
    pub fn array_or_raise(&self, tag: &str) -> Result<&MetricArray, MetricError> {
        match self.values.get(tag) {
            Some(ResultsValue::Array(array)) if !array.is_empty() => Ok(array),
            Some(ResultsValue::Array(_)) | None => {
                Err(MetricError::no_value(format!("metric `{tag}` has no collected values")))
            }
            Some(ResultsValue::Scalar(_)) => {
                Err(MetricError::invalid(format!("metric `{tag}` is a scalar, expected an array")))
            }
        }
    }

    /// The scalar for `tag` as `f64`, or a `NoValue` error.
    pub fn scalar_or_raise(&self, tag: &str) -> Result<f64, MetricError> {
        match self.values.get(tag) {
            Some(ResultsValue::Scalar(value)) => value.as_scalar_f64().ok_or_else(|| {
                MetricError::invalid(format!("metric `{tag}` is list-valued, expected a scalar"))
            }),
            Some(ResultsValue::Array(_)) => {
                Err(MetricError::invalid(format!("metric `{tag}` is an array, expected a scalar")))
            }
            None => Err(MetricError::no_value(format!("metric `{tag}` is not available"))),
        }
    }

    /// The integer scalar for `tag`, or a `NoValue` error.
    pub fn scalar_i64_or_raise(&self, tag: &str) -> Result<i64, MetricError> {
        match self.values.get(tag) {
            Some(ResultsValue::Scalar(value)) => value.as_scalar_i64().ok_or_else(|| {
                MetricError::invalid(format!("metric `{tag}` is not an integer scalar"))
            }),
            _ => Err(MetricError::no_value(format!("metric `{tag}` is not available"))),
        }
    }

    /// The scalar for `tag` converted from `from` to `to` units.
    pub fn converted_or_raise(
        &self,
        tag: &str,
        from: MetricUnit,
        to: MetricUnit,
    ) -> Result<f64, MetricError> {
        let value = self.scalar_or_raise(tag)?;
        from.convert_to(to, value).map_err(|e| MetricError::invalid(e.to_string()))
    }

    /// Iterates over `(tag, state)` pairs in tag order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ResultsValue)> {
        self.values.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_map_raises_on_missing() {
        let mut map = MetricRecordMap::new();
        map.insert("request_latency", MetricValue::Int(120));
        assert!(map.get_or_raise("request_latency").is_ok());
        let err = map.get_or_raise("ttft").expect_err("missing");
        assert!(err.is_no_value());
    }

    #[test]
    fn record_map_converts_scalars() {
        let mut map = MetricRecordMap::new();
        map.insert("request_latency", MetricValue::Int(250_000_000));
        let ms = map
            .converted_or_raise(
                "request_latency",
                MetricUnit::Nanoseconds,
                MetricUnit::Milliseconds,
            )
            .expect("convert");
        assert_eq!(ms, 250.0);
    }

    #[test]
    fn results_map_appends_scalars_and_lists() {
        let mut map = MetricResultsMap::new();
        map.append_record_value("icl", &MetricValue::IntList(vec![40, 40]));
        map.append_record_value("icl", &MetricValue::Int(40));
        let array = map.array_or_raise("icl").expect("array");
        assert_eq!(array.len(), 3);
        assert_eq!(array.sum(), 120.0);
    }

    #[test]
    fn results_map_distinguishes_shapes() {
        let mut map = MetricResultsMap::new();
        map.insert_scalar("request_count", MetricValue::Int(3));
        assert!(map.array_or_raise("request_count").is_err());
        assert_eq!(map.scalar_i64_or_raise("request_count").expect("scalar"), 3);
        assert!(map.scalar_or_raise("absent").expect_err("missing").is_no_value());
    }
}
