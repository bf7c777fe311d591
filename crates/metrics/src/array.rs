// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Growable numeric vector backing RECORD metric results.

use aiperf_messages::MetricResult;

/// Values of one RECORD metric across every record, with a running sum.
///
/// Capacity doubles on overflow so appends are amortized O(1) across the
/// millions of records a run can produce.
#[derive(Debug, Clone)]
pub struct MetricArray {
    data: Vec<f64>,
    sum: f64,
}

impl MetricArray {
    /// Default initial capacity.
    pub const DEFAULT_CAPACITY: usize = 10_000;

    /// Empty array with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Empty array with an explicit initial capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: Vec::with_capacity(capacity.max(1)), sum: 0.0 }
    }

    /// Appends one value.
    pub fn append(&mut self, value: f64) {
        self.reserve_for(1);
        self.data.push(value);
        self.sum += value;
    }

    /// Appends every value in `values`.
    pub fn extend(&mut self, values: &[f64]) {
        self.reserve_for(values.len());
        for value in values {
            self.sum += *value;
        }
        self.data.extend_from_slice(values);
    }

    fn reserve_for(&mut self, additional: usize) {
        let needed = self.data.len() + additional;
        if needed > self.data.capacity() {
            let target = (self.data.capacity() * 2).max(needed);
            self.data.reserve(target - self.data.len());
        }
    }

    /// Running sum of all appended values.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Number of values held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when no values have been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// View of the held values in insertion order.
    #[must_use]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Summarizes the array into a result row.
    ///
    /// Percentiles are order statistics with linear interpolation, so any
    /// permutation of the same values yields the same result. Returns `None`
    /// for an empty array.
    #[must_use]
    pub fn to_result(&self, tag: &str, header: &str, unit: &str) -> Option<MetricResult> {
        if self.data.is_empty() {
            return None;
        }
        let mut sorted = self.data.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let count = sorted.len();
        let mean = self.sum / count as f64;
        let variance =
            sorted.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / count as f64;

        Some(MetricResult {
            tag: tag.to_string(),
            header: header.to_string(),
            unit: unit.to_string(),
            avg: mean,
            min: sorted.first().copied(),
            max: sorted.last().copied(),
            std: Some(variance.sqrt()),
            p1: Some(percentile(&sorted, 1.0)),
            p5: Some(percentile(&sorted, 5.0)),
            p25: Some(percentile(&sorted, 25.0)),
            p50: Some(percentile(&sorted, 50.0)),
            p75: Some(percentile(&sorted, 75.0)),
            p90: Some(percentile(&sorted, 90.0)),
            p95: Some(percentile(&sorted, 95.0)),
            p99: Some(percentile(&sorted, 99.0)),
            count: count as u64,
        })
    }
}

impl Default for MetricArray {
    fn default() -> Self {
        Self::new()
    }
}

/// Linear-interpolated percentile over already-sorted data.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let fraction = rank - lower as f64;
    sorted[lower] + fraction * (sorted[upper] - sorted[lower])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sum_and_len_track_appends() {
        let mut array = MetricArray::with_capacity(2);
        array.append(5.0);
        array.append(5.0);
        array.extend(&[10.0]);
        assert_eq!(array.len(), 3);
        assert_eq!(array.sum(), 20.0);
        assert_eq!(array.data(), &[5.0, 5.0, 10.0]);
    }

    #[test]
    fn to_result_is_order_independent() {
        let values = [9.0, 1.0, 5.0, 3.0, 7.0, 2.0, 8.0, 4.0, 6.0, 10.0];
        let mut forward = MetricArray::new();
        let mut reverse = MetricArray::new();
        for v in values {
            forward.append(v);
        }
        for v in values.iter().rev() {
            reverse.append(*v);
        }
        let a = forward.to_result("t", "T", "ns").expect("result");
        let b = reverse.to_result("t", "T", "ns").expect("result");
        assert_eq!(a, b);
        assert_eq!(a.min, Some(1.0));
        assert_eq!(a.max, Some(10.0));
        assert_eq!(a.avg, 5.5);
        assert_eq!(a.p50, Some(5.5));
        assert_eq!(a.count, 10);
    }

    #[test]
    fn to_result_is_deterministic() {
        let mut array = MetricArray::new();
        for v in [5.0, 5.0, 10.0] {
            array.append(v);
        }
        let a = array.to_result("t", "T", "ns").expect("result");
        let b = array.to_result("t", "T", "ns").expect("result");
        assert_eq!(a, b);
    }

    #[test]
    fn empty_array_has_no_result() {
        assert!(MetricArray::new().to_result("t", "T", "ns").is_none());
    }

    #[test]
    fn single_value_percentiles_collapse() {
        let mut array = MetricArray::new();
        array.append(42.0);
        let result = array.to_result("t", "T", "ns").expect("result");
        assert_eq!(result.p1, Some(42.0));
        assert_eq!(result.p99, Some(42.0));
        assert_eq!(result.std, Some(0.0));
    }
}
