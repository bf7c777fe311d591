// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Metric units and conversions.
//!
//! Metrics store values in an internal unit (typically nanoseconds) and may
//! declare a different display unit. Conversions are only defined within
//! the time family; anything else is a configuration error.

use crate::error::MetricTypeError;
use std::fmt;

/// Unit of a metric's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricUnit {
    /// Time in nanoseconds.
    Nanoseconds,
    /// Time in microseconds.
    Microseconds,
    /// Time in milliseconds.
    Milliseconds,
    /// Time in seconds.
    Seconds,
    /// Request count.
    Requests,
    /// Token count.
    Tokens,
    /// Requests per second.
    RequestsPerSecond,
    /// Tokens per second.
    TokensPerSecond,
    /// Tokens per second per user.
    TokensPerSecondPerUser,
}

impl MetricUnit {
    /// Display label for reports and exports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MetricUnit::Nanoseconds => "ns",
            MetricUnit::Microseconds => "us",
            MetricUnit::Milliseconds => "ms",
            MetricUnit::Seconds => "sec",
            MetricUnit::Requests => "requests",
            MetricUnit::Tokens => "tokens",
            MetricUnit::RequestsPerSecond => "requests/sec",
            MetricUnit::TokensPerSecond => "tokens/sec",
            MetricUnit::TokensPerSecondPerUser => "tokens/sec/user",
        }
    }

    /// Nanoseconds per one of this unit, for time units.
    fn nanos_per_unit(self) -> Option<f64> {
        match self {
            MetricUnit::Nanoseconds => Some(1.0),
            MetricUnit::Microseconds => Some(1e3),
            MetricUnit::Milliseconds => Some(1e6),
            MetricUnit::Seconds => Some(1e9),
            _ => None,
        }
    }

    /// True for units in the time family.
    #[must_use]
    pub fn is_time(self) -> bool {
        self.nanos_per_unit().is_some()
    }

    /// Converts `value` from this unit to `other`.
    ///
    /// Identity conversions always succeed; everything else requires both
    /// units to be time units.
    pub fn convert_to(self, other: MetricUnit, value: f64) -> Result<f64, MetricTypeError> {
        if self == other {
            return Ok(value);
        }
        match (self.nanos_per_unit(), other.nanos_per_unit()) {
            (Some(from), Some(to)) => Ok(value * from / to),
            _ => Err(MetricTypeError::UnitConversion {
                from: self.as_str().to_string(),
                to: other.as_str().to_string(),
            }),
        }
    }
}

impl fmt::Display for MetricUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_conversions() {
        let ms = MetricUnit::Nanoseconds
            .convert_to(MetricUnit::Milliseconds, 250_000_000.0)
            .expect("convert");
        assert_eq!(ms, 250.0);
        let ns = MetricUnit::Milliseconds
            .convert_to(MetricUnit::Nanoseconds, 250.0)
            .expect("convert");
        assert_eq!(ns, 250_000_000.0);
        let s = MetricUnit::Nanoseconds.convert_to(MetricUnit::Seconds, 5e9).expect("convert");
        assert_eq!(s, 5.0);
    }

    #[test]
    fn non_time_conversions_are_rejected() {
        assert!(MetricUnit::Requests.convert_to(MetricUnit::Seconds, 1.0).is_err());
        assert!(MetricUnit::TokensPerSecond.convert_to(MetricUnit::Tokens, 1.0).is_err());
        // Identity is always fine.
        assert_eq!(MetricUnit::Tokens.convert_to(MetricUnit::Tokens, 7.0).expect("identity"), 7.0);
    }
}
