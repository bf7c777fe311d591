// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Credit phase models used by the timing manager to pace request traffic.

use crate::time::{NANOS_PER_SECOND, wall_clock_ns};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The phase a credit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditPhase {
    /// Requests issued to warm the target before measurement starts.
    Warmup,
    /// Requests whose records feed the final report.
    Profiling,
}

impl fmt::Display for CreditPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreditPhase::Warmup => write!(f, "warmup"),
            CreditPhase::Profiling => write!(f, "profiling"),
        }
    }
}

/// A phase is bounded by exactly one of a request count or a duration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhaseConfigError {
    /// Neither or both bounds were provided.
    #[error(
        "phase {phase} must set exactly one of total_expected_requests or expected_duration_sec"
    )]
    InvalidBounds {
        /// The offending phase.
        phase: CreditPhase,
    },
}

/// Static configuration for a single credit phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditPhaseConfig {
    /// Which phase this configuration describes.
    pub phase: CreditPhase,
    /// Number of credits to issue, for count-based phases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_expected_requests: Option<u64>,
    /// Wall-clock budget in seconds, for time-based phases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_duration_sec: Option<f64>,
}

impl CreditPhaseConfig {
    /// Count-based phase configuration.
    #[must_use]
    pub fn count_based(phase: CreditPhase, total_expected_requests: u64) -> Self {
        Self {
            phase,
            total_expected_requests: Some(total_expected_requests),
            expected_duration_sec: None,
        }
    }

    /// Time-based phase configuration.
    #[must_use]
    pub fn time_based(phase: CreditPhase, expected_duration_sec: f64) -> Self {
        Self {
            phase,
            total_expected_requests: None,
            expected_duration_sec: Some(expected_duration_sec),
        }
    }

    /// Verifies that exactly one bound is set.
    pub fn validate(&self) -> Result<(), PhaseConfigError> {
        match (self.total_expected_requests, self.expected_duration_sec) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(PhaseConfigError::InvalidBounds { phase: self.phase }),
        }
    }
}

/// Mutable per-phase counters tracked by the timing manager.
///
/// Invariants: `completed <= sent`; `is_sending_complete` iff `sent_end_ns`
/// is set; `is_complete` implies `end_ns >= sent_end_ns >= start_ns`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditPhaseStats {
    /// Which phase these counters track.
    pub phase: CreditPhase,
    /// Wall-clock phase start in nanoseconds.
    pub start_ns: u64,
    /// Wall-clock time of the last sent credit; `None` until sending is done.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_end_ns: Option<u64>,
    /// Wall-clock time the last credit was returned; `None` until complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_ns: Option<u64>,
    /// Total credits to issue, for count-based phases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_expected_requests: Option<u64>,
    /// Wall-clock budget in seconds, for time-based phases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_duration_sec: Option<f64>,
    /// Credits dropped so far.
    pub sent: u64,
    /// Credits returned by workers so far.
    pub completed: u64,
}

impl CreditPhaseStats {
    /// Fresh counters for a configured phase, started now.
    #[must_use]
    pub fn from_config(config: &CreditPhaseConfig) -> Self {
        Self::from_config_at(config, wall_clock_ns())
    }

    /// Fresh counters for a configured phase with an explicit start time.
    #[must_use]
    pub fn from_config_at(config: &CreditPhaseConfig, start_ns: u64) -> Self {
        Self {
            phase: config.phase,
            start_ns,
            sent_end_ns: None,
            end_ns: None,
            total_expected_requests: config.total_expected_requests,
            expected_duration_sec: config.expected_duration_sec,
            sent: 0,
            completed: 0,
        }
    }

    /// True once every credit for this phase has been dropped.
    #[must_use]
    pub fn is_sending_complete(&self) -> bool {
        self.sent_end_ns.is_some()
    }

    /// True once sending is complete and the last credit came back (or the
    /// phase was force-completed).
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.is_sending_complete() && self.end_ns.is_some()
    }

    /// True when the phase budget is a duration rather than a count.
    #[must_use]
    pub fn is_time_based(&self) -> bool {
        self.expected_duration_sec.is_some()
    }

    /// Credits dropped but not yet returned.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.sent.saturating_sub(self.completed)
    }

    /// The phase duration budget in nanoseconds, for time-based phases.
    #[must_use]
    pub fn expected_duration_ns(&self) -> Option<u64> {
        self.expected_duration_sec
            .map(|sec| (sec * NANOS_PER_SECOND as f64) as u64)
    }

    /// Whether another credit may be dropped at wall-clock time `now_ns`.
    ///
    /// Count-based phases send while `sent < total_expected_requests`;
    /// time-based phases send while the elapsed time is within the budget.
    #[must_use]
    pub fn should_send(&self, now_ns: u64) -> bool {
        if let Some(duration_ns) = self.expected_duration_ns() {
            now_ns.saturating_sub(self.start_ns) <= duration_ns
        } else if let Some(total) = self.total_expected_requests {
            self.sent < total
        } else {
            false
        }
    }

    /// Convenience form of [`CreditPhaseStats::should_send`] using the wall clock.
    #[must_use]
    pub fn should_send_now(&self) -> bool {
        self.should_send(wall_clock_ns())
    }

    /// Progress through the phase in percent, if it can be estimated.
    ///
    /// Time-based phases report elapsed time against the budget; count-based
    /// phases report returned credits against the total.
    #[must_use]
    pub fn progress_percent(&self, now_ns: u64) -> Option<f64> {
        if self.is_complete() {
            return Some(100.0);
        }
        if let Some(duration_ns) = self.expected_duration_ns() {
            if duration_ns == 0 {
                return None;
            }
            let elapsed = now_ns.saturating_sub(self.start_ns) as f64;
            return Some((elapsed / duration_ns as f64 * 100.0).min(100.0));
        }
        if let Some(total) = self.total_expected_requests {
            if total == 0 {
                return None;
            }
            return Some(self.completed as f64 / total as f64 * 100.0);
        }
        None
    }
}

/// Counters for record processing outcomes within a phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseProcessingStats {
    /// Records processed without error.
    pub processed: u64,
    /// Records that carried an error block.
    pub errors: u64,
}

impl PhaseProcessingStats {
    /// Total records seen, successful or not.
    #[must_use]
    pub fn total_records(&self) -> u64 {
        self.processed + self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_stats(total: u64) -> CreditPhaseStats {
        CreditPhaseStats::from_config_at(
            &CreditPhaseConfig::count_based(CreditPhase::Profiling, total),
            1_000,
        )
    }

    #[test]
    fn count_based_should_send_stops_at_total() {
        let mut stats = count_stats(2);
        assert!(stats.should_send(1_000));
        stats.sent = 1;
        assert!(stats.should_send(u64::MAX));
        stats.sent = 2;
        assert!(!stats.should_send(1_000));
    }

    #[test]
    fn time_based_should_send_tracks_the_window() {
        let config = CreditPhaseConfig::time_based(CreditPhase::Profiling, 1.0);
        let stats = CreditPhaseStats::from_config_at(&config, 1_000);
        assert!(stats.should_send(1_000));
        assert!(stats.should_send(1_000 + NANOS_PER_SECOND));
        assert!(!stats.should_send(1_001 + NANOS_PER_SECOND));
    }

    #[test]
    fn in_flight_never_underflows() {
        let mut stats = count_stats(5);
        stats.sent = 3;
        stats.completed = 3;
        assert_eq!(stats.in_flight(), 0);
        stats.completed = 4;
        assert_eq!(stats.in_flight(), 0);
    }

    #[test]
    fn completion_requires_both_marks() {
        let mut stats = count_stats(1);
        assert!(!stats.is_complete());
        stats.sent_end_ns = Some(2_000);
        assert!(stats.is_sending_complete());
        assert!(!stats.is_complete());
        stats.end_ns = Some(3_000);
        assert!(stats.is_complete());
        assert_eq!(stats.progress_percent(9_999), Some(100.0));
    }

    #[test]
    fn exactly_one_bound_is_enforced() {
        let both = CreditPhaseConfig {
            phase: CreditPhase::Warmup,
            total_expected_requests: Some(1),
            expected_duration_sec: Some(1.0),
        };
        assert!(both.validate().is_err());
        let neither = CreditPhaseConfig {
            phase: CreditPhase::Warmup,
            total_expected_requests: None,
            expected_duration_sec: None,
        };
        assert!(neither.validate().is_err());
        assert!(CreditPhaseConfig::count_based(CreditPhase::Warmup, 1).validate().is_ok());
    }
}
