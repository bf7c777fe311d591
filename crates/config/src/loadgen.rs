// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Load generation settings: timing mode, rates, phases, and cancellation.

use serde::{Deserialize, Serialize};

/// How the timing manager decides when requests may be sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingMode {
    /// Issue credits at a configured request rate (or pure concurrency).
    #[default]
    RequestRate,
    /// Replay a fixed `(timestamp, conversation)` schedule.
    FixedSchedule,
}

/// Sub-mode for request-rate timing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestRateMode {
    /// Fixed inter-arrival period `1 / request_rate`.
    #[default]
    Constant,
    /// Exponentially distributed inter-arrival times with rate `request_rate`.
    Poisson,
    /// No rate bound; paced entirely by the concurrency semaphore.
    ConcurrencyBurst,
}

/// Load generation configuration consumed by the timing manager and workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadGenConfig {
    /// Timing mode.
    #[serde(default)]
    pub timing_mode: TimingMode,
    /// Target request rate in requests per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_rate: Option<f64>,
    /// Sub-mode for request-rate timing.
    #[serde(default)]
    pub request_rate_mode: RequestRateMode,
    /// Credits to issue in the profiling phase (count-based runs).
    #[serde(default = "default_request_count")]
    pub request_count: u64,
    /// Credits to issue in the warmup phase; zero disables warmup.
    #[serde(default)]
    pub warmup_request_count: u64,
    /// Profiling phase duration in seconds (time-based runs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmark_duration: Option<f64>,
    /// Seconds to wait past the nominal duration for in-flight credits.
    #[serde(default = "default_grace_period")]
    pub benchmark_grace_period: f64,
    /// Maximum concurrent in-flight credits; unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u64>,
    /// Percentage of requests to cancel mid-flight, 0-100.
    #[serde(default)]
    pub request_cancellation_rate: f64,
    /// Seconds after request start at which cancelled requests abort.
    #[serde(default)]
    pub request_cancellation_delay: f64,
}

fn default_request_count() -> u64 {
    10
}

fn default_grace_period() -> f64 {
    30.0
}

impl Default for LoadGenConfig {
    fn default() -> Self {
        Self {
            timing_mode: TimingMode::default(),
            request_rate: None,
            request_rate_mode: RequestRateMode::default(),
            request_count: default_request_count(),
            warmup_request_count: 0,
            benchmark_duration: None,
            benchmark_grace_period: default_grace_period(),
            concurrency: None,
            request_cancellation_rate: 0.0,
            request_cancellation_delay: 0.0,
        }
    }
}
