// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Timing manager configuration, distilled from the user config.

use aiperf_config::{RequestRateMode, ServiceConfig, TimingMode, UserConfig};
use std::time::Duration;

/// Everything the timing manager needs to pace a run.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingManagerConfig {
    /// Timing mode.
    pub timing_mode: TimingMode,
    /// Maximum concurrent in-flight credits; unbounded when absent.
    pub concurrency: Option<u64>,
    /// Target request rate in requests per second.
    pub request_rate: Option<f64>,
    /// Sub-mode for request-rate timing.
    pub request_rate_mode: RequestRateMode,
    /// Credits to issue in the profiling phase for count-based runs.
    pub request_count: u64,
    /// Credits to issue in the warmup phase; zero disables warmup.
    pub warmup_request_count: u64,
    /// Profiling phase duration in seconds for time-based runs.
    pub benchmark_duration: Option<f64>,
    /// Seconds to wait past the nominal duration for in-flight credits.
    pub benchmark_grace_period: f64,
    /// Seed for every PRNG the timing manager owns.
    pub random_seed: Option<u64>,
    /// Use the earliest schedule timestamp as the zero reference.
    pub auto_offset_timestamps: bool,
    /// Explicit zero reference in milliseconds.
    pub fixed_schedule_start_offset: Option<u64>,
    /// Truncate schedule entries past this offset in milliseconds.
    pub fixed_schedule_end_offset: Option<u64>,
    /// Percentage of requests to cancel mid-flight, 0-100.
    pub request_cancellation_rate: f64,
    /// Seconds after request start at which cancelled requests abort.
    pub request_cancellation_delay: f64,
    /// Interval between phase progress publications.
    pub progress_report_interval: Duration,
}

impl TimingManagerConfig {
    /// Extracts the timing view of a validated user config.
    #[must_use]
    pub fn from_user_config(user_config: &UserConfig, service_config: &ServiceConfig) -> Self {
        let lg = &user_config.loadgen;
        Self {
            timing_mode: lg.timing_mode,
            concurrency: lg.concurrency,
            request_rate: lg.request_rate,
            request_rate_mode: lg.request_rate_mode,
            request_count: lg.request_count,
            warmup_request_count: lg.warmup_request_count,
            benchmark_duration: lg.benchmark_duration,
            benchmark_grace_period: lg.benchmark_grace_period,
            random_seed: user_config.input.random_seed,
            auto_offset_timestamps: user_config.input.fixed_schedule_auto_offset,
            fixed_schedule_start_offset: user_config.input.fixed_schedule_start_offset,
            fixed_schedule_end_offset: user_config.input.fixed_schedule_end_offset,
            request_cancellation_rate: lg.request_cancellation_rate,
            request_cancellation_delay: lg.request_cancellation_delay,
            progress_report_interval: service_config.progress_report_interval,
        }
    }
}

impl Default for TimingManagerConfig {
    fn default() -> Self {
        Self {
            timing_mode: TimingMode::RequestRate,
            concurrency: None,
            request_rate: None,
            request_rate_mode: RequestRateMode::Constant,
            request_count: 10,
            warmup_request_count: 0,
            benchmark_duration: None,
            benchmark_grace_period: 30.0,
            random_seed: None,
            auto_offset_timestamps: true,
            fixed_schedule_start_offset: None,
            fixed_schedule_end_offset: None,
            request_cancellation_rate: 0.0,
            request_cancellation_delay: 0.0,
            progress_report_interval: Duration::from_millis(100),
        }
    }
}
