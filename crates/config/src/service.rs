// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Service-level configuration: transport selection, timeouts, batching.
//!
//! These settings are shared by every service in the fleet and are not
//! user-tunable per run section; they ride alongside `UserConfig`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Transport used by the messaging fabric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// TCP sockets on a contiguous port block starting at `base_port`.
    Tcp {
        /// Host every address binds or connects on.
        host: String,
        /// First port of the address block.
        base_port: u16,
    },
    /// Unix domain sockets under a run directory, cleaned up on shutdown.
    Ipc {
        /// Directory the socket files live in.
        run_dir: PathBuf,
    },
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Tcp { host: "127.0.0.1".to_string(), base_port: 5650 }
    }
}

/// Fleet-wide service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Messaging fabric transport.
    #[serde(default)]
    pub transport: TransportConfig,
    /// Number of workers; defaults to the CPU count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    /// Number of record processors.
    #[serde(default = "default_record_processors")]
    pub record_processors: usize,
    /// Bound on pending sends and receives per socket.
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,
    /// Maximum retries for a transiently failing send.
    #[serde(default = "default_send_retries")]
    pub send_max_retries: u32,
    /// Base delay of the linear send back-off schedule.
    #[serde(with = "humantime_serde", default = "default_send_backoff")]
    pub send_retry_backoff: Duration,
    /// How long a service may drain pending work once stopping.
    #[serde(with = "humantime_serde", default = "default_graceful_shutdown")]
    pub graceful_shutdown_timeout: Duration,
    /// How long the controller waits for all services to register.
    #[serde(with = "humantime_serde", default = "default_registration_timeout")]
    pub registration_timeout: Duration,
    /// Interval between heartbeat publications.
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,
    /// Interval between credit phase progress reports.
    #[serde(with = "humantime_serde", default = "default_progress_interval")]
    pub progress_report_interval: Duration,
    /// Interval between realtime stats snapshots.
    #[serde(with = "humantime_serde", default = "default_realtime_interval")]
    pub realtime_stats_interval: Duration,
    /// Default timeout for request/reply exchanges.
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_reply_timeout: Duration,
    /// Records per stage-1 flush to the results processor.
    #[serde(default = "default_record_batch_size")]
    pub record_batch_size: usize,
    /// Maximum age of a stage-1 batch before it is flushed regardless of size.
    #[serde(with = "humantime_serde", default = "default_record_batch_age")]
    pub record_batch_max_age: Duration,
}

fn default_record_processors() -> usize {
    1
}

fn default_high_water_mark() -> usize {
    64 * 1024
}

fn default_send_retries() -> u32 {
    5
}

fn default_send_backoff() -> Duration {
    Duration::from_millis(20)
}

fn default_graceful_shutdown() -> Duration {
    Duration::from_secs(10)
}

fn default_registration_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_progress_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_realtime_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_record_batch_size() -> usize {
    64
}

fn default_record_batch_age() -> Duration {
    Duration::from_millis(100)
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            workers: None,
            record_processors: default_record_processors(),
            high_water_mark: default_high_water_mark(),
            send_max_retries: default_send_retries(),
            send_retry_backoff: default_send_backoff(),
            graceful_shutdown_timeout: default_graceful_shutdown(),
            registration_timeout: default_registration_timeout(),
            heartbeat_interval: default_heartbeat_interval(),
            progress_report_interval: default_progress_interval(),
            realtime_stats_interval: default_realtime_interval(),
            request_reply_timeout: default_request_timeout(),
            record_batch_size: default_record_batch_size(),
            record_batch_max_age: default_record_batch_age(),
        }
    }
}
