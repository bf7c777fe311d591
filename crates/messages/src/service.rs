// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Service identity, lifecycle, and command enumerations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// States a service can be in throughout its lifecycle.
///
/// Legal transitions: `Created -> Initialized -> Running -> Stopping ->
/// Stopped`, with `Failed` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// The service object exists but has not opened any resources.
    Created,
    /// Communication clients are connected; the service is ready to run.
    Initialized,
    /// The service main loop is active.
    Running,
    /// A stop was requested; the service is draining tasks.
    Stopping,
    /// The service has released all resources.
    Stopped,
    /// The service terminated abnormally.
    Failed,
}

impl ServiceState {
    /// True once the lifecycle has entered `Stopping` or a terminal state.
    ///
    /// Socket close races with send/recv are swallowed only in this window.
    #[must_use]
    pub fn is_stopping_or_later(self) -> bool {
        self >= ServiceState::Stopping
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ServiceState::Created => "created",
            ServiceState::Initialized => "initialized",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
            ServiceState::Failed => "failed",
        };
        write!(f, "{label}")
    }
}

/// Types of services in the AIPerf fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    /// Orchestrates the lifecycle of every other service.
    SystemController,
    /// Serves conversation turns on demand over REQ/REP.
    DatasetProvider,
    /// Issues credits at the configured pace.
    TimingManager,
    /// Converts credits into HTTP requests.
    WorkerManager,
    /// Computes record-level metric values from raw records.
    RecordProcessor,
    /// Accumulates metric values and synthesizes the final report.
    ResultsProcessor,
}

impl ServiceType {
    /// Short identifier used in service ids and log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::SystemController => "system_controller",
            ServiceType::DatasetProvider => "dataset_provider",
            ServiceType::TimingManager => "timing_manager",
            ServiceType::WorkerManager => "worker_manager",
            ServiceType::RecordProcessor => "record_processor",
            ServiceType::ResultsProcessor => "results_processor",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Commands the system controller issues to component services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    /// Deliver the profiling configuration to the service.
    ProfileConfigure,
    /// Begin credit issuance / request execution.
    ProfileStart,
    /// Stop credit issuance and drain in-flight work.
    ProfileStop,
    /// Summarize accumulated records into the final report.
    ProcessRecords,
    /// Release all resources and exit.
    Shutdown,
}

impl CommandType {
    /// Wire label for the command.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CommandType::ProfileConfigure => "profile_configure",
            CommandType::ProfileStart => "profile_start",
            CommandType::ProfileStop => "profile_stop",
            CommandType::ProcessRecords => "process_records",
            CommandType::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of executing a command, carried in command responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutcome {
    /// The command completed.
    Ok,
    /// The command failed; details are in the response `error` field.
    Error,
}

/// Error captured when a service exits abnormally, aggregated by the system
/// controller for the end-of-run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitErrorInfo {
    /// Id of the service that failed.
    pub service_id: String,
    /// Type of the service that failed.
    pub service_type: ServiceType,
    /// Human-readable failure description.
    pub message: String,
}

impl fmt::Display for ExitErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.service_id, self.service_type, self.message)
    }
}

/// Topics on the event bus. SUB clients filter by topic prefix, so related
/// topics share a prefix (`credit_phase_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Service registration announcements.
    Registration,
    /// Periodic service liveness reports.
    Heartbeat,
    /// Service state change notifications.
    Status,
    /// Controller-issued commands.
    Command,
    /// Responses to controller-issued commands.
    CommandResponse,
    /// Service-reported errors.
    Error,
    /// Orderly shutdown requests.
    Shutdown,
    /// Credit returns from workers.
    CreditReturn,
    /// Credit phase start announcements.
    CreditPhaseStart,
    /// Credit phase sending-complete announcements.
    CreditPhaseSendingComplete,
    /// Credit phase completion announcements.
    CreditPhaseComplete,
    /// Periodic credit phase progress reports.
    CreditPhaseProgress,
    /// All credit phases have completed.
    CreditsComplete,
    /// Realtime metric snapshots for UIs.
    RealtimeMetrics,
}

impl Topic {
    /// Wire prefix used for SUB-side filtering.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::Registration => "registration",
            Topic::Heartbeat => "heartbeat",
            Topic::Status => "status",
            Topic::Command => "command",
            Topic::CommandResponse => "command_response",
            Topic::Error => "error",
            Topic::Shutdown => "shutdown",
            Topic::CreditReturn => "credit_return",
            Topic::CreditPhaseStart => "credit_phase_start",
            Topic::CreditPhaseSendingComplete => "credit_phase_sending_complete",
            Topic::CreditPhaseComplete => "credit_phase_complete",
            Topic::CreditPhaseProgress => "credit_phase_progress",
            Topic::CreditsComplete => "credits_complete",
            Topic::RealtimeMetrics => "realtime_metrics",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
