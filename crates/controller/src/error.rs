// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the system controller.

use aiperf_messages::{ExitErrorInfo, ServiceType};
use thiserror::Error;

/// Errors raised while orchestrating the fleet.
#[derive(Debug, Error)]
pub enum Error {
    /// A required service failed to register or died before registering.
    #[error("service {service_type} failed to start: {details}")]
    ServiceStartup {
        /// The service that failed.
        service_type: ServiceType,
        /// Description of the failure.
        details: String,
    },

    /// Not every required service registered within the timeout.
    #[error("registration timed out after {timeout_sec}s; missing: {missing:?}")]
    RegistrationTimeout {
        /// Seconds waited.
        timeout_sec: u64,
        /// Service types that never registered.
        missing: Vec<ServiceType>,
    },

    /// A service reported a fatal error mid-run.
    #[error("run aborted: {0}")]
    RunAborted(ExitErrorInfo),

    /// The results processor produced no summary.
    #[error("no summary received from the results processor")]
    MissingSummary,

    /// Messaging fabric failure.
    #[error(transparent)]
    Fabric(#[from] aiperf_fabric::Error),

    /// Service runtime failure.
    #[error(transparent)]
    Service(#[from] aiperf_service::Error),

    /// Dataset loading failure.
    #[error("dataset error: {details}")]
    Dataset {
        /// Description of the failure.
        details: String,
    },
}
