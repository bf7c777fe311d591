// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the timing manager.

use thiserror::Error;

/// Errors raised while pacing a run.
#[derive(Debug, Error)]
pub enum Error {
    /// Contradictory or incomplete timing configuration.
    #[error("timing configuration error: {details}")]
    Configuration {
        /// Description of the problem.
        details: String,
    },

    /// A phase was configured with neither or both bounds.
    #[error(transparent)]
    PhaseConfig(#[from] aiperf_messages::credit::PhaseConfigError),

    /// The fixed schedule could not be loaded.
    #[error("failed to load fixed schedule from `{path}`: {details}")]
    ScheduleLoad {
        /// Path of the schedule file.
        path: String,
        /// Description of the failure.
        details: String,
    },

    /// Messaging fabric failure while issuing credits or publishing phases.
    #[error(transparent)]
    Fabric(#[from] aiperf_fabric::Error),

    /// Service runtime failure.
    #[error(transparent)]
    Service(#[from] aiperf_service::Error),
}
