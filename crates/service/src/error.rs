// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the service runtime.

use aiperf_messages::ServiceState;
use thiserror::Error;

/// Errors raised by the service lifecycle runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// An illegal lifecycle transition was attempted.
    #[error("invalid state transition {from} -> {to} for {service_id}")]
    InvalidStateTransition {
        /// The service attempting the transition.
        service_id: String,
        /// Current state.
        from: ServiceState,
        /// Requested state.
        to: ServiceState,
    },

    /// An operation ran before the service initialized.
    #[error("{service_id} is not initialized: {operation}")]
    NotInitialized {
        /// The service the operation ran on.
        service_id: String,
        /// The operation that was attempted.
        operation: String,
    },

    /// An operation inside the lifecycle failed; triggers orderly stop.
    #[error("lifecycle operation `{operation}` failed for {service_id}: {details}")]
    LifecycleOperation {
        /// The service the operation ran in.
        service_id: String,
        /// The operation that failed.
        operation: String,
        /// Failure description.
        details: String,
    },

    /// Messaging fabric failure.
    #[error(transparent)]
    Fabric(#[from] aiperf_fabric::Error),

    /// A service thread could not be spawned.
    #[error("failed to spawn thread `{thread_name}`: {source}")]
    ThreadSpawn {
        /// Name of the thread.
        thread_name: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A service thread panicked.
    #[error("thread `{thread_name}` panicked: {panic_message}")]
    ThreadJoinPanic {
        /// Name of the thread.
        thread_name: String,
        /// Formatted panic payload.
        panic_message: String,
    },
}

impl Error {
    /// Wraps an arbitrary failure as a lifecycle operation error.
    #[must_use]
    pub fn lifecycle(
        service_id: impl Into<String>,
        operation: impl Into<String>,
        details: impl std::fmt::Display,
    ) -> Self {
        Error::LifecycleOperation {
            service_id: service_id.into(),
            operation: operation.into(),
            details: details.to_string(),
        }
    }
}
