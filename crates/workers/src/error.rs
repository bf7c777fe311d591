// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the worker pool.

use thiserror::Error;

/// Errors raised by the worker pool.
#[derive(Debug, Error)]
pub enum Error {
    /// Worker configuration problem detected at startup.
    #[error("worker configuration error: {details}")]
    Configuration {
        /// Description of the problem.
        details: String,
    },

    /// The dataset provider did not supply a usable conversation.
    #[error("dataset error: {details}")]
    Dataset {
        /// Description of the failure.
        details: String,
    },

    /// Messaging fabric failure.
    #[error(transparent)]
    Fabric(#[from] aiperf_fabric::Error),

    /// Service runtime failure.
    #[error(transparent)]
    Service(#[from] aiperf_service::Error),

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {details}")]
    HttpClient {
        /// Description of the failure.
        details: String,
    },
}
