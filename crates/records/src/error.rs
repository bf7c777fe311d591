// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the record and results processors.

use thiserror::Error;

/// Errors raised by the metrics pipeline services.
#[derive(Debug, Error)]
pub enum Error {
    /// The metric catalog is misconfigured; fatal at startup.
    #[error(transparent)]
    MetricType(#[from] aiperf_metrics::MetricTypeError),

    /// An optional post-processing feature is not configured; the
    /// orchestrator skips the processor instead of failing.
    #[error("post-processor disabled: {details}")]
    PostProcessorDisabled {
        /// Why the processor cannot run.
        details: String,
    },

    /// Artifact file I/O failure.
    #[error("export error for `{path}`: {details}")]
    Export {
        /// The artifact path.
        path: String,
        /// Description of the failure.
        details: String,
    },

    /// Messaging fabric failure.
    #[error(transparent)]
    Fabric(#[from] aiperf_fabric::Error),

    /// Service runtime failure.
    #[error(transparent)]
    Service(#[from] aiperf_service::Error),
}
