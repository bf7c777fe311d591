// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the messaging fabric.
//!
//! All variants are `Send` so they can surface from both the socket tasks
//! and the calling service.

use aiperf_messages::MessageDecodeError;
use std::io;
use thiserror::Error;

/// Errors that can occur in the messaging fabric.
#[derive(Debug, Error)]
pub enum Error {
    /// Operation invoked on a client whose lifecycle is still `Created`.
    #[error("client for {address} is not initialized")]
    NotInitialized {
        /// The address the client was created for.
        address: String,
    },

    /// A send exhausted its bounded retry schedule.
    #[error("send to {address} failed after {attempts} attempts")]
    SendRetriesExhausted {
        /// The destination address.
        address: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// A receive did not complete within its timeout.
    #[error("receive on {address} timed out after {timeout_ms}ms")]
    RecvTimeout {
        /// The source address.
        address: String,
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// A request/reply exchange did not complete within its timeout.
    #[error("request {request_id} to {address} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The destination address.
        address: String,
        /// The request id whose pending slot was dropped.
        request_id: String,
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The peer closed the socket during normal operation.
    ///
    /// Close races during shutdown (lifecycle >= Stopping) are swallowed by
    /// callers, not surfaced through this variant.
    #[error("socket for {address} closed unexpectedly")]
    SocketClosed {
        /// The address whose socket closed.
        address: String,
    },

    /// Transport-level I/O failure.
    #[error("transport error on {address}: {source}")]
    Transport {
        /// The address the failure occurred on.
        address: String,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// A frame arrived that could not be decoded into a message.
    #[error("malformed frame on {address}: {details}")]
    MalformedFrame {
        /// The address the frame arrived on.
        address: String,
        /// Decode failure description.
        details: String,
    },

    /// Could not establish a connection within the allowed attempts.
    #[error("failed to connect to {address} after {attempts} attempts: {details}")]
    ConnectFailed {
        /// The address that could not be reached.
        address: String,
        /// Number of attempts made.
        attempts: u32,
        /// Last underlying failure.
        details: String,
    },
}

impl Error {
    /// Wraps a message decode failure as a malformed frame on `address`.
    #[must_use]
    pub fn malformed(address: impl Into<String>, err: MessageDecodeError) -> Self {
        Error::MalformedFrame { address: address.into(), details: err.to_string() }
    }
}
