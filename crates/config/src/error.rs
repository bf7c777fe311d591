// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the config crate.
//!
//! Configuration errors are fatal at startup and render as titled report
//! boxes through miette before the process exits non-zero.

use miette::Diagnostic;

/// Errors raised while loading or validating user configuration.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// An error that occurred while reading a configuration file.
    #[error("failed to read config file `{path}`: {details}")]
    #[diagnostic(code(aiperf::config::file_read_error))]
    FileReadError {
        /// Path of the file that could not be read.
        path: String,
        /// A description of the error that occurred.
        details: String,
    },

    /// An error that occurred while deserializing a configuration file.
    #[error("failed to parse config file `{path}`: {details}")]
    #[diagnostic(code(aiperf::config::deserialization_error))]
    DeserializationError {
        /// Path of the file that could not be parsed.
        path: String,
        /// A description of the error that occurred.
        details: String,
    },

    /// Two or more settings contradict each other.
    #[error("invalid configuration: {details}")]
    #[diagnostic(
        code(aiperf::config::validation_error),
        help("check the load generation section of your configuration")
    )]
    ValidationError {
        /// A description of the contradiction.
        details: String,
    },

    /// A required setting is missing for the selected mode.
    #[error("missing configuration: {details}")]
    #[diagnostic(code(aiperf::config::missing_setting))]
    MissingSetting {
        /// A description of what is missing and which mode requires it.
        details: String,
    },
}
