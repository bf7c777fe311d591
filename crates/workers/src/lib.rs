// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! The worker pool: converts credits into HTTP requests and raw records.
//!
//! Each worker pulls from the shared credit queue, fetches the conversation
//! turn over REQ/REP, formats an endpoint-specific payload, performs the
//! timed HTTP call (streaming or unary), and pushes a
//! `ParsedResponseRecord` before returning the credit.

pub mod builder;
pub mod error;
pub mod http;
pub mod manager;
pub mod model;
pub mod parser;
pub mod url;
pub mod worker;

pub use error::Error;
pub use http::{HttpCallOutcome, HttpExecutor, HttpRequestSpec};
pub use manager::run_worker_manager;
pub use model::ModelSelector;
pub use url::build_url;
pub use worker::Worker;
