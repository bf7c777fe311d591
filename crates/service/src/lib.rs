// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Service lifecycle runtime.
//!
//! Every AIPerf service runs on its own dedicated thread with a
//! single-threaded scheduler ([`spawn_service_thread`]), carries a
//! [`ServiceHarness`] for event bus wiring and lifecycle publication, and
//! advances through the [`Lifecycle`] state machine. Cooperative shutdown is
//! driven by cancellation tokens attached to the harness.

pub mod error;
pub mod harness;
pub mod lifecycle;
pub mod spawner;

pub use error::Error;
pub use harness::ServiceHarness;
pub use lifecycle::Lifecycle;
pub use spawner::{ServiceThreadHandle, spawn_service_thread};
