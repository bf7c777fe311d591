// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! The AIPerf system controller.
//!
//! Spawns every service on its own dedicated thread, starts the fabric
//! proxies, waits for the fleet to register and run, then sequences the
//! profile: configure, start, await credits-complete, stop load, process
//! records, shutdown. Service failures are collected into the run's exit
//! error list.

pub mod controller;
pub mod dataset;
pub mod error;

pub use controller::{RunSummary, SystemController, SystemState};
pub use dataset::{Dataset, run_dataset_provider};
pub use error::Error;
