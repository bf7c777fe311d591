// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! The timing manager: the only authority on when a request may be sent.
//!
//! A [`strategy::PhaseEngine`] executes the configured credit phases
//! (optional warmup, then profiling) using one issuing strategy: constant
//! rate, Poisson, concurrency burst, rate with a concurrency cap, or a
//! fixed schedule replay. Credit returns from workers drive completion
//! accounting; time-based phases force-complete after a bounded grace
//! period.

pub mod cancellation;
pub mod config;
pub mod error;
pub mod manager;
pub mod rate;
pub mod schedule;
pub mod strategy;

pub use config::TimingManagerConfig;
pub use error::Error;
pub use manager::run_timing_manager;
pub use schedule::FixedSchedule;
pub use strategy::{CreditDrop, CreditManager, CreditReturnHandle, PhaseEngine};
