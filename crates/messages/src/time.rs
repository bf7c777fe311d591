// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Process-wide clock helpers.
//!
//! Wall-clock timestamps (`timestamp_ns`) and monotonic timestamps
//! (`perf_ns`) are distinct domains and must never be mixed. The monotonic
//! clock is anchored at first use, so `perf_ns` values are only comparable
//! within a single process.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Nanoseconds per second.
pub const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Milliseconds per second.
pub const MILLIS_PER_SECOND: u64 = 1_000;

static MONOTONIC_ANCHOR: OnceLock<Instant> = OnceLock::new();

/// Current wall-clock time in integer nanoseconds since the Unix epoch.
#[must_use]
pub fn wall_clock_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Current monotonic time in nanoseconds since the process anchor.
///
/// Suitable for latency arithmetic (`end_perf_ns - start_perf_ns`), not for
/// cross-process correlation.
#[must_use]
pub fn monotonic_ns() -> u64 {
    let anchor = MONOTONIC_ANCHOR.get_or_init(Instant::now);
    anchor.elapsed().as_nanos() as u64
}
