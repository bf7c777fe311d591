// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Concrete metric implementations, grouped by family.

pub mod counts;
pub mod goodput;
pub mod latency;
pub mod throughput;
pub mod tokens;
