// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Decides which requests get cancelled mid-flight, and when.

use crate::config::TimingManagerConfig;
use aiperf_messages::time::NANOS_PER_SECOND;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

/// Independent Bernoulli cancellation decisions with a fixed delay.
///
/// Seeded from `random_seed` when provided, so cancellation patterns are
/// reproducible across runs.
#[derive(Debug)]
pub struct RequestCancellationStrategy {
    rng: StdRng,
    cancellation_rate: f64,
    cancellation_delay_ns: u64,
}

impl RequestCancellationStrategy {
    /// Strategy from the timing configuration.
    #[must_use]
    pub fn from_config(config: &TimingManagerConfig) -> Self {
        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        Self {
            rng,
            cancellation_rate: config.request_cancellation_rate / 100.0,
            cancellation_delay_ns: (config.request_cancellation_delay * NANOS_PER_SECOND as f64)
                as u64,
        }
    }

    /// True when cancellation is configured at all.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.cancellation_rate > 0.0
    }

    /// Draws the cancellation decision for one request.
    pub fn should_cancel_request(&mut self) -> bool {
        if self.cancellation_rate == 0.0 {
            return false;
        }
        self.rng.random::<f64>() < self.cancellation_rate
    }

    /// The delay after request start at which cancelled requests abort.
    #[must_use]
    pub fn cancellation_delay_ns(&self) -> u64 {
        self.cancellation_delay_ns
    }
}
