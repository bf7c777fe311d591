// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Inter-arrival interval generators for the request-rate strategy.

use crate::config::TimingManagerConfig;
use crate::error::Error;
use aiperf_config::RequestRateMode;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use std::time::Duration;

/// Generates the delay to the next credit drop.
#[derive(Debug)]
pub enum RateGenerator {
    /// Fixed inter-arrival period `1 / request_rate`.
    Constant {
        /// The fixed period.
        period: Duration,
    },
    /// Exponentially distributed inter-arrival times (a Poisson process).
    Poisson {
        /// Rate parameter λ in events per second.
        rate: f64,
        /// Deterministic PRNG when a seed was provided.
        rng: StdRng,
    },
    /// No delay; pacing comes entirely from the concurrency semaphore.
    ConcurrencyBurst,
}

impl RateGenerator {
    /// Builds the generator for the configured rate mode.
    pub fn from_config(config: &TimingManagerConfig) -> Result<Self, Error> {
        match config.request_rate_mode {
            RequestRateMode::Constant => {
                let rate = positive_rate(config)?;
                Ok(RateGenerator::Constant { period: Duration::from_secs_f64(1.0 / rate) })
            }
            RequestRateMode::Poisson => {
                let rate = positive_rate(config)?;
                let rng = match config.random_seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_rng(&mut rand::rng()),
                };
                Ok(RateGenerator::Poisson { rate, rng })
            }
            RequestRateMode::ConcurrencyBurst => {
                if config.request_rate.is_some() {
                    return Err(Error::Configuration {
                        details: "request_rate must be unset in concurrency_burst mode"
                            .to_string(),
                    });
                }
                if config.concurrency.is_none_or(|c| c == 0) {
                    return Err(Error::Configuration {
                        details: "concurrency_burst mode requires a positive concurrency"
                            .to_string(),
                    });
                }
                Ok(RateGenerator::ConcurrencyBurst)
            }
        }
    }

    /// The delay before the next drop. Zero means drop immediately.
    pub fn next_interval(&mut self) -> Duration {
        match self {
            RateGenerator::Constant { period } => *period,
            RateGenerator::Poisson { rate, rng } => {
                // Inverse-CDF sampling of Exponential(λ): -ln(1 - u) / λ.
                let u: f64 = rng.random();
                Duration::from_secs_f64(-(1.0 - u).ln() / *rate)
            }
            RateGenerator::ConcurrencyBurst => Duration::ZERO,
        }
    }

    /// True when the generator anchors drops to a scheduling cursor rather
    /// than sleeping relative intervals (avoids sleep-granularity drift).
    #[must_use]
    pub fn uses_anchored_cursor(&self) -> bool {
        matches!(self, RateGenerator::Constant { .. })
    }
}

fn positive_rate(config: &TimingManagerConfig) -> Result<f64, Error> {
    match config.request_rate {
        Some(rate) if rate > 0.0 => Ok(rate),
        other => Err(Error::Configuration {
            details: format!(
                "request_rate must be set and positive for {:?} mode, got {other:?}",
                config.request_rate_mode
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poisson_intervals(rate: f64, seed: u64, n: usize) -> Vec<f64> {
        let mut generator = RateGenerator::from_config(&TimingManagerConfig {
            request_rate: Some(rate),
            request_rate_mode: RequestRateMode::Poisson,
            random_seed: Some(seed),
            ..TimingManagerConfig::default()
        })
        .expect("generator");
        (0..n).map(|_| generator.next_interval().as_secs_f64()).collect()
    }

    fn mean(values: &[f64]) -> f64 {
        values.iter().sum::<f64>() / values.len() as f64
    }

    fn std_dev(values: &[f64], mean: f64) -> f64 {
        (values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64).sqrt()
    }

    /// CDF of Poisson(lambda) at k, by iterative pmf summation.
    fn poisson_cdf(lambda: f64, k: u64) -> f64 {
        let mut pmf = (-lambda).exp();
        let mut cdf = pmf;
        for i in 1..=k {
            pmf *= lambda / i as f64;
            cdf += pmf;
        }
        cdf.min(1.0)
    }

    #[test]
    fn constant_mode_is_the_reciprocal_rate() {
        let mut generator = RateGenerator::from_config(&TimingManagerConfig {
            request_rate: Some(4.0),
            ..TimingManagerConfig::default()
        })
        .expect("generator");
        assert!(generator.uses_anchored_cursor());
        assert_eq!(generator.next_interval(), Duration::from_millis(250));
        assert_eq!(generator.next_interval(), Duration::from_millis(250));
    }

    #[test]
    fn burst_mode_rejects_a_rate_and_requires_concurrency() {
        let config = TimingManagerConfig {
            request_rate: Some(1.0),
            request_rate_mode: RequestRateMode::ConcurrencyBurst,
            concurrency: Some(4),
            ..TimingManagerConfig::default()
        };
        assert!(RateGenerator::from_config(&config).is_err());

        let config = TimingManagerConfig {
            request_rate: None,
            request_rate_mode: RequestRateMode::ConcurrencyBurst,
            concurrency: None,
            ..TimingManagerConfig::default()
        };
        assert!(RateGenerator::from_config(&config).is_err());

        let mut generator = RateGenerator::from_config(&TimingManagerConfig {
            request_rate: None,
            request_rate_mode: RequestRateMode::ConcurrencyBurst,
            concurrency: Some(4),
            ..TimingManagerConfig::default()
        })
        .expect("generator");
        assert_eq!(generator.next_interval(), Duration::ZERO);
    }

    #[test]
    fn poisson_empirical_mean_matches_the_rate() {
        // lambda = 20, N = 20_000, seed = 42: mean in [0.040, 0.060].
        let intervals = poisson_intervals(20.0, 42, 20_000);
        let m = mean(&intervals);
        assert!((0.040..=0.060).contains(&m), "mean {m} out of range");
    }

    #[test]
    fn poisson_interval_statistics() {
        let rate = 1000.0;
        let intervals = poisson_intervals(rate, 7, 25_000);
        let m = mean(&intervals);
        let expected = 1.0 / rate;

        // Empirical mean within 20% of 1/lambda.
        assert!((m - expected).abs() < 0.2 * expected, "mean {m}");

        // Coefficient of variation near 1 (exponential distribution).
        let cv = std_dev(&intervals, m) / m;
        assert!((cv - 1.0).abs() < 0.2, "cv {cv}");

        // Consecutive intervals nearly uncorrelated.
        let a = &intervals[..intervals.len() - 1];
        let b = &intervals[1..];
        let ma = mean(a);
        let mb = mean(b);
        let cov = a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| (x - ma) * (y - mb))
            .sum::<f64>()
            / a.len() as f64;
        let corr = cov / (std_dev(a, ma) * std_dev(b, mb));
        assert!(corr.abs() < 0.2, "corr {corr}");
    }

    #[test]
    fn poisson_bucketed_counts_pass_a_ks_test() {
        let rate = 1000.0;
        let bucket_sec = 0.5;
        let intervals = poisson_intervals(rate, 7, 25_000);

        // Assign events to 0.5s buckets by cumulative arrival time.
        let mut t = 0.0;
        let mut arrivals = Vec::with_capacity(intervals.len());
        for interval in &intervals {
            t += interval;
            arrivals.push(t);
        }
        let total = t;
        let bucket_count = (total / bucket_sec).floor() as usize;
        let mut counts = vec![0u64; bucket_count];
        for arrival in arrivals {
            let bucket = (arrival / bucket_sec) as usize;
            if bucket < bucket_count {
                counts[bucket] += 1;
            }
        }

        // KS distance between the empirical CDF of per-bucket counts and
        // Poisson(lambda * bucket_sec).
        counts.sort_unstable();
        let lambda = rate * bucket_sec;
        let n = counts.len() as f64;
        let mut ks: f64 = 0.0;
        for (i, count) in counts.iter().enumerate() {
            // Evaluate at the last index of each run of equal counts so
            // ties contribute their full empirical mass.
            if i + 1 < counts.len() && counts[i + 1] == *count {
                continue;
            }
            let empirical = (i + 1) as f64 / n;
            let theoretical = poisson_cdf(lambda, *count);
            ks = ks.max((empirical - theoretical).abs());
        }
        let threshold = 1.36 / n.sqrt();
        assert!(ks < threshold, "ks {ks} >= {threshold}");
    }

    #[test]
    fn seeded_poisson_is_deterministic() {
        assert_eq!(poisson_intervals(100.0, 99, 100), poisson_intervals(100.0, 99, 100));
    }
}
