// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Typed configuration consumed by the AIPerf core.
//!
//! CLI parsing and YAML loading live outside the core; this crate defines the
//! `UserConfig` shape they produce, plus fleet-wide `ServiceConfig` settings,
//! and validates that the combination is executable before any service spawns.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub mod endpoint;
pub mod error;
pub mod input;
pub mod loadgen;
pub mod output;
pub mod service;

pub use endpoint::{EndpointConfig, EndpointType, ModelSelectionStrategy};
pub use error::Error;
pub use input::InputConfig;
pub use loadgen::{LoadGenConfig, RequestRateMode, TimingMode};
pub use output::{ExportLevel, OutputConfig};
pub use service::{ServiceConfig, TransportConfig};

/// The complete user-facing configuration for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    /// Target endpoint description.
    pub endpoint: EndpointConfig,
    /// Load generation settings.
    #[serde(default)]
    pub loadgen: LoadGenConfig,
    /// Input dataset settings.
    #[serde(default)]
    pub input: InputConfig,
    /// Artifact output settings.
    #[serde(default)]
    pub output: OutputConfig,
    /// Goodput SLO thresholds keyed by metric tag, in display units.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub goodput_slos: BTreeMap<String, f64>,
}

impl UserConfig {
    /// Loads and validates a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| Error::FileReadError {
            path: path.display().to_string(),
            details: e.to_string(),
        })?;
        let config: UserConfig =
            serde_json::from_str(&contents).map_err(|e| Error::DeserializationError {
                path: path.display().to_string(),
                details: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects contradictory or incomplete settings.
    ///
    /// Called once at startup; failures are fatal.
    pub fn validate(&self) -> Result<(), Error> {
        if self.endpoint.model_names.is_empty() {
            return Err(Error::MissingSetting {
                details: "endpoint.model_names must contain at least one model".to_string(),
            });
        }
        if self.endpoint.streaming && !self.endpoint.endpoint_type.supports_streaming() {
            return Err(Error::ValidationError {
                details: format!(
                    "endpoint type `{}` does not support streaming",
                    self.endpoint.endpoint_type
                ),
            });
        }

        let lg = &self.loadgen;
        match lg.request_rate_mode {
            RequestRateMode::ConcurrencyBurst => {
                if lg.request_rate.is_some() {
                    return Err(Error::ValidationError {
                        details: "request_rate must be unset in concurrency_burst mode"
                            .to_string(),
                    });
                }
                if matches!(lg.timing_mode, TimingMode::RequestRate) && lg.concurrency.is_none() {
                    return Err(Error::MissingSetting {
                        details: "concurrency_burst mode requires loadgen.concurrency"
                            .to_string(),
                    });
                }
            }
            RequestRateMode::Constant | RequestRateMode::Poisson => {
                if matches!(lg.timing_mode, TimingMode::RequestRate) {
                    match lg.request_rate {
                        Some(rate) if rate > 0.0 => {}
                        Some(rate) => {
                            return Err(Error::ValidationError {
                                details: format!("request_rate must be positive, got {rate}"),
                            });
                        }
                        None => {
                            return Err(Error::MissingSetting {
                                details: format!(
                                    "request_rate is required for {:?} rate mode",
                                    lg.request_rate_mode
                                ),
                            });
                        }
                    }
                }
            }
        }

        if matches!(lg.timing_mode, TimingMode::FixedSchedule) && self.input.file.is_none() {
            return Err(Error::MissingSetting {
                details: "fixed_schedule mode requires input.file".to_string(),
            });
        }
        if lg.benchmark_duration.is_none() && lg.request_count == 0 {
            return Err(Error::ValidationError {
                details: "request_count must be positive when benchmark_duration is unset"
                    .to_string(),
            });
        }
        if let Some(duration) = lg.benchmark_duration
            && duration <= 0.0
        {
            return Err(Error::ValidationError {
                details: format!("benchmark_duration must be positive, got {duration}"),
            });
        }
        if !(0.0..=100.0).contains(&lg.request_cancellation_rate) {
            return Err(Error::ValidationError {
                details: format!(
                    "request_cancellation_rate must be within 0-100, got {}",
                    lg.request_cancellation_rate
                ),
            });
        }
        if let Some(concurrency) = lg.concurrency
            && concurrency == 0
        {
            return Err(Error::ValidationError {
                details: "concurrency must be positive when set".to_string(),
            });
        }

        for (tag, threshold) in &self.goodput_slos {
            if !threshold.is_finite() {
                return Err(Error::ValidationError {
                    details: format!("goodput SLO for `{tag}` must be finite, got {threshold}"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn base_config() -> UserConfig {
        UserConfig {
            endpoint: EndpointConfig {
                endpoint_type: EndpointType::Chat,
                base_url: "http://localhost:8000".to_string(),
                custom_endpoint: None,
                streaming: true,
                model_names: vec!["model-a".to_string()],
                model_selection_strategy: ModelSelectionStrategy::RoundRobin,
                endpoint_params: BTreeMap::new(),
                request_timeout_sec: 600.0,
            },
            loadgen: LoadGenConfig { request_rate: Some(10.0), ..LoadGenConfig::default() },
            input: InputConfig::default(),
            output: OutputConfig::default(),
            goodput_slos: BTreeMap::new(),
        }
    }

    #[test]
    fn valid_config_passes() {
        base_config().validate().expect("valid config");
    }

    #[test]
    fn burst_mode_rejects_request_rate() {
        let mut config = base_config();
        config.loadgen.request_rate_mode = RequestRateMode::ConcurrencyBurst;
        config.loadgen.concurrency = Some(8);
        assert!(config.validate().is_err());
        config.loadgen.request_rate = None;
        config.validate().expect("burst without rate");
    }

    #[test]
    fn rate_modes_require_a_positive_rate() {
        let mut config = base_config();
        config.loadgen.request_rate = None;
        assert!(config.validate().is_err());
        config.loadgen.request_rate = Some(0.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn fixed_schedule_requires_an_input_file() {
        let mut config = base_config();
        config.loadgen.timing_mode = TimingMode::FixedSchedule;
        assert!(config.validate().is_err());
        config.input.file = Some("trace.jsonl".to_string());
        config.validate().expect("schedule with file");
    }

    #[test]
    fn streaming_embeddings_is_contradictory() {
        let mut config = base_config();
        config.endpoint.endpoint_type = EndpointType::Embeddings;
        assert!(config.validate().is_err());
    }

    #[test]
    fn cancellation_rate_bounds() {
        let mut config = base_config();
        config.loadgen.request_cancellation_rate = 150.0;
        assert!(config.validate().is_err());
        config.loadgen.request_cancellation_rate = 100.0;
        config.validate().expect("100% cancellation is allowed");
    }

    #[test]
    fn loads_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        let json = serde_json::json!({
            "endpoint": {
                "type": "completions",
                "base_url": "http://localhost:9000",
                "streaming": false,
                "model_names": ["m"],
            },
            "loadgen": {"request_rate": 5.0},
        });
        file.write_all(json.to_string().as_bytes()).expect("write");
        let config = UserConfig::from_json_file(file.path()).expect("load");
        assert_eq!(config.endpoint.endpoint_type, EndpointType::Completions);
        assert_eq!(config.loadgen.request_rate, Some(5.0));
    }
}
