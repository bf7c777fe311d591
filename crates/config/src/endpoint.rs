// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Target endpoint description and capability flags.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The kind of inference API being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointType {
    /// OpenAI-style `/v1/chat/completions`.
    Chat,
    /// OpenAI-style `/v1/completions`.
    Completions,
    /// OpenAI-style `/v1/embeddings`.
    Embeddings,
    /// NIM-style `/v1/ranking`.
    Rankings,
    /// HuggingFace-style `/generate`.
    HuggingfaceGenerate,
}

impl EndpointType {
    /// Default URL path for this endpoint type.
    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            EndpointType::Chat => "/v1/chat/completions",
            EndpointType::Completions => "/v1/completions",
            EndpointType::Embeddings => "/v1/embeddings",
            EndpointType::Rankings => "/v1/ranking",
            EndpointType::HuggingfaceGenerate => "/generate",
        }
    }

    /// Whether responses carry generated tokens (vs vectors or scores).
    #[must_use]
    pub fn produces_tokens(self) -> bool {
        matches!(
            self,
            EndpointType::Chat | EndpointType::Completions | EndpointType::HuggingfaceGenerate
        )
    }

    /// Whether the endpoint accepts audio inputs.
    #[must_use]
    pub fn supports_audio(self) -> bool {
        matches!(self, EndpointType::Chat)
    }

    /// Whether the endpoint accepts image inputs.
    #[must_use]
    pub fn supports_images(self) -> bool {
        matches!(self, EndpointType::Chat)
    }

    /// Whether the endpoint supports streamed responses.
    #[must_use]
    pub fn supports_streaming(self) -> bool {
        self.produces_tokens()
    }
}

impl fmt::Display for EndpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EndpointType::Chat => "chat",
            EndpointType::Completions => "completions",
            EndpointType::Embeddings => "embeddings",
            EndpointType::Rankings => "rankings",
            EndpointType::HuggingfaceGenerate => "huggingface_generate",
        };
        write!(f, "{label}")
    }
}

/// How workers pick a model for each request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSelectionStrategy {
    /// Cycle through `model_names` in order.
    #[default]
    RoundRobin,
    /// Pick uniformly at random per request.
    Random,
    /// Route by the request's modality, using the endpoint's capability set
    /// to decide which modality lanes exist.
    ModalityAware,
}

/// Description of the target server and API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Which API shape to drive.
    #[serde(rename = "type")]
    pub endpoint_type: EndpointType,
    /// Scheme, host, and port of the target, e.g. `http://localhost:8000`.
    pub base_url: String,
    /// Overrides the endpoint-type path when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_endpoint: Option<String>,
    /// Whether to request streamed responses.
    #[serde(default)]
    pub streaming: bool,
    /// Candidate model names; workers select one per request.
    pub model_names: Vec<String>,
    /// Strategy used to select among `model_names`.
    #[serde(default)]
    pub model_selection_strategy: ModelSelectionStrategy,
    /// Extra query parameters merged into the request URL.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub endpoint_params: BTreeMap<String, String>,
    /// Request timeout in seconds.
    #[serde(default = "default_request_timeout_sec")]
    pub request_timeout_sec: f64,
}

fn default_request_timeout_sec() -> f64 {
    600.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_matrix() {
        assert!(EndpointType::Chat.produces_tokens());
        assert!(EndpointType::Chat.supports_images());
        assert!(!EndpointType::Embeddings.produces_tokens());
        assert!(!EndpointType::Embeddings.supports_streaming());
        assert!(EndpointType::HuggingfaceGenerate.supports_streaming());
        assert!(!EndpointType::Rankings.supports_audio());
    }

    #[test]
    fn endpoint_paths() {
        assert_eq!(EndpointType::Chat.path(), "/v1/chat/completions");
        assert_eq!(EndpointType::Rankings.path(), "/v1/ranking");
        assert_eq!(EndpointType::HuggingfaceGenerate.path(), "/generate");
    }
}
