// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Endpoint-specific request payloads.

use aiperf_config::EndpointType;
use aiperf_messages::Turn;
use serde_json::{Value, json};

/// Builds the JSON body for one request against `endpoint_type`.
#[must_use]
pub fn build_payload(
    endpoint_type: EndpointType,
    turn: &Turn,
    model: &str,
    streaming: bool,
) -> Value {
    let text = turn.texts.join("\n");
    match endpoint_type {
        EndpointType::Chat => {
            let content = if turn.image_urls.is_empty() && turn.audio_urls.is_empty() {
                json!(text)
            } else {
                // Multimodal turns use the content-parts form.
                let mut parts = vec![json!({"type": "text", "text": text})];
                for url in &turn.image_urls {
                    parts.push(json!({"type": "image_url", "image_url": {"url": url}}));
                }
                for url in &turn.audio_urls {
                    parts.push(json!({"type": "input_audio", "input_audio": {"url": url}}));
                }
                json!(parts)
            };
            let mut payload = json!({
                "model": model,
                "messages": [{"role": "user", "content": content}],
                "stream": streaming,
            });
            if streaming {
                // Ask for a trailing usage chunk so token counts come from
                // the server rather than the estimator.
                payload["stream_options"] = json!({"include_usage": true});
            }
            if let Some(max_tokens) = turn.max_tokens {
                payload["max_tokens"] = json!(max_tokens);
            }
            payload
        }
        EndpointType::Completions => {
            let mut payload = json!({
                "model": model,
                "prompt": text,
                "stream": streaming,
            });
            if let Some(max_tokens) = turn.max_tokens {
                payload["max_tokens"] = json!(max_tokens);
            }
            payload
        }
        EndpointType::Embeddings => json!({
            "model": model,
            "input": turn.texts,
        }),
        EndpointType::Rankings => {
            let mut texts = turn.texts.iter();
            let query = texts.next().cloned().unwrap_or_default();
            let passages: Vec<Value> = texts.map(|t| json!({"text": t})).collect();
            json!({
                "model": model,
                "query": {"text": query},
                "passages": passages,
            })
        }
        EndpointType::HuggingfaceGenerate => {
            let mut parameters = json!({});
            if let Some(max_tokens) = turn.max_tokens {
                parameters["max_new_tokens"] = json!(max_tokens);
            }
            json!({
                "inputs": text,
                "parameters": parameters,
                "stream": streaming,
            })
        }
    }
}
