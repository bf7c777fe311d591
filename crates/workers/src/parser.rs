// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Endpoint-specific response parsing: SSE stream splitting, chunk and
//! unary body parsing, and usage extraction.

use aiperf_config::EndpointType;
use aiperf_messages::{ResponseData, TokenUsage};
use serde_json::Value;

/// Parsed view of one response chunk or body.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ChunkParse {
    /// Parsed content; `None` marks a usage-only chunk.
    pub data: Option<ResponseData>,
    /// Usage block carried by the chunk, if any.
    pub usage: Option<TokenUsage>,
}

/// Incremental splitter for `text/event-stream` bodies.
///
/// Feed raw bytes as they arrive; completed `data:` payloads come back in
/// order. The terminal `[DONE]` marker is swallowed.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: String,
}

impl SseLineBuffer {
    /// New empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes and returns any completed data payloads.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        let mut payloads = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim();
            let Some(data) = line.strip_prefix("data:") else { continue };
            let data = data.trim();
            if data.is_empty() || data == "[DONE]" {
                continue;
            }
            payloads.push(data.to_string());
        }
        payloads
    }
}

/// Parses one streamed chunk payload for `endpoint_type`.
///
/// Returns `None` when the payload is not valid JSON.
#[must_use]
pub fn parse_stream_chunk(endpoint_type: EndpointType, payload: &str) -> Option<ChunkParse> {
    let value: Value = serde_json::from_str(payload).ok()?;
    let usage = extract_usage(&value);
    let data = match endpoint_type {
        EndpointType::Chat => {
            let delta = &value["choices"][0]["delta"];
            response_data(
                delta["content"].as_str(),
                delta["reasoning_content"].as_str(),
            )
        }
        EndpointType::Completions => {
            response_data(value["choices"][0]["text"].as_str(), None)
        }
        EndpointType::HuggingfaceGenerate => {
            response_data(value["token"]["text"].as_str(), None)
        }
        // Non-streaming endpoints never produce chunks.
        EndpointType::Embeddings | EndpointType::Rankings => None,
    };
    Some(ChunkParse { data, usage })
}

/// Parses a complete (non-streamed) response body for `endpoint_type`.
#[must_use]
pub fn parse_unary_body(endpoint_type: EndpointType, body: &[u8]) -> ChunkParse {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return ChunkParse::default();
    };
    let usage = extract_usage(&value);
    let data = match endpoint_type {
        EndpointType::Chat => {
            let message = &value["choices"][0]["message"];
            response_data(
                message["content"].as_str(),
                message["reasoning_content"].as_str(),
            )
        }
        EndpointType::Completions => response_data(value["choices"][0]["text"].as_str(), None),
        EndpointType::HuggingfaceGenerate => {
            let text = value["generated_text"]
                .as_str()
                .or_else(|| value[0]["generated_text"].as_str());
            response_data(text, None)
        }
        EndpointType::Embeddings => {
            // Vector payloads carry no text; an empty data block still marks
            // the response as content-bearing.
            value["data"].as_array().filter(|a| !a.is_empty()).map(|_| ResponseData::default())
        }
        EndpointType::Rankings => value
            .get("rankings")
            .and_then(Value::as_array)
            .filter(|a| !a.is_empty())
            .map(|_| ResponseData::default()),
    };
    ChunkParse { data, usage }
}

fn response_data(text: Option<&str>, reasoning: Option<&str>) -> Option<ResponseData> {
    let text = text.filter(|t| !t.is_empty()).map(str::to_string);
    let reasoning = reasoning.filter(|t| !t.is_empty()).map(str::to_string);
    if text.is_none() && reasoning.is_none() {
        return None;
    }
    Some(ResponseData { text, reasoning })
}

/// Extracts a usage block from an OpenAI-shaped response value.
#[must_use]
pub fn extract_usage(value: &Value) -> Option<TokenUsage> {
    let usage = value.get("usage")?;
    if usage.is_null() {
        return None;
    }
    let input_tokens = usage["prompt_tokens"].as_u64();
    let output_tokens = usage["completion_tokens"].as_u64();
    let reasoning_tokens = usage["completion_tokens_details"]["reasoning_tokens"].as_u64();
    if input_tokens.is_none() && output_tokens.is_none() && reasoning_tokens.is_none() {
        return None;
    }
    Some(TokenUsage { input_tokens, output_tokens, reasoning_tokens })
}

/// Whitespace-split token estimate, used only when the endpoint reports no
/// usage and no tokenizer is configured.
#[must_use]
pub fn approx_token_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sse_buffer_handles_partial_lines() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.feed(b"data: {\"a\"").is_empty());
        let payloads = buffer.feed(b": 1}\n\ndata: [DONE]\n");
        assert_eq!(payloads, vec!["{\"a\": 1}".to_string()]);
    }

    #[test]
    fn sse_buffer_splits_multiple_events() {
        let mut buffer = SseLineBuffer::new();
        let payloads = buffer.feed(b"data: one\ndata: two\n: comment\n");
        assert_eq!(payloads, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn chat_chunk_with_content() {
        let parse = parse_stream_chunk(
            EndpointType::Chat,
            r#"{"choices":[{"delta":{"content":"hel"}}]}"#,
        )
        .expect("parse");
        assert_eq!(parse.data.expect("content").text.as_deref(), Some("hel"));
        assert_eq!(parse.usage, None);
    }

    #[test]
    fn chat_usage_only_chunk_is_not_content() {
        let parse = parse_stream_chunk(
            EndpointType::Chat,
            r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5}}"#,
        )
        .expect("parse");
        assert_eq!(parse.data, None);
        let usage = parse.usage.expect("usage");
        assert_eq!(usage.input_tokens, Some(10));
        assert_eq!(usage.output_tokens, Some(5));
    }

    #[test]
    fn reasoning_deltas_are_content() {
        let parse = parse_stream_chunk(
            EndpointType::Chat,
            r#"{"choices":[{"delta":{"reasoning_content":"because"}}]}"#,
        )
        .expect("parse");
        let data = parse.data.expect("content");
        assert_eq!(data.text, None);
        assert_eq!(data.reasoning.as_deref(), Some("because"));
    }

    #[test]
    fn empty_delta_is_not_content() {
        let parse = parse_stream_chunk(
            EndpointType::Chat,
            r#"{"choices":[{"delta":{"content":""}}]}"#,
        )
        .expect("parse");
        assert_eq!(parse.data, None);
    }

    #[test]
    fn unary_chat_body() {
        let parse = parse_unary_body(
            EndpointType::Chat,
            br#"{"choices":[{"message":{"content":"full reply"}}],"usage":{"prompt_tokens":7,"completion_tokens":3,"completion_tokens_details":{"reasoning_tokens":1}}}"#,
        );
        assert_eq!(parse.data.expect("content").text.as_deref(), Some("full reply"));
        let usage = parse.usage.expect("usage");
        assert_eq!(usage.input_tokens, Some(7));
        assert_eq!(usage.output_tokens, Some(3));
        assert_eq!(usage.reasoning_tokens, Some(1));
    }

    #[test]
    fn unary_embeddings_body_is_content_without_text() {
        let parse = parse_unary_body(
            EndpointType::Embeddings,
            br#"{"data":[{"embedding":[0.1,0.2]}],"usage":{"prompt_tokens":4}}"#,
        );
        let data = parse.data.expect("content marker");
        assert_eq!(data.text, None);
        assert_eq!(parse.usage.expect("usage").input_tokens, Some(4));
    }

    #[test]
    fn generate_stream_and_unary_bodies() {
        let parse = parse_stream_chunk(
            EndpointType::HuggingfaceGenerate,
            r#"{"token":{"text":"tok"}}"#,
        )
        .expect("parse");
        assert_eq!(parse.data.expect("content").text.as_deref(), Some("tok"));

        let parse = parse_unary_body(
            EndpointType::HuggingfaceGenerate,
            br#"{"generated_text":"the whole thing"}"#,
        );
        assert_eq!(parse.data.expect("content").text.as_deref(), Some("the whole thing"));
    }

    #[test]
    fn token_estimation_splits_on_whitespace() {
        assert_eq!(approx_token_count("one two  three\nfour"), 4);
        assert_eq!(approx_token_count(""), 0);
    }
}
