// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! The worker's HTTP transport: timed execution of one request, streaming
//! or unary, with optional mid-flight cancellation.

use crate::error::Error;
use crate::parser::{SseLineBuffer, parse_stream_chunk, parse_unary_body};
use aiperf_config::EndpointConfig;
use aiperf_messages::time::{monotonic_ns, wall_clock_ns};
use aiperf_messages::{ParsedResponse, RequestErrorInfo};
use futures::StreamExt;
use serde_json::Value;
use std::time::Duration;

/// One request to execute.
#[derive(Debug, Clone)]
pub struct HttpRequestSpec {
    /// Fully-assembled request URL.
    pub url: String,
    /// JSON body.
    pub payload: Value,
    /// `X-Request-ID` header value.
    pub x_request_id: Option<String>,
    /// `X-Correlation-ID` header value.
    pub x_correlation_id: Option<String>,
}

/// Timing and parsed responses for one completed exchange.
#[derive(Debug)]
pub struct HttpCallOutcome {
    /// Monotonic timestamp immediately before the call.
    pub start_perf_ns: u64,
    /// Wall-clock timestamp immediately before the call.
    pub timestamp_ns: u64,
    /// Monotonic timestamp when the exchange finished or aborted.
    pub end_perf_ns: u64,
    /// Monotonic timestamp when response headers arrived.
    pub recv_start_perf_ns: Option<u64>,
    /// Parsed response chunks in arrival order.
    pub responses: Vec<ParsedResponse>,
    /// Failure classification; `Some` makes the record an error record.
    pub error: Option<RequestErrorInfo>,
}

/// Executes requests for one endpoint configuration.
///
/// Owned by exactly one worker; workers never share transports.
#[derive(Debug)]
pub struct HttpExecutor {
    client: reqwest::Client,
    endpoint: EndpointConfig,
}

impl HttpExecutor {
    /// Builds the transport for `endpoint`.
    pub fn new(endpoint: EndpointConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("aiperf/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs_f64(endpoint.request_timeout_sec))
            .build()
            .map_err(|e| Error::HttpClient { details: e.to_string() })?;
        Ok(Self { client, endpoint })
    }

    /// Performs one exchange, aborting after `cancel_after_ns` when set.
    ///
    /// A cancelled request still yields an outcome with the responses
    /// received so far and `error.type = "cancelled"`, so it can be
    /// attributed to the right phase.
    pub async fn execute(
        &self,
        spec: HttpRequestSpec,
        cancel_after_ns: Option<u64>,
    ) -> HttpCallOutcome {
        let start_perf_ns = monotonic_ns();
        let timestamp_ns = wall_clock_ns();
        let mut responses = Vec::new();
        let mut recv_start_perf_ns = None;

        let error = {
            let exchange = self.do_exchange(&spec, &mut responses, &mut recv_start_perf_ns);
            tokio::pin!(exchange);
            match cancel_after_ns {
                Some(delay_ns) => {
                    tokio::select! {
                        result = &mut exchange => result.err(),
                        _ = tokio::time::sleep(Duration::from_nanos(delay_ns)) => {
                            Some(RequestErrorInfo::cancelled())
                        }
                    }
                }
                None => exchange.await.err(),
            }
        };

        HttpCallOutcome {
            start_perf_ns,
            timestamp_ns,
            end_perf_ns: monotonic_ns(),
            recv_start_perf_ns,
            responses,
            error,
        }
    }

    async fn do_exchange(
        &self,
        spec: &HttpRequestSpec,
        responses: &mut Vec<ParsedResponse>,
        recv_start_perf_ns: &mut Option<u64>,
    ) -> Result<(), RequestErrorInfo> {
        let mut request = self.client.post(&spec.url).json(&spec.payload);
        if let Some(request_id) = &spec.x_request_id {
            request = request.header("X-Request-ID", request_id);
        }
        if let Some(correlation_id) = &spec.x_correlation_id {
            request = request.header("X-Correlation-ID", correlation_id);
        }

        let response = request.send().await.map_err(classify_reqwest_error)?;
        *recv_start_perf_ns = Some(monotonic_ns());

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RequestErrorInfo {
                error_type: "http".to_string(),
                code: Some(status.as_u16()),
                message: truncate(&body, 512),
            });
        }

        let streaming =
            self.endpoint.streaming && self.endpoint.endpoint_type.supports_streaming();
        if streaming {
            let mut sse = SseLineBuffer::new();
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(classify_reqwest_error)?;
                let perf_ns = monotonic_ns();
                for payload in sse.feed(&chunk) {
                    let Some(parse) =
                        parse_stream_chunk(self.endpoint.endpoint_type, &payload)
                    else {
                        continue;
                    };
                    // Chunks carrying neither content nor usage (role-only
                    // deltas) are dropped from the record.
                    if parse.data.is_none() && parse.usage.is_none() {
                        continue;
                    }
                    responses.push(ParsedResponse {
                        perf_ns,
                        data: parse.data,
                        usage: parse.usage,
                    });
                }
            }
        } else {
            let body = response.bytes().await.map_err(classify_reqwest_error)?;
            let perf_ns = monotonic_ns();
            let parse = parse_unary_body(self.endpoint.endpoint_type, &body);
            responses.push(ParsedResponse { perf_ns, data: parse.data, usage: parse.usage });
        }
        Ok(())
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> RequestErrorInfo {
    let error_type = if error.is_timeout() { "timeout" } else { "transport" };
    RequestErrorInfo {
        error_type: error_type.to_string(),
        code: error.status().map(|s| s.as_u16()),
        message: error.to_string(),
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        text.to_string()
    } else {
        let mut end = limit;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiperf_config::{EndpointType, ModelSelectionStrategy};
    use serde_json::json;
    use std::collections::BTreeMap;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn endpoint(base_url: &str, endpoint_type: EndpointType, streaming: bool) -> EndpointConfig {
        EndpointConfig {
            endpoint_type,
            base_url: base_url.to_string(),
            custom_endpoint: None,
            streaming,
            model_names: vec!["m".to_string()],
            model_selection_strategy: ModelSelectionStrategy::RoundRobin,
            endpoint_params: BTreeMap::new(),
            request_timeout_sec: 30.0,
        }
    }

    fn spec(url: String) -> HttpRequestSpec {
        HttpRequestSpec {
            url,
            payload: json!({"model": "m"}),
            x_request_id: Some("req-1".to_string()),
            x_correlation_id: None,
        }
    }

    #[tokio::test]
    async fn unary_success_parses_content_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("X-Request-ID", "req-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "hello"}}],
                "usage": {"prompt_tokens": 4, "completion_tokens": 2},
            })))
            .mount(&server)
            .await;

        let executor =
            HttpExecutor::new(endpoint(&server.uri(), EndpointType::Chat, false)).expect("client");
        let outcome = executor
            .execute(spec(format!("{}/v1/chat/completions", server.uri())), None)
            .await;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.responses.len(), 1);
        assert!(outcome.responses[0].is_content());
        assert_eq!(outcome.responses[0].usage.expect("usage").input_tokens, Some(4));
        assert!(outcome.recv_start_perf_ns.is_some());
        assert!(outcome.end_perf_ns >= outcome.start_perf_ns);
    }

    #[tokio::test]
    async fn streaming_body_yields_one_response_per_content_chunk() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"he\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":4,\"completion_tokens\":2}}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let executor =
            HttpExecutor::new(endpoint(&server.uri(), EndpointType::Chat, true)).expect("client");
        let outcome = executor
            .execute(spec(format!("{}/v1/chat/completions", server.uri())), None)
            .await;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.responses.len(), 3);
        assert_eq!(outcome.responses.iter().filter(|r| r.is_content()).count(), 2);
        let usage_chunk = outcome.responses.last().expect("usage chunk");
        assert!(!usage_chunk.is_content());
        assert_eq!(usage_chunk.usage.expect("usage").output_tokens, Some(2));
    }

    #[tokio::test]
    async fn http_failures_become_error_records() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let executor =
            HttpExecutor::new(endpoint(&server.uri(), EndpointType::Chat, false)).expect("client");
        let outcome = executor.execute(spec(server.uri()), None).await;

        let error = outcome.error.expect("error");
        assert_eq!(error.error_type, "http");
        assert_eq!(error.code, Some(503));
        assert!(error.message.contains("overloaded"));
    }

    #[tokio::test]
    async fn cancellation_aborts_and_marks_the_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(5))
                    .set_body_json(json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let executor =
            HttpExecutor::new(endpoint(&server.uri(), EndpointType::Chat, false)).expect("client");
        let started = std::time::Instant::now();
        let outcome = executor.execute(spec(server.uri()), Some(50_000_000)).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        let error = outcome.error.expect("error");
        assert_eq!(error.error_type, "cancelled");
        assert!(outcome.responses.is_empty());
    }

    #[tokio::test]
    async fn connection_refused_is_a_transport_error() {
        let executor = HttpExecutor::new(endpoint(
            "http://127.0.0.1:9",
            EndpointType::Chat,
            false,
        ))
        .expect("client");
        let outcome = executor.execute(spec("http://127.0.0.1:9/v1/x".to_string()), None).await;
        let error = outcome.error.expect("error");
        assert_eq!(error.error_type, "transport");
    }
}
