// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! One worker: pulls credits, fetches conversation turns, executes HTTP
//! requests, and emits raw records and credit returns.

use crate::builder::build_payload;
use crate::http::{HttpCallOutcome, HttpExecutor, HttpRequestSpec};
use crate::model::ModelSelector;
use crate::parser::approx_token_count;
use crate::url::build_url;
use aiperf_config::UserConfig;
use aiperf_fabric::{PubClient, PubHandle, PullClient, PushClient, RequestClient};
use aiperf_messages::time::wall_clock_ns;
use aiperf_messages::{
    Conversation, ConversationRequestMessage, CreditDropMessage, CreditReturnMessage,
    ErrorMessage, Message, MessageHeader, ParsedInferenceResultsMessage, ParsedResponse,
    ParsedResponseRecord, RequestErrorInfo, RequestRecord, ServiceType, Turn,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A single worker in the pool.
pub struct Worker {
    worker_id: String,
    user_config: UserConfig,
    credits: PullClient,
    dataset: RequestClient,
    records: PushClient,
    credit_returns: PubClient,
    /// Event bus handle borrowed from the worker manager, for worker-level
    /// error reports.
    events: PubHandle,
    http: HttpExecutor,
    selector: ModelSelector,
    request_timeout: Duration,
    /// Next turn to execute per conversation, bounded by its turn count.
    turn_cursor: HashMap<String, u32>,
}

impl Worker {
    /// Builds one worker with its own sockets and HTTP transport.
    pub async fn connect(
        worker_id: String,
        user_config: UserConfig,
        fabric: &aiperf_fabric::Fabric,
        events: PubHandle,
        cancel: CancellationToken,
    ) -> Result<Self, crate::error::Error> {
        let credits = fabric.credit_drop_consumer(cancel.clone()).await?;
        let dataset = fabric.dataset_requester(cancel.clone()).await?;
        let records = fabric.raw_inference_producer(cancel.clone()).await?;
        let credit_returns = fabric.credit_return_publisher(cancel.clone()).await?;
        let http = HttpExecutor::new(user_config.endpoint.clone())?;
        let selector = ModelSelector::new(&user_config.endpoint, user_config.input.random_seed);
        let request_timeout = fabric.config().request_reply_timeout;
        Ok(Self {
            worker_id,
            user_config,
            credits,
            dataset,
            records,
            credit_returns,
            events,
            http,
            selector,
            request_timeout,
            turn_cursor: HashMap::new(),
        })
    }

    /// Consumes credits until cancelled or the credit socket closes.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = self.credits.recv() => message,
            };
            let Some(message) = message else { break };
            let Message::CreditDrop(credit) = message else {
                debug!(worker_id = %self.worker_id, "ignoring non-credit message");
                continue;
            };
            self.handle_credit(credit).await;
        }
        debug!(worker_id = %self.worker_id, "worker loop exited");
        self.credits.stop().await;
        self.dataset.stop().await;
        self.records.stop().await;
        self.credit_returns.stop().await;
    }

    async fn handle_credit(&mut self, credit: CreditDropMessage) {
        let credit_drop_latency = wall_clock_ns().saturating_sub(credit.header.timestamp_ns);

        let record = match self.fetch_turn(credit.conversation_id.clone()).await {
            Ok((conversation_id, turn_index, turn)) => {
                self.execute_turn(&credit, conversation_id, turn_index, &turn, credit_drop_latency)
                    .await
            }
            Err(error) => {
                // The request never launched; emit an error record so the
                // credit is still accounted for.
                let now_perf = aiperf_messages::time::monotonic_ns();
                ParsedResponseRecord {
                    request: RequestRecord {
                        conversation_id: credit.conversation_id.clone().unwrap_or_default(),
                        turn_index: 0,
                        model_name: String::new(),
                        worker_id: self.worker_id.clone(),
                        x_request_id: None,
                        start_perf_ns: now_perf,
                        timestamp_ns: wall_clock_ns(),
                        end_perf_ns: now_perf,
                        recv_start_perf_ns: None,
                        credit_drop_latency: Some(credit_drop_latency),
                        credit_phase: credit.phase,
                        error: Some(error),
                    },
                    responses: Vec::new(),
                    input_token_count: None,
                    output_token_count: None,
                    reasoning_token_count: None,
                }
            }
        };

        // Push the record first so in-flight accounting stays accurate; the
        // credit return below is what releases the concurrency token.
        let push_result = self
            .records
            .push(&Message::ParsedInferenceResults(ParsedInferenceResultsMessage {
                header: MessageHeader::new(&self.worker_id),
                record,
            }))
            .await;
        if let Err(e) = push_result {
            // Retries are exhausted at this point; the record is lost, so
            // surface a worker-level error record and still return the
            // credit below.
            warn!(worker_id = %self.worker_id, error = %e, "record push failed; credit still returned");
            self.publish_worker_error(format!("record push failed: {e}")).await;
        }

        let return_result = self
            .credit_returns
            .publish(&Message::CreditReturn(CreditReturnMessage {
                header: MessageHeader::new(&self.worker_id),
                phase: credit.phase,
            }))
            .await;
        if let Err(e) = return_result {
            warn!(worker_id = %self.worker_id, error = %e, "credit return failed");
        }
    }

    /// Reports a worker-level failure on the event bus. The system
    /// controller aggregates these into the run's exit errors.
    async fn publish_worker_error(&self, message: String) {
        let report = Message::Error(ErrorMessage {
            header: MessageHeader::new(&self.worker_id),
            service_type: ServiceType::WorkerManager,
            error: RequestErrorInfo { error_type: "worker".to_string(), code: None, message },
        });
        if let Err(e) = self.events.publish(&report).await {
            warn!(worker_id = %self.worker_id, error = %e, "failed to report worker error");
        }
    }

    /// Fetches the conversation and picks the turn to execute.
    async fn fetch_turn(
        &mut self,
        conversation_id: Option<String>,
    ) -> Result<(String, u32, Turn), RequestErrorInfo> {
        let reply = self
            .dataset
            .request(
                Message::ConversationRequest(ConversationRequestMessage {
                    header: MessageHeader::with_request_id(&self.worker_id),
                    conversation_id,
                }),
                self.request_timeout,
            )
            .await
            .map_err(|e| RequestErrorInfo {
                error_type: "worker".to_string(),
                code: None,
                message: format!("conversation fetch failed: {e}"),
            })?;
        let Message::ConversationResponse(response) = reply else {
            return Err(RequestErrorInfo {
                error_type: "worker".to_string(),
                code: None,
                message: "unexpected reply to conversation request".to_string(),
            });
        };
        let Conversation { conversation_id, turns } = response.conversation;
        if turns.is_empty() {
            return Err(RequestErrorInfo {
                error_type: "worker".to_string(),
                code: None,
                message: format!("conversation `{conversation_id}` has no turns"),
            });
        }

        let last_turn = (turns.len() - 1) as u32;
        let cursor = self.turn_cursor.entry(conversation_id.clone()).or_insert(0);
        let turn_index = (*cursor).min(last_turn);
        *cursor = (turn_index + 1).min(last_turn);
        let turn = turns[turn_index as usize].clone();
        Ok((conversation_id, turn_index, turn))
    }

    async fn execute_turn(
        &mut self,
        credit: &CreditDropMessage,
        conversation_id: String,
        turn_index: u32,
        turn: &Turn,
        credit_drop_latency: u64,
    ) -> ParsedResponseRecord {
        let endpoint = &self.user_config.endpoint;
        let model = self.selector.select(turn);
        let payload = build_payload(endpoint.endpoint_type, turn, &model, endpoint.streaming);
        let x_request_id = uuid::Uuid::new_v4().to_string();
        let spec = HttpRequestSpec {
            url: build_url(endpoint),
            payload,
            x_request_id: Some(x_request_id.clone()),
            x_correlation_id: credit.header.x_correlation_id.clone(),
        };

        // Pre-scheduled credits carry a wall-clock target send time.
        if let Some(target_ns) = credit.credit_drop_ns {
            let now = wall_clock_ns();
            if target_ns > now {
                tokio::time::sleep(Duration::from_nanos(target_ns - now)).await;
            }
        }

        let cancel_after_ns = if credit.should_cancel { credit.cancel_after_ns } else { None };
        let outcome = self.http.execute(spec, cancel_after_ns).await;
        self.assemble_record(
            credit,
            conversation_id,
            turn_index,
            turn,
            model,
            x_request_id,
            credit_drop_latency,
            outcome,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble_record(
        &self,
        credit: &CreditDropMessage,
        conversation_id: String,
        turn_index: u32,
        turn: &Turn,
        model_name: String,
        x_request_id: String,
        credit_drop_latency: u64,
        outcome: HttpCallOutcome,
    ) -> ParsedResponseRecord {
        let (input_token_count, output_token_count, reasoning_token_count) = token_counts(
            &outcome.responses,
            turn,
            self.user_config.endpoint.endpoint_type.produces_tokens(),
        );

        ParsedResponseRecord {
            request: RequestRecord {
                conversation_id,
                turn_index,
                model_name,
                worker_id: self.worker_id.clone(),
                x_request_id: Some(x_request_id),
                start_perf_ns: outcome.start_perf_ns,
                timestamp_ns: outcome.timestamp_ns,
                end_perf_ns: outcome.end_perf_ns,
                recv_start_perf_ns: outcome.recv_start_perf_ns,
                credit_drop_latency: Some(credit_drop_latency),
                credit_phase: credit.phase,
                error: outcome.error,
            },
            responses: outcome.responses,
            input_token_count,
            output_token_count,
            reasoning_token_count,
        }
    }
}

/// Folds usage blocks across chunks; the estimator fills gaps for
/// token-producing endpoints when the server reported nothing.
fn token_counts(
    responses: &[ParsedResponse],
    turn: &Turn,
    produces_tokens: bool,
) -> (Option<u64>, Option<u64>, Option<u64>) {
    let mut input = None;
    let mut output = None;
    let mut reasoning = None;
    for response in responses {
        if let Some(usage) = &response.usage {
            input = usage.input_tokens.or(input);
            output = usage.output_tokens.or(output);
            reasoning = usage.reasoning_tokens.or(reasoning);
        }
    }
    if input.is_none() {
        let prompt: u64 = turn.texts.iter().map(|t| approx_token_count(t)).sum();
        if prompt > 0 {
            input = Some(prompt);
        }
    }
    if output.is_none() && produces_tokens {
        let generated: u64 = responses
            .iter()
            .filter_map(|r| r.data.as_ref())
            .filter_map(|d| d.text.as_deref())
            .map(approx_token_count)
            .sum();
        if generated > 0 {
            output = Some(generated);
        }
    }
    (input, output, reasoning)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiperf_messages::{ResponseData, TokenUsage};

    fn content(perf_ns: u64, text: &str) -> ParsedResponse {
        ParsedResponse {
            perf_ns,
            data: Some(ResponseData { text: Some(text.to_string()), reasoning: None }),
            usage: None,
        }
    }

    #[test]
    fn usage_wins_over_the_estimator() {
        let responses = vec![
            content(1, "ignored words here"),
            ParsedResponse {
                perf_ns: 2,
                data: None,
                usage: Some(TokenUsage {
                    input_tokens: Some(11),
                    output_tokens: Some(7),
                    reasoning_tokens: None,
                }),
            },
        ];
        let turn = Turn::from_text("two words");
        let (input, output, reasoning) = token_counts(&responses, &turn, true);
        assert_eq!(input, Some(11));
        assert_eq!(output, Some(7));
        assert_eq!(reasoning, None);
    }

    #[test]
    fn estimator_fills_in_when_usage_is_absent() {
        let responses = vec![content(1, "three whole words")];
        let turn = Turn::from_text("a four word prompt");
        let (input, output, _) = token_counts(&responses, &turn, true);
        assert_eq!(input, Some(4));
        assert_eq!(output, Some(3));
    }

    #[test]
    fn non_token_endpoints_get_no_output_estimate() {
        let responses = vec![ParsedResponse {
            perf_ns: 1,
            data: Some(ResponseData::default()),
            usage: Some(TokenUsage {
                input_tokens: Some(5),
                output_tokens: None,
                reasoning_tokens: None,
            }),
        }];
        let turn = Turn::from_text("prompt");
        let (input, output, _) = token_counts(&responses, &turn, false);
        assert_eq!(input, Some(5));
        assert_eq!(output, None);
    }
}
