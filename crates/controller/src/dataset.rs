// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! A minimal dataset provider service.
//!
//! Dataset construction (synthetic prompt generation, tokenization, media)
//! lives outside the core; this provider serves whatever the input file
//! contains, falling back to a small synthetic pool, over REQ/REP. The
//! conversation map is immutable after load, so serving is contention-free.

use crate::error::Error;
use aiperf_config::{ServiceConfig, UserConfig};
use aiperf_messages::{
    CommandOutcome, CommandResponseMessage, CommandType, Conversation,
    ConversationResponseMessage, Message, MessageHeader, ServiceType,
};
use aiperf_service::ServiceHarness;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const SYNTHETIC_POOL_SIZE: usize = 64;

/// Immutable conversation store shared by the serving loop.
#[derive(Debug)]
pub struct Dataset {
    conversations: HashMap<String, Conversation>,
    round_robin_ids: Vec<String>,
}

impl Dataset {
    /// Loads the dataset for a run.
    ///
    /// A non-schedule input file is read as JSONL conversations; without a
    /// file a synthetic single-turn pool is generated. Fixed-schedule runs
    /// synthesize conversations on demand for the scheduled ids.
    pub fn load(user_config: &UserConfig) -> Result<Self, Error> {
        let mut conversations = HashMap::new();
        let from_file = match &user_config.input.file {
            Some(path) if user_config.loadgen.timing_mode
                != aiperf_config::TimingMode::FixedSchedule =>
            {
                let contents = std::fs::read_to_string(path)
                    .map_err(|e| Error::Dataset { details: format!("{path}: {e}") })?;
                for (line_number, line) in contents.lines().enumerate() {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let conversation =
                        parse_conversation_line(line, line_number).map_err(|details| {
                            Error::Dataset { details: format!("{path}: {details}") }
                        })?;
                    let _ = conversations
                        .insert(conversation.conversation_id.clone(), conversation);
                }
                !conversations.is_empty()
            }
            _ => false,
        };

        if !from_file {
            for index in 0..SYNTHETIC_POOL_SIZE {
                let conversation = synthesize(&format!("synthetic-{index}"));
                let _ = conversations.insert(conversation.conversation_id.clone(), conversation);
            }
        }

        let mut round_robin_ids: Vec<String> = conversations.keys().cloned().collect();
        round_robin_ids.sort();
        Ok(Self { conversations, round_robin_ids })
    }

    /// The conversation for `conversation_id`, synthesizing an unknown id.
    #[must_use]
    pub fn get(&self, conversation_id: &str) -> Conversation {
        self.conversations
            .get(conversation_id)
            .cloned()
            .unwrap_or_else(|| synthesize(conversation_id))
    }

    /// The `n`th conversation in round-robin order.
    #[must_use]
    pub fn nth(&self, n: usize) -> Conversation {
        let id = &self.round_robin_ids[n % self.round_robin_ids.len()];
        self.conversations[id].clone()
    }

    /// Number of loaded conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// True when no conversations loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

fn parse_conversation_line(line: &str, line_number: usize) -> Result<Conversation, String> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| format!("line {}: {e}", line_number + 1))?;
    // Full conversation objects round-trip directly; bare `text` lines
    // become single-turn conversations.
    if value.get("turns").is_some() {
        return serde_json::from_value(value).map_err(|e| format!("line {}: {e}", line_number + 1));
    }
    let text = value["text"]
        .as_str()
        .ok_or_else(|| format!("line {}: expected `turns` or `text`", line_number + 1))?;
    let conversation_id = value["conversation_id"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| format!("line-{}", line_number + 1));
    Ok(Conversation::single_turn(conversation_id, text))
}

fn synthesize(conversation_id: &str) -> Conversation {
    Conversation::single_turn(
        conversation_id,
        "Describe the architecture of a distributed load generator.",
    )
}

/// Runs the dataset provider service until stopped.
pub async fn run_dataset_provider(
    user_config: UserConfig,
    service_config: ServiceConfig,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let mut harness = ServiceHarness::new(ServiceType::DatasetProvider, service_config);
    harness.initialize().await.map_err(Error::from)?;
    let service_id = harness.service_id().to_string();

    let result = run_inner(&mut harness, &user_config, &cancel).await;
    let outcome = result.map_err(|e| aiperf_service::Error::lifecycle(&service_id, "run", e));
    harness.shutdown(outcome).await?;
    Ok(())
}

async fn run_inner(
    harness: &mut ServiceHarness,
    user_config: &UserConfig,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let dataset = Arc::new(Dataset::load(user_config)?);
    info!(conversations = dataset.len(), "dataset loaded");

    let mut replier = harness.fabric().dataset_replier(harness.child_token()).await?;
    let (commands_sub, mut commands) = harness.command_stream().await.map_err(Error::from)?;
    harness.set_running().await.map_err(Error::from)?;

    let mut round_robin = 0usize;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            command = commands.recv() => {
                let Some(command) = command else { break };
                let stop = matches!(command.command, CommandType::Shutdown);
                let _ = harness
                    .publish(&Message::CommandResponse(CommandResponseMessage {
                        header: harness.header(),
                        command_id: command.command_id,
                        outcome: CommandOutcome::Ok,
                        error: None,
                    }))
                    .await;
                if stop {
                    break;
                }
            }
            request = replier.wait_for_request() => {
                let Some((token, message)) = request else { break };
                let Message::ConversationRequest(request) = message else { continue };
                let conversation = match &request.conversation_id {
                    Some(id) => dataset.get(id),
                    None => {
                        let conversation = dataset.nth(round_robin);
                        round_robin = round_robin.wrapping_add(1);
                        conversation
                    }
                };
                debug!(conversation_id = %conversation.conversation_id, "serving conversation");
                let reply = Message::ConversationResponse(ConversationResponseMessage {
                    header: MessageHeader::new(harness.service_id()),
                    conversation,
                });
                if let Err(e) = replier.respond(&token, reply).await {
                    debug!(error = %e, "failed to respond to conversation request");
                }
            }
        }
    }
    replier.stop().await;
    commands_sub.stop().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiperf_config::{
        EndpointConfig, EndpointType, InputConfig, LoadGenConfig, ModelSelectionStrategy,
        OutputConfig,
    };
    use std::collections::BTreeMap;
    use std::io::Write;

    fn config_with_file(file: Option<String>) -> UserConfig {
        UserConfig {
            endpoint: EndpointConfig {
                endpoint_type: EndpointType::Chat,
                base_url: "http://localhost".to_string(),
                custom_endpoint: None,
                streaming: false,
                model_names: vec!["m".to_string()],
                model_selection_strategy: ModelSelectionStrategy::RoundRobin,
                endpoint_params: BTreeMap::new(),
                request_timeout_sec: 600.0,
            },
            loadgen: LoadGenConfig::default(),
            input: InputConfig { file, ..InputConfig::default() },
            output: OutputConfig::default(),
            goodput_slos: BTreeMap::new(),
        }
    }

    #[test]
    fn synthesizes_a_pool_without_an_input_file() {
        let dataset = Dataset::load(&config_with_file(None)).expect("load");
        assert_eq!(dataset.len(), SYNTHETIC_POOL_SIZE);
        let first = dataset.nth(0);
        assert_eq!(first.turns.len(), 1);
        // Round robin wraps.
        assert_eq!(
            dataset.nth(0).conversation_id,
            dataset.nth(SYNTHETIC_POOL_SIZE).conversation_id
        );
    }

    #[test]
    fn loads_jsonl_conversations() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "{{\"conversation_id\": \"c1\", \"text\": \"hello\"}}").expect("write");
        writeln!(
            file,
            "{{\"conversation_id\": \"c2\", \"turns\": [{{\"texts\": [\"a\"]}}, {{\"texts\": [\"b\"]}}]}}"
        )
        .expect("write");
        let dataset = Dataset::load(&config_with_file(Some(
            file.path().display().to_string(),
        )))
        .expect("load");
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.get("c2").turns.len(), 2);
        assert_eq!(dataset.get("c1").turns[0].texts, vec!["hello".to_string()]);
    }

    #[test]
    fn unknown_ids_synthesize_on_demand() {
        let dataset = Dataset::load(&config_with_file(None)).expect("load");
        let conversation = dataset.get("never-loaded");
        assert_eq!(conversation.conversation_id, "never-loaded");
        assert_eq!(conversation.turns.len(), 1);
    }
}
