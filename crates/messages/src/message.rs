// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! The message envelope: a tagged union discriminated by `message_type`.
//!
//! Serialization is JSON. Absent optional fields are omitted from the wire
//! form, and every message round-trips field-wise. Unknown fields are
//! ignored unless the consumer opts into strict decoding.

use crate::conversation::Conversation;
use crate::credit::{CreditPhase, PhaseProcessingStats};
use crate::records::{MetricRecordEntry, MetricResult, ParsedResponseRecord, RequestErrorInfo};
use crate::service::{CommandOutcome, CommandType, ServiceState, ServiceType, Topic};
use crate::time::wall_clock_ns;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Fields common to every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Id of the sending service.
    pub service_id: String,
    /// Correlates requests with replies on DEALER/ROUTER links.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// End-to-end correlation id propagated into HTTP headers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_correlation_id: Option<String>,
    /// Wall-clock creation time in nanoseconds.
    pub timestamp_ns: u64,
}

impl MessageHeader {
    /// Header stamped with the current wall clock.
    #[must_use]
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            request_id: None,
            x_correlation_id: None,
            timestamp_ns: wall_clock_ns(),
        }
    }

    /// Header with a fresh random `request_id`, for request/reply links.
    #[must_use]
    pub fn with_request_id(service_id: impl Into<String>) -> Self {
        let mut header = Self::new(service_id);
        header.request_id = Some(uuid::Uuid::new_v4().to_string());
        header
    }
}

/// A credit authorizing one request, dropped by the timing manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditDropMessage {
    /// Common fields.
    #[serde(flatten)]
    pub header: MessageHeader,
    /// Phase this credit is attributed to.
    pub phase: CreditPhase,
    /// Conversation to execute; mandatory in fixed-schedule mode, chosen by
    /// the worker otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Wall-clock target send time for pre-scheduled strategies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit_drop_ns: Option<u64>,
    /// Whether the worker should abort this request mid-flight.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub should_cancel: bool,
    /// Delay after request start at which to abort, in nanoseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_after_ns: Option<u64>,
}

/// Returned by a worker when a credit's request has fully finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditReturnMessage {
    /// Common fields.
    #[serde(flatten)]
    pub header: MessageHeader,
    /// Phase of the credit being returned.
    pub phase: CreditPhase,
}

/// Worker request for a conversation's turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRequestMessage {
    /// Common fields.
    #[serde(flatten)]
    pub header: MessageHeader,
    /// Specific conversation to fetch; provider picks one when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// Dataset provider reply carrying a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationResponseMessage {
    /// Common fields.
    #[serde(flatten)]
    pub header: MessageHeader,
    /// The requested conversation.
    pub conversation: Conversation,
}

/// A worker's raw record for one completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedInferenceResultsMessage {
    /// Common fields.
    #[serde(flatten)]
    pub header: MessageHeader,
    /// The parsed record.
    pub record: ParsedResponseRecord,
}

/// A batch of per-record metric values bound for the results processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecordsMessage {
    /// Common fields.
    #[serde(flatten)]
    pub header: MessageHeader,
    /// Entries computed since the last flush.
    pub records: Vec<MetricRecordEntry>,
}

/// Periodic liveness report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    /// Common fields.
    #[serde(flatten)]
    pub header: MessageHeader,
    /// Type of the reporting service.
    pub service_type: ServiceType,
    /// Current lifecycle state.
    pub state: ServiceState,
}

/// Announces a service to the system controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationMessage {
    /// Common fields.
    #[serde(flatten)]
    pub header: MessageHeader,
    /// Type of the registering service.
    pub service_type: ServiceType,
    /// Lifecycle state at registration time.
    pub state: ServiceState,
}

/// Controller-issued command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    /// Common fields.
    #[serde(flatten)]
    pub header: MessageHeader,
    /// The command to execute.
    pub command: CommandType,
    /// Unique id echoed back in the response.
    pub command_id: String,
    /// Restricts the command to one service id; broadcast when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_service_id: Option<String>,
    /// Command-specific configuration payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

/// Service reply to a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponseMessage {
    /// Common fields.
    #[serde(flatten)]
    pub header: MessageHeader,
    /// Id of the command being answered.
    pub command_id: String,
    /// Whether the command succeeded.
    pub outcome: CommandOutcome,
    /// Failure details when `outcome` is `Error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Service state change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    /// Common fields.
    #[serde(flatten)]
    pub header: MessageHeader,
    /// Type of the reporting service.
    pub service_type: ServiceType,
    /// New lifecycle state.
    pub state: ServiceState,
}

/// Service-reported error, propagated to the system controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Common fields.
    #[serde(flatten)]
    pub header: MessageHeader,
    /// Type of the reporting service.
    pub service_type: ServiceType,
    /// The error that occurred.
    pub error: RequestErrorInfo,
}

/// Orderly shutdown request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownMessage {
    /// Common fields.
    #[serde(flatten)]
    pub header: MessageHeader,
    /// Human-readable reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Announces the start of a credit phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditPhaseStartMessage {
    /// Common fields.
    #[serde(flatten)]
    pub header: MessageHeader,
    /// Phase being started.
    pub phase: CreditPhase,
    /// Wall-clock start in nanoseconds.
    pub start_ns: u64,
    /// Credit budget for count-based phases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_expected_requests: Option<u64>,
    /// Duration budget for time-based phases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_duration_sec: Option<f64>,
}

/// Announces that every credit of a phase has been dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditPhaseSendingCompleteMessage {
    /// Common fields.
    #[serde(flatten)]
    pub header: MessageHeader,
    /// Phase that finished sending.
    pub phase: CreditPhase,
    /// Wall-clock time of the last drop.
    pub sent_end_ns: u64,
    /// Credits dropped in total.
    pub sent: u64,
}

/// Announces phase completion (all credits returned, or force-completed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditPhaseCompleteMessage {
    /// Common fields.
    #[serde(flatten)]
    pub header: MessageHeader,
    /// Phase that completed.
    pub phase: CreditPhase,
    /// Credits returned by the time the phase completed.
    pub completed: u64,
    /// Wall-clock completion time.
    pub end_ns: u64,
}

/// Periodic phase progress report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditPhaseProgressMessage {
    /// Common fields.
    #[serde(flatten)]
    pub header: MessageHeader,
    /// Phase being reported.
    pub phase: CreditPhase,
    /// Credits dropped so far.
    pub sent: u64,
    /// Credits returned so far.
    pub completed: u64,
}

/// All credit phases are complete; no further requests will be issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditsCompleteMessage {
    /// Common fields.
    #[serde(flatten)]
    pub header: MessageHeader,
}

/// Side-channel snapshot of in-flight progress for UIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeMetricsMessage {
    /// Common fields.
    #[serde(flatten)]
    pub header: MessageHeader,
    /// Current metric summaries.
    pub results: Vec<MetricResult>,
    /// Record processing counters.
    pub processing: PhaseProcessingStats,
}

/// Every inter-service payload, discriminated by `message_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum Message {
    /// See [`CreditDropMessage`].
    CreditDrop(CreditDropMessage),
    /// See [`CreditReturnMessage`].
    CreditReturn(CreditReturnMessage),
    /// See [`ConversationRequestMessage`].
    ConversationRequest(ConversationRequestMessage),
    /// See [`ConversationResponseMessage`].
    ConversationResponse(ConversationResponseMessage),
    /// See [`ParsedInferenceResultsMessage`].
    ParsedInferenceResults(ParsedInferenceResultsMessage),
    /// See [`MetricRecordsMessage`].
    MetricRecords(MetricRecordsMessage),
    /// See [`HeartbeatMessage`].
    Heartbeat(HeartbeatMessage),
    /// See [`RegistrationMessage`].
    Registration(RegistrationMessage),
    /// See [`CommandMessage`].
    Command(CommandMessage),
    /// See [`CommandResponseMessage`].
    CommandResponse(CommandResponseMessage),
    /// See [`StatusMessage`].
    Status(StatusMessage),
    /// See [`ErrorMessage`].
    Error(ErrorMessage),
    /// See [`ShutdownMessage`].
    Shutdown(ShutdownMessage),
    /// See [`CreditPhaseStartMessage`].
    CreditPhaseStart(CreditPhaseStartMessage),
    /// See [`CreditPhaseSendingCompleteMessage`].
    CreditPhaseSendingComplete(CreditPhaseSendingCompleteMessage),
    /// See [`CreditPhaseCompleteMessage`].
    CreditPhaseComplete(CreditPhaseCompleteMessage),
    /// See [`CreditPhaseProgressMessage`].
    CreditPhaseProgress(CreditPhaseProgressMessage),
    /// See [`CreditsCompleteMessage`].
    CreditsComplete(CreditsCompleteMessage),
    /// See [`RealtimeMetricsMessage`].
    RealtimeMetrics(RealtimeMetricsMessage),
}

/// Failure decoding a wire message.
#[derive(Debug, Error)]
pub enum MessageDecodeError {
    /// The payload was not valid JSON for any message type.
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    /// Strict mode rejected fields no message type declares.
    #[error("unknown fields in {message_type} message: {fields:?}")]
    UnknownFields {
        /// The discriminator of the offending message.
        message_type: String,
        /// The unrecognized top-level fields.
        fields: Vec<String>,
    },
}

impl Message {
    /// The shared header of any message.
    #[must_use]
    pub fn header(&self) -> &MessageHeader {
        match self {
            Message::CreditDrop(m) => &m.header,
            Message::CreditReturn(m) => &m.header,
            Message::ConversationRequest(m) => &m.header,
            Message::ConversationResponse(m) => &m.header,
            Message::ParsedInferenceResults(m) => &m.header,
            Message::MetricRecords(m) => &m.header,
            Message::Heartbeat(m) => &m.header,
            Message::Registration(m) => &m.header,
            Message::Command(m) => &m.header,
            Message::CommandResponse(m) => &m.header,
            Message::Status(m) => &m.header,
            Message::Error(m) => &m.header,
            Message::Shutdown(m) => &m.header,
            Message::CreditPhaseStart(m) => &m.header,
            Message::CreditPhaseSendingComplete(m) => &m.header,
            Message::CreditPhaseComplete(m) => &m.header,
            Message::CreditPhaseProgress(m) => &m.header,
            Message::CreditsComplete(m) => &m.header,
            Message::RealtimeMetrics(m) => &m.header,
        }
    }

    /// Mutable access to the shared header.
    pub fn header_mut(&mut self) -> &mut MessageHeader {
        match self {
            Message::CreditDrop(m) => &mut m.header,
            Message::CreditReturn(m) => &mut m.header,
            Message::ConversationRequest(m) => &mut m.header,
            Message::ConversationResponse(m) => &mut m.header,
            Message::ParsedInferenceResults(m) => &mut m.header,
            Message::MetricRecords(m) => &mut m.header,
            Message::Heartbeat(m) => &mut m.header,
            Message::Registration(m) => &mut m.header,
            Message::Command(m) => &mut m.header,
            Message::CommandResponse(m) => &mut m.header,
            Message::Status(m) => &mut m.header,
            Message::Error(m) => &mut m.header,
            Message::Shutdown(m) => &mut m.header,
            Message::CreditPhaseStart(m) => &mut m.header,
            Message::CreditPhaseSendingComplete(m) => &mut m.header,
            Message::CreditPhaseComplete(m) => &mut m.header,
            Message::CreditPhaseProgress(m) => &mut m.header,
            Message::CreditsComplete(m) => &mut m.header,
            Message::RealtimeMetrics(m) => &mut m.header,
        }
    }

    /// The wire discriminator for this message.
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        match self {
            Message::CreditDrop(_) => "credit_drop",
            Message::CreditReturn(_) => "credit_return",
            Message::ConversationRequest(_) => "conversation_request",
            Message::ConversationResponse(_) => "conversation_response",
            Message::ParsedInferenceResults(_) => "parsed_inference_results",
            Message::MetricRecords(_) => "metric_records",
            Message::Heartbeat(_) => "heartbeat",
            Message::Registration(_) => "registration",
            Message::Command(_) => "command",
            Message::CommandResponse(_) => "command_response",
            Message::Status(_) => "status",
            Message::Error(_) => "error",
            Message::Shutdown(_) => "shutdown",
            Message::CreditPhaseStart(_) => "credit_phase_start",
            Message::CreditPhaseSendingComplete(_) => "credit_phase_sending_complete",
            Message::CreditPhaseComplete(_) => "credit_phase_complete",
            Message::CreditPhaseProgress(_) => "credit_phase_progress",
            Message::CreditsComplete(_) => "credits_complete",
            Message::RealtimeMetrics(_) => "realtime_metrics",
        }
    }

    /// Event bus topic for messages that travel over PUB/SUB.
    ///
    /// Point-to-point messages (credit drops, records, request/reply) have
    /// no topic.
    #[must_use]
    pub fn topic(&self) -> Option<Topic> {
        match self {
            Message::CreditReturn(_) => Some(Topic::CreditReturn),
            Message::Heartbeat(_) => Some(Topic::Heartbeat),
            Message::Registration(_) => Some(Topic::Registration),
            Message::Command(_) => Some(Topic::Command),
            Message::CommandResponse(_) => Some(Topic::CommandResponse),
            Message::Status(_) => Some(Topic::Status),
            Message::Error(_) => Some(Topic::Error),
            Message::Shutdown(_) => Some(Topic::Shutdown),
            Message::CreditPhaseStart(_) => Some(Topic::CreditPhaseStart),
            Message::CreditPhaseSendingComplete(_) => Some(Topic::CreditPhaseSendingComplete),
            Message::CreditPhaseComplete(_) => Some(Topic::CreditPhaseComplete),
            Message::CreditPhaseProgress(_) => Some(Topic::CreditPhaseProgress),
            Message::CreditsComplete(_) => Some(Topic::CreditsComplete),
            Message::RealtimeMetrics(_) => Some(Topic::RealtimeMetrics),
            _ => None,
        }
    }

    /// Serializes the message to its JSON wire form.
    pub fn encode(&self) -> Result<Vec<u8>, MessageDecodeError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a message, ignoring unknown fields.
    pub fn decode(bytes: &[u8]) -> Result<Self, MessageDecodeError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Decodes a message, rejecting top-level fields no message type declares.
    pub fn decode_strict(bytes: &[u8]) -> Result<Self, MessageDecodeError> {
        let raw: Value = serde_json::from_slice(bytes)?;
        let message: Message = serde_json::from_value(raw.clone())?;
        let canonical = serde_json::to_value(&message)?;
        let (Value::Object(raw_map), Value::Object(canonical_map)) = (&raw, &canonical) else {
            return Ok(message);
        };
        let unknown: Vec<String> = raw_map
            .iter()
            // An explicit null for an absent optional is not an unknown field.
            .filter(|(key, value)| !canonical_map.contains_key(*key) && !value.is_null())
            .map(|(key, _)| key.clone())
            .collect();
        if unknown.is_empty() {
            Ok(message)
        } else {
            Err(MessageDecodeError::UnknownFields {
                message_type: message.message_type().to_string(),
                fields: unknown,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn header() -> MessageHeader {
        MessageHeader {
            service_id: "timing_manager-1".to_string(),
            request_id: None,
            x_correlation_id: None,
            timestamp_ns: 42,
        }
    }

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::CreditDrop(CreditDropMessage {
                header: header(),
                phase: CreditPhase::Profiling,
                conversation_id: Some("conv-7".to_string()),
                credit_drop_ns: None,
                should_cancel: true,
                cancel_after_ns: Some(5_000_000),
            }),
            Message::CreditReturn(CreditReturnMessage {
                header: header(),
                phase: CreditPhase::Warmup,
            }),
            Message::Registration(RegistrationMessage {
                header: header(),
                service_type: ServiceType::WorkerManager,
                state: ServiceState::Initialized,
            }),
            Message::Command(CommandMessage {
                header: header(),
                command: CommandType::ProfileStart,
                command_id: "cmd-1".to_string(),
                target_service_id: None,
                config: None,
            }),
            Message::CreditPhaseStart(CreditPhaseStartMessage {
                header: header(),
                phase: CreditPhase::Profiling,
                start_ns: 1_000,
                total_expected_requests: Some(100),
                expected_duration_sec: None,
            }),
            Message::CreditPhaseComplete(CreditPhaseCompleteMessage {
                header: header(),
                phase: CreditPhase::Profiling,
                completed: 100,
                end_ns: 9_000,
            }),
            Message::CreditsComplete(CreditsCompleteMessage { header: header() }),
            Message::Shutdown(ShutdownMessage { header: header(), reason: None }),
        ]
    }

    #[test]
    fn every_message_round_trips() {
        for message in sample_messages() {
            let bytes = message.encode().expect("encode");
            let back = Message::decode(&bytes).expect("decode");
            assert_eq!(back, message);
        }
    }

    #[test]
    fn discriminator_is_snake_case() {
        let message = Message::CreditPhaseSendingComplete(CreditPhaseSendingCompleteMessage {
            header: header(),
            phase: CreditPhase::Warmup,
            sent_end_ns: 5,
            sent: 3,
        });
        let value: Value = serde_json::from_slice(&message.encode().expect("encode"))
            .expect("parse");
        assert_eq!(value["message_type"], "credit_phase_sending_complete");
        assert_eq!(message.message_type(), "credit_phase_sending_complete");
    }

    #[test]
    fn absent_optionals_are_omitted() {
        let message = Message::CreditReturn(CreditReturnMessage {
            header: header(),
            phase: CreditPhase::Profiling,
        });
        let value: Value = serde_json::from_slice(&message.encode().expect("encode"))
            .expect("parse");
        let object = value.as_object().expect("object");
        assert!(!object.contains_key("request_id"));
        assert!(!object.contains_key("x_correlation_id"));
    }

    #[test]
    fn unknown_fields_ignored_by_default_rejected_in_strict_mode() {
        let mut value: Value = serde_json::from_slice(
            &Message::CreditReturn(CreditReturnMessage {
                header: header(),
                phase: CreditPhase::Profiling,
            })
            .encode()
            .expect("encode"),
        )
        .expect("parse");
        value["some_future_field"] = Value::from(123);
        let bytes = serde_json::to_vec(&value).expect("serialize");

        assert!(Message::decode(&bytes).is_ok());
        match Message::decode_strict(&bytes) {
            Err(MessageDecodeError::UnknownFields { fields, .. }) => {
                assert_eq!(fields, vec!["some_future_field".to_string()]);
            }
            other => panic!("expected UnknownFields, got {other:?}"),
        }
    }

    #[test]
    fn default_bool_fields_round_trip_when_omitted() {
        let json = serde_json::json!({
            "message_type": "credit_drop",
            "service_id": "tm-1",
            "timestamp_ns": 1,
            "phase": "profiling",
        });
        let bytes = serde_json::to_vec(&json).expect("serialize");
        let message = Message::decode(&bytes).expect("decode");
        match message {
            Message::CreditDrop(drop) => {
                assert!(!drop.should_cancel);
                assert_eq!(drop.conversation_id, None);
            }
            other => panic!("expected credit_drop, got {other:?}"),
        }
    }
}
