// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Wire models exchanged between AIPerf services.
//!
//! Every inter-service payload is a [`Message`], a tagged union discriminated
//! by the `message_type` JSON field. Messages exist only in transit; the
//! long-lived state they mutate (phase stats, metric accumulators) lives in
//! the owning service.

pub mod conversation;
pub mod credit;
pub mod message;
pub mod records;
pub mod service;
pub mod time;

pub use conversation::{Conversation, Turn};
pub use credit::{CreditPhase, CreditPhaseConfig, CreditPhaseStats, PhaseProcessingStats};
pub use message::{
    CommandMessage, CommandResponseMessage, ConversationRequestMessage,
    ConversationResponseMessage, CreditDropMessage, CreditPhaseCompleteMessage,
    CreditPhaseProgressMessage, CreditPhaseSendingCompleteMessage, CreditPhaseStartMessage,
    CreditReturnMessage, CreditsCompleteMessage, ErrorMessage, HeartbeatMessage, Message,
    MessageDecodeError, MessageHeader, MetricRecordsMessage, ParsedInferenceResultsMessage,
    RealtimeMetricsMessage, RegistrationMessage, ShutdownMessage, StatusMessage,
};
pub use records::{
    MetricRecordEntry, MetricRecordMetadata, MetricResult, MetricValue, ParsedResponse,
    ParsedResponseRecord, RequestErrorInfo, RequestRecord, ResponseData, TokenUsage,
};
pub use service::{CommandOutcome, CommandType, ExitErrorInfo, ServiceState, ServiceType, Topic};
