// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Conversation models served by the dataset provider.
//!
//! Dataset construction (synthetic prompts, tokenization, media) happens
//! outside the core; workers only ever see these shapes.

use serde::{Deserialize, Serialize};

/// A single turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Text segments composing the turn's prompt.
    pub texts: Vec<String>,
    /// Image attachments (URLs or data URIs) for image-capable endpoints.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
    /// Audio attachments for audio-capable endpoints.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audio_urls: Vec<String>,
    /// Per-turn completion budget forwarded to the endpoint, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Model override for this turn; falls back to worker model selection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Turn {
    /// A single-text turn with no attachments or overrides.
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            texts: vec![text.into()],
            image_urls: Vec::new(),
            audio_urls: Vec::new(),
            max_tokens: None,
            model: None,
        }
    }
}

/// An ordered list of turns keyed by conversation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique id of the conversation within the loaded dataset.
    pub conversation_id: String,
    /// Turns in execution order.
    pub turns: Vec<Turn>,
}

impl Conversation {
    /// A single-turn conversation, the common case for rate-driven runs.
    #[must_use]
    pub fn single_turn(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { conversation_id: conversation_id.into(), turns: vec![Turn::from_text(text)] }
    }
}
