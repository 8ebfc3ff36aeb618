// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Wire types on both sides of the translator
//!
//! [`RawEvent`] is what the CLI prints (one JSON object per line in
//! `stream-json` mode). [`OutboundEvent`] is the SSE message protocol handed
//! to callers. Both are closed enums decoded or encoded on their `type` field,
//! so every shape the translator has to handle is an explicit match arm.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token accounting as reported by the CLI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,
}

/// One decoded line of CLI output
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawEvent {
    /// Session bootstrap information
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    /// A partial-message streaming event
    StreamEvent {
        event: StreamPayload,
        /// Set when the event belongs to a tool invocation rather than the
        /// top-level assistant turn
        #[serde(default)]
        parent_tool_use_id: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    /// Terminal turn summary
    Result(ResultRecord),
    /// Complete assistant/user messages and anything newer than this decoder
    #[serde(other)]
    Other,
}

impl RawEvent {
    /// Decode one output line
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }

    /// Internal session id carried by the record, if any
    pub fn session_id(&self) -> Option<&str> {
        match self {
            RawEvent::System { session_id, .. } | RawEvent::StreamEvent { session_id, .. } => {
                session_id.as_deref()
            }
            RawEvent::Result(result) => result.session_id.as_deref(),
            RawEvent::Other => None,
        }
    }
}

/// Terminal `result` record
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResultRecord {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    /// Final assistant text as summarized by the CLI
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub num_turns: Option<u32>,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

/// Nested message-protocol event carried by a `stream_event` record
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamPayload {
    MessageStart {
        #[serde(default)]
        message: Value,
    },
    ContentBlockStart {
        #[serde(default)]
        index: u32,
        content_block: UpstreamBlock,
    },
    ContentBlockDelta {
        #[serde(default)]
        index: u32,
        delta: UpstreamDelta,
    },
    ContentBlockStop {
        #[serde(default)]
        index: u32,
    },
    MessageDelta {
        #[serde(default)]
        delta: UpstreamStop,
        #[serde(default)]
        usage: Option<Usage>,
    },
    MessageStop,
    /// `ping` and future event kinds
    #[serde(other)]
    Unknown,
}

/// Content block kinds opened upstream
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpstreamBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    /// `tool_use`, `thinking`, ...
    #[serde(other)]
    Other,
}

/// Delta payload kinds
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpstreamDelta {
    TextDelta { text: String },
    /// `input_json_delta`, `thinking_delta`, ...
    #[serde(other)]
    Other,
}

/// Body of an upstream `message_delta`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UpstreamStop {
    #[serde(default)]
    pub stop_reason: Option<String>,
}

/// Outbound SSE frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    MessageStart {
        message: Value,
    },
    ContentBlockStart {
        index: u32,
        content_block: OutboundBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: OutboundDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: StopDelta,
        usage: Usage,
    },
    MessageStop,
}

impl OutboundEvent {
    /// SSE `event:` field for this frame
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::MessageStart { .. } => "message_start",
            OutboundEvent::ContentBlockStart { .. } => "content_block_start",
            OutboundEvent::ContentBlockDelta { .. } => "content_block_delta",
            OutboundEvent::ContentBlockStop { .. } => "content_block_stop",
            OutboundEvent::MessageDelta { .. } => "message_delta",
            OutboundEvent::MessageStop => "message_stop",
        }
    }

    /// Render as an SSE record (`event:` + `data:` lines and a blank line)
    pub fn to_sse(&self) -> serde_json::Result<String> {
        Ok(format!(
            "event: {}\ndata: {}\n\n",
            self.name(),
            serde_json::to_string(self)?
        ))
    }

    pub(crate) fn text_block_start(index: u32, text: impl Into<String>) -> Self {
        OutboundEvent::ContentBlockStart {
            index,
            content_block: OutboundBlock::Text { text: text.into() },
        }
    }

    pub(crate) fn text_delta(index: u32, text: impl Into<String>) -> Self {
        OutboundEvent::ContentBlockDelta {
            index,
            delta: OutboundDelta::TextDelta { text: text.into() },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundBlock {
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundDelta {
    TextDelta { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopDelta {
    pub stop_reason: String,
    pub stop_sequence: Option<String>,
}

/// Skeleton `message` object used in a `message_start` we build ourselves
pub fn message_skeleton(message_id: &str, model: &str) -> Value {
    serde_json::json!({
        "id": message_id,
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": [],
        "stop_reason": null,
        "stop_sequence": null,
        "usage": { "input_tokens": 0, "output_tokens": 0 }
    })
}
