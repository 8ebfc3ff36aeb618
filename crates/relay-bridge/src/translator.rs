// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Raw CLI records to outbound message frames
//!
//! The translator is a three-state machine (awaiting start, in body, done)
//! that guarantees a well-formed envelope whatever the CLI prints: exactly
//! one `message_start`, strictly paired content blocks, and a single
//! terminal `message_delta` + `message_stop` built from the `result` record.

use crate::events::{
    message_skeleton, OutboundEvent, RawEvent, ResultRecord, StopDelta, StreamPayload,
    UpstreamBlock, UpstreamDelta, Usage,
};
use serde::Serialize;
use tracing::{debug, trace};

const DEFAULT_STOP_REASON: &str = "end_turn";

/// Summary of a completed turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub message_id: String,
    pub model: String,
    /// Text forwarded to the caller, or the CLI's result text when nothing
    /// was streamed
    pub text: String,
    /// Internal session id to resume next turn
    pub session_id: Option<String>,
    pub stop_reason: String,
    pub usage: Usage,
    pub is_error: bool,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
    pub num_turns: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingStart,
    InBody,
    Done,
}

#[derive(Debug, Clone, Copy)]
struct OpenBlock {
    upstream_index: u32,
    index: u32,
}

/// Per-turn translation state
#[derive(Debug)]
pub struct Translator {
    message_id: String,
    model: String,
    state: State,
    open_block: Option<OpenBlock>,
    next_index: u32,
    text: String,
    upstream_stop_reason: Option<String>,
    outcome: Option<TurnOutcome>,
}

impl Translator {
    pub fn new(message_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            model: model.into(),
            state: State::AwaitingStart,
            open_block: None,
            next_index: 0,
            text: String::new(),
            upstream_stop_reason: None,
            outcome: None,
        }
    }

    /// Feed one record, returning the frames to emit for it (possibly none)
    pub fn push(&mut self, record: RawEvent) -> Vec<OutboundEvent> {
        if self.state == State::Done {
            trace!("record after terminal result ignored");
            return Vec::new();
        }

        match record {
            RawEvent::StreamEvent {
                parent_tool_use_id: Some(parent),
                ..
            } => {
                trace!(parent = %parent, "nested tool event dropped");
                Vec::new()
            }
            RawEvent::StreamEvent { event, .. } => self.on_stream_event(event),
            RawEvent::Result(result) => self.on_result(result),
            RawEvent::System { .. } | RawEvent::Other => Vec::new(),
        }
    }

    /// Whether a `message_start` has gone out
    pub fn started(&self) -> bool {
        self.state != State::AwaitingStart
    }

    /// Whether the terminal frames have gone out
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Text forwarded so far
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Close a started but unfinished envelope after a failure.
    ///
    /// Returns nothing when no frame was sent yet or the envelope is already
    /// complete.
    pub fn abort(&mut self) -> Vec<OutboundEvent> {
        if self.state != State::InBody {
            return Vec::new();
        }
        let mut frames = Vec::new();
        self.close_open_block(&mut frames);
        frames.push(stop_frame(DEFAULT_STOP_REASON, Usage::default()));
        frames.push(OutboundEvent::MessageStop);
        self.state = State::Done;
        frames
    }

    /// Consume the translator, yielding the outcome if a result was seen
    pub fn finish(self) -> Option<TurnOutcome> {
        self.outcome
    }

    fn on_stream_event(&mut self, event: StreamPayload) -> Vec<OutboundEvent> {
        match event {
            StreamPayload::MessageStart { mut message } => {
                if self.state != State::AwaitingStart {
                    debug!("duplicate message_start dropped");
                    return Vec::new();
                }
                match message.as_object_mut() {
                    Some(object) => {
                        object.insert("id".into(), self.message_id.clone().into());
                    }
                    None => message = message_skeleton(&self.message_id, &self.model),
                }
                self.state = State::InBody;
                vec![OutboundEvent::MessageStart { message }]
            }
            StreamPayload::ContentBlockStart {
                index,
                content_block,
            } => {
                if self.state != State::InBody {
                    return Vec::new();
                }
                let UpstreamBlock::Text { text } = content_block else {
                    return Vec::new();
                };
                let mut frames = Vec::new();
                self.close_open_block(&mut frames);
                let outbound = self.next_index;
                self.next_index += 1;
                self.open_block = Some(OpenBlock {
                    upstream_index: index,
                    index: outbound,
                });
                self.text.push_str(&text);
                frames.push(OutboundEvent::text_block_start(outbound, text));
                frames
            }
            StreamPayload::ContentBlockDelta { index, delta } => {
                let UpstreamDelta::TextDelta { text } = delta else {
                    return Vec::new();
                };
                match self.open_block {
                    Some(open) if open.upstream_index == index => {
                        self.text.push_str(&text);
                        vec![OutboundEvent::text_delta(open.index, text)]
                    }
                    _ => {
                        debug!(index, "text delta outside an open text block dropped");
                        Vec::new()
                    }
                }
            }
            StreamPayload::ContentBlockStop { index } => match self.open_block {
                Some(open) if open.upstream_index == index => {
                    self.open_block = None;
                    vec![OutboundEvent::ContentBlockStop { index: open.index }]
                }
                _ => Vec::new(),
            },
            StreamPayload::MessageDelta { delta, .. } => {
                if delta.stop_reason.is_some() {
                    self.upstream_stop_reason = delta.stop_reason;
                }
                Vec::new()
            }
            StreamPayload::MessageStop | StreamPayload::Unknown => Vec::new(),
        }
    }

    fn on_result(&mut self, result: ResultRecord) -> Vec<OutboundEvent> {
        let result_text = result.result.clone().unwrap_or_default();
        let stop_reason = result
            .stop_reason
            .clone()
            .or_else(|| self.upstream_stop_reason.clone())
            .unwrap_or_else(|| DEFAULT_STOP_REASON.to_string());
        let usage = result.usage.clone().unwrap_or_default();

        let frames = match self.state {
            State::AwaitingStart => {
                debug!("bare result without framing; synthesizing envelope");
                self.text = result_text;
                synthesized_envelope(
                    &self.message_id,
                    &self.model,
                    &self.text,
                    &stop_reason,
                    usage.clone(),
                )
            }
            State::InBody => {
                let mut frames = Vec::new();
                self.close_open_block(&mut frames);
                if self.next_index == 0 && !result_text.is_empty() {
                    frames.push(OutboundEvent::text_block_start(0, ""));
                    frames.push(OutboundEvent::text_delta(0, result_text.clone()));
                    frames.push(OutboundEvent::ContentBlockStop { index: 0 });
                    self.next_index = 1;
                    self.text = result_text;
                }
                frames.push(stop_frame(&stop_reason, usage.clone()));
                frames.push(OutboundEvent::MessageStop);
                frames
            }
            State::Done => Vec::new(),
        };

        self.state = State::Done;
        self.outcome = Some(TurnOutcome {
            message_id: self.message_id.clone(),
            model: self.model.clone(),
            text: self.text.clone(),
            session_id: result.session_id,
            stop_reason,
            usage,
            is_error: result.is_error,
            cost_usd: result.total_cost_usd,
            duration_ms: result.duration_ms,
            num_turns: result.num_turns,
        });
        frames
    }

    fn close_open_block(&mut self, frames: &mut Vec<OutboundEvent>) {
        if let Some(open) = self.open_block.take() {
            frames.push(OutboundEvent::ContentBlockStop { index: open.index });
        }
    }
}

fn stop_frame(stop_reason: &str, usage: Usage) -> OutboundEvent {
    OutboundEvent::MessageDelta {
        delta: StopDelta {
            stop_reason: stop_reason.to_string(),
            stop_sequence: None,
        },
        usage,
    }
}

/// A complete single-block message carrying `text`.
///
/// Used when the CLI printed a bare result, and by the orchestrator to
/// deliver an error as a well-formed stream.
pub fn synthesized_envelope(
    message_id: &str,
    model: &str,
    text: &str,
    stop_reason: &str,
    usage: Usage,
) -> Vec<OutboundEvent> {
    vec![
        OutboundEvent::MessageStart {
            message: message_skeleton(message_id, model),
        },
        OutboundEvent::text_block_start(0, ""),
        OutboundEvent::text_delta(0, text),
        OutboundEvent::ContentBlockStop { index: 0 },
        stop_frame(stop_reason, usage),
        OutboundEvent::MessageStop,
    ]
}
