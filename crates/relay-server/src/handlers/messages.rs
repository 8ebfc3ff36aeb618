// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! `POST /v1/messages`: one turn, buffered or streamed

use crate::state::AppState;
use crate::{ServerError, ServerResult};
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_bridge::{OutboundEvent, TurnOutcome, TurnRequest, Usage};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct MessageRequest {
    pub prompt: String,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub max_budget_usd: Option<f64>,
    #[serde(default)]
    pub stream: bool,
}

impl MessageRequest {
    fn into_turn(self) -> TurnRequest {
        TurnRequest {
            prompt: self.prompt,
            system_prompt: self.system,
            allowed_tools: self.allowed_tools,
            model: self.model,
            conversation_id: self.conversation_id,
            max_budget_usd: self.max_budget_usd,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
}

/// Buffered reply in message-object form
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub role: &'static str,
    pub model: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: String,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
    /// CLI session id the next turn of this conversation resumes
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

impl MessageResponse {
    fn from_outcome(outcome: TurnOutcome, conversation_id: Option<String>) -> Self {
        Self {
            id: outcome.message_id,
            kind: "message",
            role: "assistant",
            model: outcome.model,
            content: vec![ContentBlock::Text { text: outcome.text }],
            stop_reason: outcome.stop_reason,
            stop_sequence: None,
            usage: outcome.usage,
            session_id: outcome.session_id,
            conversation_id,
            cost_usd: outcome.cost_usd,
        }
    }
}

pub async fn create_message(
    State(state): State<AppState>,
    Json(request): Json<MessageRequest>,
) -> ServerResult<Response> {
    if request.prompt.trim().is_empty() {
        return Err(ServerError::BadRequest("prompt must not be empty".into()));
    }

    let streaming = request.stream;
    let conversation_id = request.conversation_id.clone();
    let turn = request.into_turn();

    if streaming {
        let frames = ReceiverStream::new(state.orchestrator.stream(turn))
            .map(|frame| Ok::<_, Infallible>(sse_event(&frame)));
        return Ok(Sse::new(frames)
            .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keep-alive"))
            .into_response());
    }

    let outcome = state.orchestrator.run(&turn).await?;
    Ok(Json(MessageResponse::from_outcome(outcome, conversation_id)).into_response())
}

fn sse_event(frame: &OutboundEvent) -> Event {
    Event::default().event(frame.name()).json_data(frame).unwrap_or_else(|e| {
        warn!(error = %e, frame = frame.name(), "Failed to encode frame");
        Event::default().event(frame.name()).data("{}")
    })
}
