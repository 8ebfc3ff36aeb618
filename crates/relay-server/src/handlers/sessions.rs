// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Session inspection and invalidation

use crate::state::AppState;
use crate::{ServerError, ServerResult};
use axum::extract::{Path, State};
use axum::Json;
use relay_bridge::{SessionRecord, SessionStats};

/// Snapshot of all live conversations
pub async fn list_sessions(State(state): State<AppState>) -> ServerResult<Json<SessionStats>> {
    Ok(Json(state.sessions().snapshot().await))
}

/// Forget a conversation so its next turn starts fresh
pub async fn delete_session(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> ServerResult<Json<SessionRecord>> {
    state
        .sessions()
        .remove(&conversation_id)
        .await
        .map(Json)
        .ok_or(ServerError::ConversationNotFound(conversation_id))
}
