// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Server error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use relay_bridge::BridgeError;
use serde::Serialize;

/// Server result type
pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// `{"type":"error","error":{...}}` body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: String,
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::ConversationNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Bridge(BridgeError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            ServerError::Bridge(BridgeError::BinaryNotFound(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Bridge(_) => StatusCode::BAD_GATEWAY,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ServerError::BadRequest(_) => "invalid_request_error",
            ServerError::ConversationNotFound(_) => "not_found_error",
            ServerError::Bridge(BridgeError::Timeout { .. }) => "timeout_error",
            ServerError::Bridge(_) | ServerError::Internal(_) => "api_error",
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: "error",
            error: ErrorDetail {
                kind: self.kind(),
                message: self.to_string(),
            },
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if self.status().is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (self.status(), Json(self.to_body())).into_response()
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Internal(format!("IO error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn bridge_errors_map_to_gateway_statuses() {
        let timeout = ServerError::from(BridgeError::Timeout {
            deadline: relay_bridge::Deadline::Hard,
            after: Duration::from_secs(1800),
        });
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(timeout.to_body().error.kind, "timeout_error");

        let failed = ServerError::from(BridgeError::SilentFailure { code: 1 });
        assert_eq!(failed.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn body_shape() {
        let body = serde_json::to_value(ServerError::BadRequest("prompt is empty".into()).to_body())
            .unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "type": "error",
                "error": {"type": "invalid_request_error", "message": "Invalid request: prompt is empty"}
            })
        );
    }
}
