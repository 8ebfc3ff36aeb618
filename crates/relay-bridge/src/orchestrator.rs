// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Request orchestration
//!
//! Resolves the conversation's session, runs the turn with the stored resume
//! id, falls back to a fresh conversation when resumption fails, retries
//! transient failures with a linear backoff and records the session id the
//! CLI reports.

use crate::bridge::{new_message_id, CliBridge, TurnExecutor};
use crate::config::{BridgeConfig, RetryConfig};
use crate::error::BridgeResult;
use crate::events::{OutboundEvent, Usage};
use crate::request::InvocationRequest;
use crate::session::SessionStore;
use crate::sink::FrameSink;
use crate::translator::{synthesized_envelope, TurnOutcome};
use relay_logging::preview;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Frames buffered between a streaming turn and its consumer
pub const STREAM_BUFFER: usize = 64;

/// A turn as requested by the routing layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub prompt: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default)]
    pub model: Option<String>,
    /// External conversation id; turns without one never resume
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub max_budget_usd: Option<f64>,
}

impl TurnRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    fn to_invocation(&self) -> InvocationRequest {
        InvocationRequest {
            prompt: self.prompt.clone(),
            system_prompt: self.system_prompt.clone(),
            allowed_tools: self.allowed_tools.clone(),
            model: self.model.clone(),
            resume_session: None,
            continue_latest: false,
            max_budget_usd: self.max_budget_usd,
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    executor: Arc<dyn TurnExecutor>,
    sessions: Arc<SessionStore>,
    retry: RetryConfig,
    default_model: String,
}

impl Orchestrator {
    pub fn new(
        executor: Arc<dyn TurnExecutor>,
        sessions: Arc<SessionStore>,
        retry: RetryConfig,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            sessions,
            retry,
            default_model: default_model.into(),
        }
    }

    /// Orchestrator over the real CLI
    pub fn from_config(config: &BridgeConfig, sessions: Arc<SessionStore>) -> Self {
        Self::new(
            Arc::new(CliBridge::from_config(config)),
            sessions,
            config.retry.clone(),
            config.cli.default_model.clone(),
        )
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Buffered turn
    pub async fn run(&self, turn: &TurnRequest) -> BridgeResult<TurnOutcome> {
        self.run_with_sink(turn, &FrameSink::discard()).await
    }

    /// Streaming turn. The turn runs on its own task and keeps going if the
    /// receiver is dropped. A failure before any frame was delivered arrives
    /// as a complete message carrying the error text.
    pub fn stream(&self, turn: TurnRequest) -> mpsc::Receiver<OutboundEvent> {
        let (sink, rx) = FrameSink::channel(STREAM_BUFFER);
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.run_with_sink(&turn, &sink).await {
                if sink.frames_sent() == 0 && !sink.is_detached() {
                    let model = turn.model.as_deref().unwrap_or(&this.default_model);
                    let text = format!("Request failed: {e}");
                    sink.send_all(synthesized_envelope(
                        &new_message_id(),
                        model,
                        &text,
                        "end_turn",
                        Usage::default(),
                    ))
                    .await;
                }
            }
        });
        rx
    }

    /// Run a turn against `sink`, applying resume fallback and retries
    pub async fn run_with_sink(
        &self,
        turn: &TurnRequest,
        sink: &FrameSink,
    ) -> BridgeResult<TurnOutcome> {
        let conversation_id = turn.conversation_id.as_deref();
        let mut request = turn.to_invocation();

        if let Some(conversation_id) = conversation_id {
            if let Some(record) = self.sessions.lookup(conversation_id).await {
                debug!(
                    conversation_id,
                    session_id = %record.internal_id,
                    turns = record.message_count,
                    "Resuming session"
                );
                request = request.resume(record.internal_id);
            }
        }

        info!(
            conversation_id,
            resume = request.resume_session.is_some(),
            prompt = %preview(&turn.prompt, 80),
            "Starting turn"
        );

        let mut retries = 0;
        let mut fell_back = false;
        let outcome = loop {
            let e = match self.executor.execute(&request, sink).await {
                Ok(outcome) => break outcome,
                Err(e) => e,
            };

            // A partially delivered stream cannot be replayed
            if sink.frames_sent() > 0 || sink.is_detached() {
                error!(conversation_id, error = %e, "Turn failed after output was delivered");
                return Err(e);
            }

            if let Some(stale) = request.resume_session.as_deref() {
                if !fell_back && e.is_resume_fallback_candidate() {
                    warn!(
                        conversation_id,
                        session_id = stale,
                        error = %e,
                        "Resume failed; retrying as a fresh conversation"
                    );
                    if let Some(conversation_id) = conversation_id {
                        self.sessions.remove(conversation_id).await;
                    }
                    fell_back = true;
                    request = request.without_resume();
                    continue;
                }
            }

            if e.is_retryable() && retries < self.retry.max_retries {
                retries += 1;
                let delay = self.retry.backoff_for(retries);
                warn!(conversation_id, attempt = retries, delay = ?delay, error = %e, "Transient CLI failure; retrying");
                tokio::time::sleep(delay).await;
                continue;
            }

            error!(conversation_id, error = %e, "Turn failed");
            return Err(e);
        };

        match (conversation_id, outcome.session_id.as_deref()) {
            (Some(conversation_id), Some(session_id)) => {
                self.sessions.upsert(conversation_id, session_id).await;
            }
            (Some(conversation_id), None) => {
                debug!(conversation_id, "Turn reported no session id; nothing recorded");
            }
            (None, _) => {}
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::MockTurnExecutor;
    use crate::error::BridgeError;
    use crate::error::Deadline;
    use async_trait::async_trait;
    use mockall::Sequence;
    use std::time::Duration;

    fn outcome(session_id: &str) -> TurnOutcome {
        TurnOutcome {
            message_id: "msg_1".into(),
            model: "claude-cli".into(),
            text: "ok".into(),
            session_id: Some(session_id.into()),
            stop_reason: "end_turn".into(),
            usage: Usage::default(),
            is_error: false,
            cost_usd: None,
            duration_ms: None,
            num_turns: None,
        }
    }

    fn no_backoff() -> RetryConfig {
        RetryConfig {
            max_retries: 1,
            backoff_ms: 0,
        }
    }

    fn orchestrator(mock: MockTurnExecutor, sessions: Arc<SessionStore>) -> Orchestrator {
        Orchestrator::new(Arc::new(mock), sessions, no_backoff(), "claude-cli")
    }

    fn store() -> Arc<SessionStore> {
        Arc::new(SessionStore::in_memory(Duration::from_secs(3600)))
    }

    #[tokio::test]
    async fn resumes_stored_session_and_records_new_id() {
        let sessions = store();
        sessions.upsert("chan", "sess-1").await;

        let mut mock = MockTurnExecutor::new();
        mock.expect_execute()
            .times(1)
            .withf(|req, _| req.resume_session.as_deref() == Some("sess-1"))
            .returning(|_, _| Ok(outcome("sess-1b")));

        let result = orchestrator(mock, sessions.clone())
            .run(&TurnRequest::new("hi").conversation("chan"))
            .await
            .unwrap();

        assert_eq!(result.session_id.as_deref(), Some("sess-1b"));
        let record = sessions.lookup("chan").await.unwrap();
        assert_eq!(record.internal_id, "sess-1b");
        assert_eq!(record.message_count, 2);
    }

    #[tokio::test]
    async fn failed_resume_falls_back_to_fresh_conversation() {
        let sessions = store();
        sessions.upsert("chan", "dead").await;

        let mut seq = Sequence::new();
        let mut mock = MockTurnExecutor::new();
        mock.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|req, _| req.resume_session.as_deref() == Some("dead"))
            .returning(|_, _| {
                Err(BridgeError::ProcessFailed {
                    code: 1,
                    stderr: "No conversation found with session ID: dead".into(),
                })
            });
        mock.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|req, _| req.resume_session.is_none() && !req.continue_latest)
            .returning(|_, _| Ok(outcome("fresh")));

        orchestrator(mock, sessions.clone())
            .run(&TurnRequest::new("hi").conversation("chan"))
            .await
            .unwrap();

        let record = sessions.lookup("chan").await.unwrap();
        assert_eq!(record.internal_id, "fresh");
        assert_eq!(record.message_count, 1);
    }

    #[tokio::test]
    async fn failed_fallback_still_invalidates_session() {
        let sessions = store();
        sessions.upsert("chan", "dead").await;

        let mut mock = MockTurnExecutor::new();
        mock.expect_execute()
            .withf(|req, _| req.resume_session.is_some())
            .times(1)
            .returning(|_, _| Err(BridgeError::SilentFailure { code: 1 }));
        mock.expect_execute()
            .withf(|req, _| req.resume_session.is_none())
            .times(2)
            .returning(|_, _| Err(BridgeError::SilentFailure { code: 1 }));

        let result = orchestrator(mock, sessions.clone())
            .run(&TurnRequest::new("hi").conversation("chan"))
            .await;

        assert!(matches!(result, Err(BridgeError::SilentFailure { .. })));
        assert!(sessions.lookup("chan").await.is_none());
    }

    #[tokio::test]
    async fn timeouts_are_not_retried() {
        let sessions = store();
        sessions.upsert("chan", "sess").await;

        let mut mock = MockTurnExecutor::new();
        mock.expect_execute().times(1).returning(|_, _| {
            Err(BridgeError::Timeout {
                deadline: Deadline::Idle,
                after: Duration::from_secs(300),
            })
        });

        let result = orchestrator(mock, sessions.clone())
            .run(&TurnRequest::new("hi").conversation("chan"))
            .await;

        assert!(matches!(result, Err(BridgeError::Timeout { .. })));
        assert!(sessions.lookup("chan").await.is_some());
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let mut seq = Sequence::new();
        let mut mock = MockTurnExecutor::new();
        mock.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(BridgeError::MissingResult));
        mock.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(outcome("s")));

        let result = orchestrator(mock, store()).run(&TurnRequest::new("hi")).await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn turns_without_conversation_id_record_nothing() {
        let sessions = store();
        let mut mock = MockTurnExecutor::new();
        mock.expect_execute()
            .withf(|req, _| req.resume_session.is_none())
            .returning(|_, _| Ok(outcome("s")));

        orchestrator(mock, sessions.clone())
            .run(&TurnRequest::new("hi"))
            .await
            .unwrap();

        assert!(sessions.is_empty().await);
    }

    #[tokio::test]
    async fn stream_failure_before_output_yields_error_envelope() {
        let mut mock = MockTurnExecutor::new();
        mock.expect_execute()
            .returning(|_, _| Err(BridgeError::BinaryNotFound("claude".into())));

        let mut rx = orchestrator(mock, store()).stream(TurnRequest::new("hi"));
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }

        assert_eq!(frames.len(), 6);
        assert_eq!(frames.last(), Some(&OutboundEvent::MessageStop));
        let OutboundEvent::ContentBlockDelta { delta, .. } = &frames[2] else {
            panic!("expected text delta");
        };
        let crate::events::OutboundDelta::TextDelta { text } = delta;
        assert!(text.contains("CLI binary not found"));
    }

    /// Delivers one frame and then fails
    struct FailsMidStream;

    #[async_trait]
    impl TurnExecutor for FailsMidStream {
        async fn execute(
            &self,
            _request: &InvocationRequest,
            sink: &FrameSink,
        ) -> BridgeResult<TurnOutcome> {
            sink.send(OutboundEvent::MessageStart {
                message: serde_json::json!({}),
            })
            .await;
            Err(BridgeError::SilentFailure { code: 1 })
        }
    }

    #[tokio::test]
    async fn no_retry_after_frames_were_delivered() {
        let sessions = store();
        sessions.upsert("chan", "sess").await;
        let orchestrator = Orchestrator::new(
            Arc::new(FailsMidStream),
            sessions.clone(),
            no_backoff(),
            "claude-cli",
        );

        let mut rx = orchestrator.stream(TurnRequest::new("hi").conversation("chan"));
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }

        assert_eq!(frames.len(), 1);
        assert!(sessions.lookup("chan").await.is_some());
    }
}
