// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! One CLI turn end to end: spawn, drain, translate, confirm exit

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::invoker::{Invocation, ProcessInvoker};
use crate::request::InvocationRequest;
use crate::sink::FrameSink;
use crate::translator::{Translator, TurnOutcome};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Runs a single turn and streams its frames into `sink`.
///
/// Implementations must leave the sink holding a well-formed envelope or
/// nothing at all, whatever the outcome.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TurnExecutor: Send + Sync {
    async fn execute(
        &self,
        request: &InvocationRequest,
        sink: &FrameSink,
    ) -> BridgeResult<TurnOutcome>;
}

/// Outbound message id
pub fn new_message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}

/// [`TurnExecutor`] backed by the real CLI
#[derive(Clone)]
pub struct CliBridge {
    invoker: ProcessInvoker,
}

impl CliBridge {
    pub fn new(invoker: ProcessInvoker) -> Self {
        Self { invoker }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(ProcessInvoker::new(config.cli.clone(), config.timeouts.clone()))
    }

    pub fn invoker(&self) -> &ProcessInvoker {
        &self.invoker
    }
}

#[async_trait]
impl TurnExecutor for CliBridge {
    async fn execute(
        &self,
        request: &InvocationRequest,
        sink: &FrameSink,
    ) -> BridgeResult<TurnOutcome> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.invoker.cli().default_model.clone());
        let mut translator = Translator::new(new_message_id(), model);

        let Invocation { mut events, handle } = self.invoker.spawn(request)?;
        let pid = handle.pid();
        let mut observed_session: Option<String> = None;

        // Stream then drain; the child keeps running until its stdout closes
        let drained: BridgeResult<()> = async {
            while let Some(record) = events.next_record().await? {
                if let Some(session_id) = record.session_id() {
                    if observed_session.as_deref() != Some(session_id) {
                        debug!(pid, session_id, "CLI session observed");
                        observed_session = Some(session_id.to_string());
                    }
                }
                sink.send_all(translator.push(record)).await;
            }
            Ok(())
        }
        .await;

        // Only after the drain phase do we confirm exit
        let exit = handle.wait().await;

        let report = match (drained, exit) {
            (_, Err(e)) | (Err(e), Ok(_)) => {
                warn!(pid, error = %e, frames = sink.frames_sent(), "CLI turn failed");
                sink.send_all(translator.abort()).await;
                return Err(e);
            }
            (Ok(()), Ok(report)) => report,
        };

        if !translator.is_done() {
            warn!(pid, lines = events.lines_read(), "CLI exited without a result record");
            sink.send_all(translator.abort()).await;
            return Err(BridgeError::MissingResult);
        }
        let Some(mut outcome) = translator.finish() else {
            return Err(BridgeError::MissingResult);
        };
        if outcome.session_id.is_none() {
            outcome.session_id = observed_session;
        }

        info!(
            pid,
            session_id = ?outcome.session_id,
            frames = sink.frames_sent(),
            skipped_lines = events.lines_skipped(),
            cost_usd = ?outcome.cost_usd,
            elapsed = ?report.elapsed,
            "CLI turn completed"
        );
        Ok(outcome)
    }
}
