// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Invocation request passed to the process invoker

/// Everything needed to run one CLI turn
///
/// Built once per external request by the orchestrator. Retries derive new
/// values with [`InvocationRequest::without_resume`] rather than mutating.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationRequest {
    /// User prompt for this turn
    pub prompt: String,

    /// Text appended to the CLI's own system prompt
    pub system_prompt: Option<String>,

    /// Tools the CLI may use; `None` keeps the CLI's defaults
    pub allowed_tools: Option<Vec<String>>,

    /// Model override
    pub model: Option<String>,

    /// Internal session id to resume
    pub resume_session: Option<String>,

    /// Continue the most recent conversation in the working directory.
    /// Ignored when `resume_session` is set.
    pub continue_latest: bool,

    /// Spending ceiling in USD
    pub max_budget_usd: Option<f64>,
}

/// Builder for invocation requests
impl InvocationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn allowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = Some(tools.into_iter().map(Into::into).collect());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn resume(mut self, session_id: impl Into<String>) -> Self {
        self.resume_session = Some(session_id.into());
        self
    }

    pub fn continue_latest(mut self, continue_latest: bool) -> Self {
        self.continue_latest = continue_latest;
        self
    }

    pub fn max_budget_usd(mut self, budget: f64) -> Self {
        self.max_budget_usd = Some(budget);
        self
    }

    /// Copy of this request that starts a fresh conversation
    pub fn without_resume(&self) -> Self {
        Self {
            resume_session: None,
            continue_latest: false,
            ..self.clone()
        }
    }
}
