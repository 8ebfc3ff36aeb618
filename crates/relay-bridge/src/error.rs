// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error taxonomy for the bridge

use std::time::Duration;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Which of the two subprocess deadlines fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// No output (and no live tool sub-process) for the idle window
    Idle,
    /// Absolute wall-clock ceiling
    Hard,
}

impl std::fmt::Display for Deadline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Deadline::Idle => write!(f, "idle"),
            Deadline::Hard => write!(f, "hard"),
        }
    }
}

/// Errors that can occur while running a turn through the CLI
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Failed to spawn CLI process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("CLI binary not found: {0}")]
    BinaryNotFound(String),

    #[error("CLI exited with code {code}: {stderr}")]
    ProcessFailed { code: i32, stderr: String },

    #[error("CLI exited with code {code} without any error output")]
    SilentFailure { code: i32 },

    #[error("CLI terminated after exceeding the {deadline} deadline ({after:?})")]
    Timeout { deadline: Deadline, after: Duration },

    #[error("CLI output ended without a result record")]
    MissingResult,

    #[error("Failed reading CLI output: {0}")]
    Stream(#[source] std::io::Error),

    #[error("Session persistence failed: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    /// True for invocation failures worth a short-backoff retry.
    ///
    /// Timeouts are excluded: a turn that already ran into a deadline is
    /// likely to do so again.
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::Spawn(_)
            | BridgeError::ProcessFailed { .. }
            | BridgeError::SilentFailure { .. }
            | BridgeError::MissingResult
            | BridgeError::Stream(_) => true,
            BridgeError::BinaryNotFound(_)
            | BridgeError::Timeout { .. }
            | BridgeError::Persistence(_)
            | BridgeError::Config(_) => false,
        }
    }

    /// True when a failure with a resume id attached should drop the resume
    /// id and retry as a fresh conversation.
    pub fn is_resume_fallback_candidate(&self) -> bool {
        matches!(
            self,
            BridgeError::ProcessFailed { .. }
                | BridgeError::SilentFailure { .. }
                | BridgeError::MissingResult
        )
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Stream(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_never_retried() {
        let err = BridgeError::Timeout {
            deadline: Deadline::Idle,
            after: Duration::from_secs(5),
        };
        assert!(!err.is_retryable());
        assert!(!err.is_resume_fallback_candidate());
    }

    #[test]
    fn process_failures_trigger_both_recovery_paths() {
        let err = BridgeError::ProcessFailed {
            code: 1,
            stderr: "No conversation found with session ID: abc".into(),
        };
        assert!(err.is_retryable());
        assert!(err.is_resume_fallback_candidate());
        assert_eq!(
            err.to_string(),
            "CLI exited with code 1: No conversation found with session ID: abc"
        );
    }

    #[test]
    fn missing_binary_is_terminal() {
        let err = BridgeError::BinaryNotFound("claude".into());
        assert!(!err.is_retryable());
        assert!(!err.is_resume_fallback_candidate());
    }
}
