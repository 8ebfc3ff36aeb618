// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Bridge configuration
//!
//! Every section deserializes from kebab-case keys and falls back to its
//! defaults field by field, so a config file only needs the values it changes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variables the CLI uses to detect that it runs inside one of
/// its own sessions. A child that sees any of them refuses to start or hangs.
pub const DEFAULT_ENV_DENYLIST: &[&str] =
    &["CLAUDECODE", "CLAUDE_CODE_ENTRYPOINT", "CLAUDE_CODE_SSE_PORT"];

/// How to invoke the external CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CliConfig {
    /// Binary name or path
    pub binary: String,

    /// Working directory for the child; inherits ours when unset
    pub working_dir: Option<PathBuf>,

    /// Arguments placed before the generated ones (e.g. permission flags)
    pub extra_args: Vec<String>,

    /// Environment variable names stripped from the child. A trailing `*`
    /// matches by prefix.
    pub env_denylist: Vec<String>,

    /// Model reported in outbound frames when the request names none
    pub default_model: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            binary: "claude".to_string(),
            working_dir: None,
            extra_args: Vec::new(),
            env_denylist: DEFAULT_ENV_DENYLIST.iter().map(|s| s.to_string()).collect(),
            default_model: "claude-cli".to_string(),
        }
    }
}

/// Subprocess deadlines and drain timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TimeoutConfig {
    /// Kill after this long without output and without live tool processes
    pub idle_secs: u64,

    /// Kill after this long regardless of activity
    pub hard_secs: u64,

    /// Grace window between SIGTERM and SIGKILL
    pub kill_grace_secs: u64,

    /// How often to check whether the CLI has live child processes
    pub liveness_interval_secs: u64,

    /// How long to wait after end-of-output before the final buffer rescan
    pub settle_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            idle_secs: 300,
            hard_secs: 1800,
            kill_grace_secs: 5,
            liveness_interval_secs: 10,
            settle_ms: 500,
        }
    }
}

impl TimeoutConfig {
    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    pub fn hard(&self) -> Duration {
        Duration::from_secs(self.hard_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs.max(1))
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Session store lifetime and persistence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SessionConfig {
    /// Idle time after which a session record is forgotten
    pub ttl_secs: u64,

    /// Interval of the proactive expiry sweep
    pub sweep_interval_secs: u64,

    /// Interval of the periodic save
    pub save_interval_secs: u64,

    /// Where to persist the map; no persistence when unset
    pub store_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 60 * 60,
            sweep_interval_secs: 5 * 60,
            save_interval_secs: 60,
            store_path: None,
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs.max(1))
    }
}

/// Transient-failure retry policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RetryConfig {
    /// Extra attempts after a retryable invocation failure
    pub max_retries: u32,

    /// Base backoff; attempt `n` waits `n * backoff`
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

/// Complete bridge configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BridgeConfig {
    pub cli: CliConfig,
    pub timeouts: TimeoutConfig,
    pub sessions: SessionConfig,
    pub retry: RetryConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_sections_keep_defaults() {
        let json = serde_json::json!({
            "cli": { "binary": "/opt/claude/bin/claude" },
            "timeouts": { "idle-secs": 30 },
            "retry": { "max-retries": 3 }
        });

        let config: BridgeConfig = serde_json::from_value(json).unwrap();

        assert_eq!(config.cli.binary, "/opt/claude/bin/claude");
        assert_eq!(config.cli.env_denylist, CliConfig::default().env_denylist);
        assert_eq!(config.timeouts.idle(), Duration::from_secs(30));
        assert_eq!(config.timeouts.hard_secs, 1800);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.backoff_ms, 1000);
        assert_eq!(config.sessions, SessionConfig::default());
    }

    #[test]
    fn backoff_grows_linearly() {
        let retry = RetryConfig {
            max_retries: 2,
            backoff_ms: 250,
        };
        assert_eq!(retry.backoff_for(1), Duration::from_millis(250));
        assert_eq!(retry.backoff_for(2), Duration::from_millis(500));
    }

    #[test]
    fn zero_intervals_are_clamped() {
        let timeouts = TimeoutConfig {
            liveness_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(timeouts.liveness_interval(), Duration::from_secs(1));
    }
}
