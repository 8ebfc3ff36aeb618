// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Server configuration
//!
//! A TOML file supplies everything; command-line flags (or their `RELAY_*`
//! environment variables) override individual values afterwards.
//!
//! ```toml
//! bind = "127.0.0.1:8787"
//!
//! [cli]
//! binary = "/usr/local/bin/claude"
//! env-denylist = ["CLAUDECODE", "CLAUDE_CODE_*"]
//!
//! [timeouts]
//! idle-secs = 600
//!
//! [sessions]
//! store-path = "/var/lib/relay/sessions.json"
//! ```

use anyhow::Context;
use relay_bridge::BridgeConfig;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

pub const DEFAULT_PORT: u16 = 8787;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RelayConfig {
    /// Address the HTTP server listens on
    pub bind: SocketAddr,

    #[serde(flatten)]
    pub bridge: BridgeConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            bridge: BridgeConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Parse a TOML document
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("invalid relay configuration")
    }

    /// Load `path`, or defaults when no file is given
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("in {}", path.display()))
    }
}

/// Platform data directory location of the session file
pub fn default_store_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("relay").join("sessions.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn empty_document_is_all_defaults() {
        assert_eq!(RelayConfig::from_toml("").unwrap(), RelayConfig::default());
    }

    #[test]
    fn loads_sections_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
bind = "0.0.0.0:9000"

[cli]
binary = "/opt/claude"
extra-args = ["--dangerously-skip-permissions"]

[timeouts]
idle-secs = 42

[sessions]
ttl-secs = 3600
store-path = "/tmp/relay-sessions.json"
"#
        )
        .unwrap();

        let config = RelayConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.bind.port(), 9000);
        assert_eq!(config.bridge.cli.binary, "/opt/claude");
        assert_eq!(config.bridge.cli.extra_args, vec!["--dangerously-skip-permissions"]);
        assert_eq!(config.bridge.timeouts.idle(), Duration::from_secs(42));
        assert_eq!(config.bridge.timeouts.hard_secs, 1800);
        assert_eq!(config.bridge.sessions.ttl(), Duration::from_secs(3600));
        assert_eq!(
            config.bridge.sessions.store_path,
            Some(PathBuf::from("/tmp/relay-sessions.json"))
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = RelayConfig::load(Some(Path::new("/nonexistent/relay.toml"))).unwrap_err();
        assert!(err.to_string().contains("reading config file"));
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(RelayConfig::from_toml("[timeouts]\nidle-secs = \"soon\"").is_err());
    }
}
