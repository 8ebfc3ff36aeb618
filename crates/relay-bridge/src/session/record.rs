// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Link between one external conversation and the CLI's resumable session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub internal_id: String,
    pub external_id: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    /// Successful turns recorded against this conversation
    pub message_count: u64,
}

impl SessionRecord {
    pub fn new(
        external_id: impl Into<String>,
        internal_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            internal_id: internal_id.into(),
            external_id: external_id.into(),
            created_at: now,
            last_active: now,
            message_count: 1,
        }
    }

    /// Idle longer than `ttl` at `now`. Records stamped in the future never
    /// expire.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now.signed_duration_since(self.last_active)
            .to_std()
            .map(|idle| idle > ttl)
            .unwrap_or(false)
    }
}

/// Read-only view of the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub active: usize,
    pub total_messages: u64,
    pub ttl_secs: u64,
    pub oldest_activity: Option<DateTime<Utc>>,
    pub newest_activity: Option<DateTime<Utc>>,
    /// Records ordered by most recent activity first
    pub sessions: Vec<SessionRecord>,
}
