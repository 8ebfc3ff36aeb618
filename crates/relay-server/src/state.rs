// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Server state management

use relay_bridge::{Orchestrator, SessionStore};
use std::sync::Arc;

/// Shared server state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    /// Session store behind the orchestrator
    pub fn sessions(&self) -> &Arc<SessionStore> {
        self.orchestrator.sessions()
    }
}
