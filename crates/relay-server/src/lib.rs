// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! HTTP front end for the CLI relay
//!
//! Accepts turns on `POST /v1/messages`, answering with a buffered message
//! object or an SSE stream, and exposes the session map for inspection and
//! invalidation. Authentication is left to whatever sits in front of it.

pub mod config;
pub mod error;
pub mod handlers;
pub mod server;
pub mod state;

pub use config::RelayConfig;
pub use error::{ServerError, ServerResult};
pub use server::{build_app, Server};
pub use state::AppState;
