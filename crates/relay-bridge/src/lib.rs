// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Streaming bridge between a `stream-json` CLI subprocess and an SSE
//! message protocol, with multi-turn session continuity.
//!
//! The layers, leaves first:
//!
//! - [`invoker`] spawns the CLI with a sanitized environment and supervises
//!   its idle and hard deadlines.
//! - [`drainer`] turns stdout into records, including output flushed after
//!   end of stream.
//! - [`translator`] rebuilds a well-formed outbound envelope.
//! - [`session`] maps external conversation ids to CLI session ids.
//! - [`orchestrator`] ties them together with resume fallback and retries.

pub mod bridge;
pub mod config;
pub mod drainer;
pub mod env;
pub mod error;
pub mod events;
pub mod invoker;
pub mod liveness;
pub mod orchestrator;
pub mod request;
pub mod session;
pub mod sink;
pub mod translator;

pub use bridge::{new_message_id, CliBridge, TurnExecutor};
pub use config::{BridgeConfig, CliConfig, RetryConfig, SessionConfig, TimeoutConfig};
pub use error::{BridgeError, BridgeResult, Deadline};
pub use events::{OutboundEvent, RawEvent, Usage};
pub use invoker::{LaunchSpec, ProcessInvoker, Spawner, TokioSpawner};
pub use orchestrator::{Orchestrator, TurnRequest};
pub use request::InvocationRequest;
pub use session::{SessionRecord, SessionStats, SessionStore};
pub use sink::FrameSink;
pub use translator::{Translator, TurnOutcome};
