// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! External conversation id to CLI session id mapping

mod clock;
mod persistence;
mod record;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use persistence::{
    FilePersistence, InMemoryPersistence, NoopPersistence, SessionMap, SessionPersistence,
};
pub use record::{SessionRecord, SessionStats};
pub use store::SessionStore;
