// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! TTL-bounded session store
//!
//! The store is the sole owner of its map. Callers only ever receive copies
//! of records, and every mutation goes through one of the methods below while
//! the lock is held, so each operation is atomic from the caller's side.

use super::clock::{Clock, SystemClock};
use super::persistence::{FilePersistence, NoopPersistence, SessionMap, SessionPersistence};
use super::record::{SessionRecord, SessionStats};
use crate::config::SessionConfig;
use crate::error::BridgeResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct SessionStore {
    sessions: Mutex<SessionMap>,
    ttl: Duration,
    persistence: Arc<dyn SessionPersistence>,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(ttl: Duration, persistence: Arc<dyn SessionPersistence>) -> Self {
        Self {
            sessions: Mutex::new(SessionMap::new()),
            ttl,
            persistence,
            clock: Arc::new(SystemClock),
        }
    }

    /// Store without durable backing
    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(ttl, Arc::new(NoopPersistence))
    }

    /// File-backed when `store-path` is configured, memory-only otherwise
    pub fn from_config(config: &SessionConfig) -> Self {
        let persistence: Arc<dyn SessionPersistence> = match &config.store_path {
            Some(path) => Arc::new(FilePersistence::new(path)),
            None => Arc::new(NoopPersistence),
        };
        Self::new(config.ttl(), persistence)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live record for `external_id`. An expired record is deleted and
    /// reported as absent.
    pub async fn lookup(&self, external_id: &str) -> Option<SessionRecord> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        let expired = sessions.get(external_id)?.is_expired(now, self.ttl);
        if expired {
            sessions.remove(external_id);
            debug!(conversation_id = external_id, "Session expired on lookup");
            return None;
        }
        sessions.get(external_id).cloned()
    }

    /// Record a successful turn, creating the record on first use
    pub async fn upsert(&self, external_id: &str, internal_id: &str) -> SessionRecord {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        let record = sessions
            .entry(external_id.to_string())
            .and_modify(|record| {
                if record.internal_id != internal_id {
                    debug!(
                        conversation_id = external_id,
                        old = %record.internal_id,
                        new = internal_id,
                        "Session id replaced"
                    );
                    record.internal_id = internal_id.to_string();
                }
                record.last_active = now;
                record.message_count += 1;
            })
            .or_insert_with(|| SessionRecord::new(external_id, internal_id, now));
        record.clone()
    }

    pub async fn remove(&self, external_id: &str) -> Option<SessionRecord> {
        let removed = self.sessions.lock().await.remove(external_id);
        if removed.is_some() {
            info!(conversation_id = external_id, "Session invalidated");
        }
        removed
    }

    pub async fn snapshot(&self) -> SessionStats {
        let mut sessions: Vec<SessionRecord> =
            self.sessions.lock().await.values().cloned().collect();
        sessions.sort_by(|a, b| b.last_active.cmp(&a.last_active));

        SessionStats {
            active: sessions.len(),
            total_messages: sessions.iter().map(|s| s.message_count).sum(),
            ttl_secs: self.ttl.as_secs(),
            oldest_activity: sessions.last().map(|s| s.last_active),
            newest_activity: sessions.first().map(|s| s.last_active),
            sessions,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Drop every expired record, returning how many went
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, record| !record.is_expired(now, self.ttl));
        let removed = before - sessions.len();
        if removed > 0 {
            info!(removed, remaining = sessions.len(), "Expired sessions swept");
        }
        removed
    }

    /// Load persisted records, discarding expired ones. Records already in
    /// memory win over persisted ones.
    pub async fn restore(&self) -> BridgeResult<usize> {
        let now = self.clock.now();
        let loaded = self.persistence.load().await?;
        let total = loaded.len();

        let mut sessions = self.sessions.lock().await;
        let mut restored = 0;
        for (external_id, record) in loaded {
            if record.is_expired(now, self.ttl) {
                continue;
            }
            if let std::collections::hash_map::Entry::Vacant(slot) = sessions.entry(external_id) {
                slot.insert(record);
                restored += 1;
            }
        }
        info!(restored, discarded = total - restored, "Sessions restored");
        Ok(restored)
    }

    /// Save the full map, returning the number of records written
    pub async fn persist(&self) -> BridgeResult<usize> {
        let copy = self.sessions.lock().await.clone();
        self.persistence.save(&copy).await?;
        Ok(copy.len())
    }

    /// Periodic sweep and save until `cancel` fires, then one final save
    pub fn spawn_maintenance(
        self: Arc<Self>,
        sweep_interval: Duration,
        save_interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = Instant::now();
            let mut sweep = tokio::time::interval_at(start + sweep_interval, sweep_interval);
            let mut save = tokio::time::interval_at(start + save_interval, save_interval);
            sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
            save.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sweep.tick() => {
                        self.sweep().await;
                    }
                    _ = save.tick() => {
                        if let Err(e) = self.persist().await {
                            warn!(error = %e, "Periodic session save failed");
                        }
                    }
                }
            }

            match self.persist().await {
                Ok(count) => info!(count, "Sessions saved on shutdown"),
                Err(e) => warn!(error = %e, "Final session save failed"),
            }
        })
    }
}
