// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Pluggable durable storage for the session map

use super::record::SessionRecord;
use crate::error::{BridgeError, BridgeResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// Records keyed by external conversation id
pub type SessionMap = HashMap<String, SessionRecord>;

#[async_trait]
pub trait SessionPersistence: Send + Sync {
    /// Everything previously saved; empty when nothing was
    async fn load(&self) -> BridgeResult<SessionMap>;

    /// Replace the stored map wholesale
    async fn save(&self, sessions: &SessionMap) -> BridgeResult<()>;
}

/// Single JSON file, replaced atomically through a sibling `.tmp` file
#[derive(Debug, Clone)]
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}

#[async_trait]
impl SessionPersistence for FilePersistence {
    async fn load(&self) -> BridgeResult<SessionMap> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No session file yet");
                return Ok(SessionMap::new());
            }
            Err(e) => {
                return Err(BridgeError::Persistence(format!(
                    "reading {}: {e}",
                    self.path.display()
                )))
            }
        };
        serde_json::from_slice(&bytes).map_err(|e| {
            BridgeError::Persistence(format!("parsing {}: {e}", self.path.display()))
        })
    }

    async fn save(&self, sessions: &SessionMap) -> BridgeResult<()> {
        let write_err =
            |e: std::io::Error| BridgeError::Persistence(format!("writing {}: {e}", self.path.display()));

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let json = serde_json::to_vec_pretty(sessions)
            .map_err(|e| BridgeError::Persistence(format!("encoding sessions: {e}")))?;

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(write_err)?;
        debug!(path = %self.path.display(), count = sessions.len(), "Sessions saved");
        Ok(())
    }
}

/// Keeps nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPersistence;

#[async_trait]
impl SessionPersistence for NoopPersistence {
    async fn load(&self) -> BridgeResult<SessionMap> {
        Ok(SessionMap::new())
    }

    async fn save(&self, _sessions: &SessionMap) -> BridgeResult<()> {
        Ok(())
    }
}

/// In-process persistence, for tests and embedding
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    saved: Mutex<SessionMap>,
    saves: AtomicUsize,
}

impl InMemoryPersistence {
    pub fn new(initial: SessionMap) -> Self {
        Self {
            saved: Mutex::new(initial),
            saves: AtomicUsize::new(0),
        }
    }

    pub async fn contents(&self) -> SessionMap {
        self.saved.lock().await.clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionPersistence for InMemoryPersistence {
    async fn load(&self) -> BridgeResult<SessionMap> {
        Ok(self.saved.lock().await.clone())
    }

    async fn save(&self, sessions: &SessionMap) -> BridgeResult<()> {
        *self.saved.lock().await = sessions.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
