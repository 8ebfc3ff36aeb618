// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Detection of live tool sub-processes under the CLI

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use tracing::trace;

/// Reports whether a process currently has children.
///
/// The invoker polls this while the CLI is silent: a long-running tool
/// invocation keeps the turn alive even when nothing is printed.
#[async_trait]
pub trait ChildProbe: Send + Sync {
    async fn has_live_children(&self, pid: u32) -> bool;
}

/// Probe backed by `/proc`, falling back to `pgrep -P`
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcChildProbe;

#[async_trait]
impl ChildProbe for ProcChildProbe {
    async fn has_live_children(&self, pid: u32) -> bool {
        if let Some(found) = proc_children(pid).await {
            return found;
        }
        pgrep_children(pid).await
    }
}

/// `None` when `/proc` has no task directory for `pid`
async fn proc_children(pid: u32) -> Option<bool> {
    let mut tasks = tokio::fs::read_dir(format!("/proc/{pid}/task")).await.ok()?;
    let mut readable = false;
    while let Ok(Some(task)) = tasks.next_entry().await {
        let Ok(children) = tokio::fs::read_to_string(task.path().join("children")).await else {
            continue;
        };
        readable = true;
        if !children.trim().is_empty() {
            trace!(pid, children = %children.trim(), "Live children found via /proc");
            return Some(true);
        }
    }
    readable.then_some(false)
}

async fn pgrep_children(pid: u32) -> bool {
    match tokio::process::Command::new("pgrep")
        .arg("-P")
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        Ok(status) => status.success(),
        Err(e) => {
            trace!(pid, error = %e, "pgrep unavailable");
            false
        }
    }
}

pub fn default_probe() -> Arc<dyn ChildProbe> {
    Arc::new(ProcChildProbe)
}
