// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Shared helpers for bridge integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use relay_bridge::liveness::ChildProbe;
use relay_bridge::{BridgeResult, CliConfig, LaunchSpec, ProcessInvoker, Spawner, TimeoutConfig, TokioSpawner};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::process::Child;

/// Records every launch spec, then runs `sh -c <script>` with the same
/// environment. The generated CLI arguments are passed as `"$@"`.
pub struct ScriptSpawner {
    script: String,
    launches: Mutex<Vec<LaunchSpec>>,
}

impl ScriptSpawner {
    pub fn new(script: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            script: script.into(),
            launches: Mutex::new(Vec::new()),
        })
    }

    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.launches.lock().unwrap().clone()
    }
}

impl Spawner for ScriptSpawner {
    fn spawn(&self, spec: &LaunchSpec) -> BridgeResult<Child> {
        self.launches.lock().unwrap().push(spec.clone());

        let mut args = vec!["-c".to_string(), self.script.clone(), "claude".to_string()];
        args.extend(spec.args.iter().cloned());
        TokioSpawner.spawn(&LaunchSpec {
            program: "sh".into(),
            args,
            env: spec.env.clone(),
            cwd: spec.cwd.clone(),
        })
    }
}

/// Probe with a fixed answer that counts how often it was asked
#[derive(Default)]
pub struct FixedProbe {
    alive: bool,
    calls: AtomicUsize,
}

impl FixedProbe {
    pub fn new(alive: bool) -> Arc<Self> {
        Arc::new(Self {
            alive,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChildProbe for FixedProbe {
    async fn has_live_children(&self, _pid: u32) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.alive
    }
}

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

/// Script that replays a fixture file as CLI output
pub fn replay(name: &str) -> String {
    format!("cat '{}'", fixture(name).display())
}

pub fn fast_timeouts() -> TimeoutConfig {
    TimeoutConfig {
        idle_secs: 30,
        hard_secs: 60,
        kill_grace_secs: 1,
        liveness_interval_secs: 1,
        settle_ms: 20,
    }
}

pub fn invoker(spawner: Arc<ScriptSpawner>, timeouts: TimeoutConfig) -> ProcessInvoker {
    ProcessInvoker::new(CliConfig::default(), timeouts)
        .with_spawner(spawner)
        .with_probe(FixedProbe::new(false))
}
