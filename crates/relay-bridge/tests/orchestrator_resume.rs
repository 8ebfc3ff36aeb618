// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Session resumption through the real bridge and a file-backed store

mod common;

use common::{fast_timeouts, fixture, invoker, ScriptSpawner};
use relay_bridge::session::FilePersistence;
use relay_bridge::{CliBridge, Orchestrator, RetryConfig, SessionStore, TurnRequest};
use std::sync::Arc;
use std::time::Duration;

const SESSION: &str = "5d1c6f0e-8a3b-4c2d-9e7f-1a2b3c4d5e6f";

/// Fails any `--resume dead-session` invocation the way the CLI does,
/// otherwise replays a full turn
fn resume_aware_script() -> String {
    format!(
        r#"case " $* " in
  *" --resume dead-session "*) echo 'No conversation found with session ID: dead-session' >&2; exit 1 ;;
esac
cat '{}'"#,
        fixture("plain_turn.jsonl").display()
    )
}

fn orchestrator(spawner: Arc<ScriptSpawner>, sessions: Arc<SessionStore>) -> Orchestrator {
    Orchestrator::new(
        Arc::new(CliBridge::new(invoker(spawner, fast_timeouts()))),
        sessions,
        RetryConfig {
            max_retries: 1,
            backoff_ms: 0,
        },
        "claude-cli",
    )
}

#[tokio::test]
async fn dead_resume_id_is_replaced_and_never_reused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.json");
    let sessions = Arc::new(SessionStore::new(
        Duration::from_secs(3600),
        Arc::new(FilePersistence::new(&path)),
    ));
    sessions.upsert("channel-42", "dead-session").await;

    let spawner = ScriptSpawner::new(resume_aware_script());
    let orchestrator = orchestrator(spawner.clone(), sessions.clone());

    let outcome = orchestrator
        .run(&TurnRequest::new("hello").conversation("channel-42"))
        .await
        .unwrap();

    assert_eq!(outcome.text, "Hello, world");
    let launches = spawner.launches();
    assert_eq!(launches.len(), 2);
    assert!(launches[0].args.windows(2).any(|w| w == ["--resume", "dead-session"]));
    assert!(!launches[1].args.iter().any(|a| a == "--resume" || a == "dead-session"));

    let record = sessions.lookup("channel-42").await.unwrap();
    assert_eq!(record.internal_id, SESSION);

    // Next turn resumes the new id
    orchestrator
        .run(&TurnRequest::new("again").conversation("channel-42"))
        .await
        .unwrap();
    let launches = spawner.launches();
    assert_eq!(launches.len(), 3);
    assert!(launches[2].args.windows(2).any(|w| w == ["--resume", SESSION]));
    assert!(!launches[2].args.iter().any(|a| a == "dead-session"));

    // Survives a restart
    sessions.persist().await.unwrap();
    let restarted = SessionStore::new(
        Duration::from_secs(3600),
        Arc::new(FilePersistence::new(&path)),
    );
    assert_eq!(restarted.restore().await.unwrap(), 1);
    let record = restarted.lookup("channel-42").await.unwrap();
    assert_eq!(record.internal_id, SESSION);
    assert_eq!(record.message_count, 2);
}

#[tokio::test]
async fn streaming_turn_delivers_envelope_and_records_session() {
    let sessions = Arc::new(SessionStore::in_memory(Duration::from_secs(3600)));
    let spawner = ScriptSpawner::new(resume_aware_script());

    let mut rx = orchestrator(spawner, sessions.clone())
        .stream(TurnRequest::new("hello").conversation("dm-7"));
    let mut frames = Vec::new();
    while let Some(frame) = rx.recv().await {
        frames.push(frame.name());
    }

    assert_eq!(frames.first(), Some(&"message_start"));
    assert_eq!(frames.last(), Some(&"message_stop"));
    assert_eq!(
        sessions.lookup("dm-7").await.map(|r| r.internal_id),
        Some(SESSION.to_string())
    );
}
