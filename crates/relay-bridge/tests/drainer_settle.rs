// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Output captured after end of stream is still drained

use relay_bridge::drainer::EventDrainer;
use relay_bridge::RawEvent;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[tokio::test(start_paused = true)]
async fn lines_arriving_within_settle_window_are_yielded() {
    let (mut writer, reader) = tokio::io::duplex(1024);
    let mut drainer = EventDrainer::new(reader, Duration::from_millis(500));
    let capture = drainer.buffer();

    writer
        .write_all(b"{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"s\"}\n")
        .await
        .unwrap();
    drop(writer);

    assert!(matches!(
        drainer.next_record().await.unwrap(),
        Some(RawEvent::System { .. })
    ));

    // Late writer: lands after the reader has seen EOF, before the settle
    // interval runs out
    let late = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        capture
            .append(b"{\"type\":\"stream_event\",\"event\":{\"type\":\"message_stop\"}}\n")
            .await;
        capture
            .append(b"{\"type\":\"result\",\"result\":\"done\",\"session_id\":\"s\"}\n")
            .await;
    });

    assert!(matches!(
        drainer.next_record().await.unwrap(),
        Some(RawEvent::StreamEvent { .. })
    ));
    let Some(RawEvent::Result(result)) = drainer.next_record().await.unwrap() else {
        panic!("expected the late result record");
    };
    assert_eq!(result.result.as_deref(), Some("done"));
    assert_eq!(drainer.next_record().await.unwrap(), None);
    late.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn lines_after_settle_window_are_not_waited_for() {
    let (writer, reader) = tokio::io::duplex(64);
    drop(writer);
    let mut drainer = EventDrainer::new(reader, Duration::from_millis(50));
    let capture = drainer.buffer();

    assert_eq!(drainer.next_line().await.unwrap(), None);

    capture.append(b"too late\n").await;
    assert_eq!(drainer.next_line().await.unwrap(), None);
}
