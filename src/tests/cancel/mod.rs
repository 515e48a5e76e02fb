use std::{collections::HashSet, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{config::PipelineConfig, job::Stage, progress::EntryStatus};

use super::{Harness, MemoryStore, ScriptedExtractor, pipeline, rows};

#[tokio::test]
async fn cancelled_before_start_writes_nothing() {
    let harness = Harness::new(
        MemoryStore::with(&[("a/jan.pdf", "x"), ("a/feb.pdf", "y")]),
        ScriptedExtractor::default(),
    )
    .await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = harness.run(&pipeline(), &cancel).await.unwrap();
    assert_eq!(summary.done, 0);
    assert_eq!(summary.cancelled.len(), 2);
    assert!(
        summary
            .cancelled
            .iter()
            .all(|cancelled| cancelled.stage == Stage::Fetching)
    );
    assert_eq!(summary.failed_total(), 0);
    assert!(rows(&harness.warehouse).await.is_empty());
    assert!(harness.executor.extractor.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cancellation_stops_at_next_stage_boundary() {
    let cancel = CancellationToken::new();
    let extractor = ScriptedExtractor {
        cancel_on_call: Some(cancel.clone()),
        ..Default::default()
    };
    let harness = Harness::new(
        MemoryStore::with(&[("a/jan.pdf", "x"), ("a/feb.pdf", "y"), ("a/mar.pdf", "z")]),
        extractor,
    )
    .await;
    let config = PipelineConfig {
        concurrency_limit: 1,
        ..pipeline()
    };
    let summary = harness.run(&config, &cancel).await.unwrap();

    // The in-flight extraction completes, but nothing is written afterwards.
    assert_eq!(harness.executor.extractor.calls.lock().unwrap().len(), 1);
    assert_eq!(summary.done, 0);
    assert_eq!(summary.cancelled.len(), 3);
    let writing = summary
        .cancelled
        .iter()
        .filter(|cancelled| cancelled.stage == Stage::Writing)
        .count();
    assert_eq!(writing, 1);
    assert!(rows(&harness.warehouse).await.is_empty());

    let events = harness.reporter.events.lock().unwrap().clone();
    assert!(
        events
            .iter()
            .any(|(_, status)| *status == EntryStatus::Cancelled)
    );
}

#[tokio::test]
async fn run_timeout_cancels_remaining_documents() {
    let extractor = ScriptedExtractor {
        delay: Some(Duration::from_millis(400)),
        ..Default::default()
    };
    let harness = Harness::new(
        MemoryStore::with(&[
            ("t/a.pdf", "a"),
            ("t/b.pdf", "b"),
            ("t/c.pdf", "c"),
            ("t/d.pdf", "d"),
            ("t/e.pdf", "e"),
        ]),
        extractor,
    )
    .await;
    let config = PipelineConfig {
        concurrency_limit: 1,
        run_timeout_secs: Some(1),
        ..pipeline()
    };
    let caller = CancellationToken::new();
    let summary = harness.run(&config, &caller).await.unwrap();

    // The timeout only stops this run.
    assert!(!caller.is_cancelled());
    assert_eq!(summary.failed_total(), 0);
    assert_eq!(summary.done + summary.cancelled.len(), 5);
    assert!(summary.done >= 1);
    assert!(!summary.cancelled.is_empty());
    // Five sequential 400ms extractions cannot all fit in one second.
    assert!(summary.done < 5);

    let rows = rows(&harness.warehouse).await;
    assert_eq!(rows.len(), summary.done);
    let written = rows
        .iter()
        .map(|row| row.file_path.as_str())
        .collect::<HashSet<_>>();
    for cancelled in &summary.cancelled {
        assert!(!written.contains(cancelled.path.as_str()));
    }

    let events = harness.reporter.events.lock().unwrap().clone();
    for cancelled in &summary.cancelled {
        assert!(
            events
                .iter()
                .any(|(path, status)| *path == cancelled.path && *status == EntryStatus::Cancelled)
        );
    }
}
