use std::sync::atomic::Ordering;

use tokio_util::sync::CancellationToken;

use crate::{
    job::{JobError, Stage, storage::warehouse::Client as _},
    model::{ExtractionMetadata, ExtractionResult, ObjectRef, OutputRecord},
    progress::{EntryStatus, RunPhase},
};

use crate::{
    deploy::local::db::LocalWarehouse,
    job::JobExecutor,
    progress::RecordingReporter,
};

use super::{FailingWarehouse, Harness, MemoryStore, ScriptedExtractor, TABLE, pipeline, rows};

#[tokio::test]
async fn writes_one_row_per_document() {
    let harness = Harness::new(
        MemoryStore::with(&[
            ("invoices/jan.pdf", "January total 10"),
            ("invoices/2024/feb.png", "February total 20"),
            ("receipts/a.pdf", "outside prefix"),
        ]),
        ScriptedExtractor::default(),
    )
    .await;
    let config = crate::config::PipelineConfig {
        storage_prefix: "invoices/".into(),
        ..pipeline()
    };
    let summary = harness
        .run(&config, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.listed, 2);
    assert_eq!(summary.done, 2);
    assert_eq!(summary.failed_total(), 0);

    let rows = rows(&harness.warehouse).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].file_path, "invoices/jan.pdf");
    assert_eq!(rows[1].file_name, "jan.pdf");
    let content = rows[1].content();
    assert_eq!(content["markdown"], "January total 10");
    assert_eq!(content["chunks"][0]["chunk_type"], "paragraph");
    assert_eq!(content["metadata"]["extractor"], "scripted");
    assert_eq!(content["metadata"]["file_size"], 16);

    let phases = harness.reporter.phases.lock().unwrap().clone();
    assert_eq!(phases.last(), Some(&RunPhase::Completed));
}

#[tokio::test]
async fn rerun_replaces_rows_instead_of_duplicating() {
    let harness = Harness::new(
        MemoryStore::with(&[("a/jan.pdf", "v1"), ("a/feb.pdf", "v1")]),
        ScriptedExtractor::default(),
    )
    .await;
    let config = crate::config::PipelineConfig {
        process_only_new: false,
        ..pipeline()
    };
    harness.run(&config, &CancellationToken::new()).await.unwrap();
    let first = rows(&harness.warehouse).await;
    let summary = harness.run(&config, &CancellationToken::new()).await.unwrap();
    assert_eq!(summary.done, 2);

    let second = rows(&harness.warehouse).await;
    assert_eq!(second.len(), 2);
    for (before, after) in first.iter().zip(&second) {
        assert_eq!(before.file_path, after.file_path);
        assert!(after.process_date >= before.process_date);
    }
    assert_eq!(harness.executor.extractor.calls_for("jan.pdf"), 2);
}

#[tokio::test]
async fn only_new_documents_are_processed() {
    let harness = Harness::new(
        MemoryStore::with(&[("a/jan.pdf", "new"), ("a/feb.pdf", "changed upstream")]),
        ScriptedExtractor::default(),
    )
    .await;
    let feb = ObjectRef {
        path: "a/feb.pdf".into(),
        size: 3,
        last_modified: None,
    };
    let existing = OutputRecord::new(
        &feb,
        ExtractionResult {
            markdown: "already there".into(),
            chunks: Vec::new(),
            metadata: ExtractionMetadata {
                file_name: "feb.pdf".into(),
                file_size: 3,
                extractor: "scripted".into(),
                extracted_at: chrono::Utc::now(),
            },
        },
    );
    let client = harness.warehouse.client();
    client.create_table(TABLE).await.unwrap();
    client.upsert(TABLE, &existing).await.unwrap();

    let summary = harness
        .run(&pipeline(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.listed, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.done, 1);
    assert_eq!(harness.executor.extractor.calls_for("feb.pdf"), 0);

    let rows = rows(&harness.warehouse).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].content()["markdown"], "already there");
    assert_eq!(rows[1].content()["markdown"], "new");
}

#[tokio::test]
async fn persistent_timeouts_fail_only_that_document() {
    let extractor = ScriptedExtractor::default();
    extractor
        .flaky
        .lock()
        .unwrap()
        .insert("mar.pdf".into(), 10);
    extractor
        .flaky
        .lock()
        .unwrap()
        .insert("apr.pdf".into(), 1);
    let harness = Harness::new(
        MemoryStore::with(&[
            ("q1/mar.pdf", "march"),
            ("q1/apr.pdf", "april"),
            ("q1/may.pdf", "may"),
        ]),
        extractor,
    )
    .await;
    let summary = harness
        .run(&pipeline(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.done, 2);
    assert_eq!(summary.failed_at(Stage::Extracting), 1);
    assert_eq!(summary.failures[0].path, "q1/mar.pdf");
    assert_eq!(summary.failures[0].stage, Stage::Extracting);
    assert_eq!(harness.executor.extractor.calls_for("mar.pdf"), 3);
    // One transient failure is absorbed by the retry.
    assert_eq!(harness.executor.extractor.calls_for("apr.pdf"), 2);

    let paths = rows(&harness.warehouse)
        .await
        .into_iter()
        .map(|row| row.file_path)
        .collect::<Vec<_>>();
    assert_eq!(paths, vec!["q1/apr.pdf", "q1/may.pdf"]);

    let events = harness.reporter.events.lock().unwrap().clone();
    assert!(events.iter().any(|(path, status)| path == "q1/mar.pdf"
        && matches!(status, EntryStatus::Failed(_))));
}

#[tokio::test]
async fn unsupported_documents_are_not_retried() {
    let mut extractor = ScriptedExtractor::default();
    extractor.rejected.insert("scan.tiff".into());
    let harness = Harness::new(
        MemoryStore::with(&[
            ("in/notes.docx", "PK"),
            ("in/scan.tiff", "II*"),
            ("in/ok.pdf", "fine"),
        ]),
        extractor,
    )
    .await;
    let summary = harness
        .run(&pipeline(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.done, 1);
    assert_eq!(summary.failed_at(Stage::Extracting), 2);
    // Rejected locally without calling the service.
    assert_eq!(harness.executor.extractor.calls_for("notes.docx"), 0);
    assert_eq!(harness.executor.extractor.calls_for("scan.tiff"), 1);
    assert!(
        summary
            .failures
            .iter()
            .all(|failure| failure.reason.starts_with("unsupported document"))
    );
}

#[tokio::test]
async fn empty_extraction_is_stored_with_empty_chunks() {
    let harness = Harness::new(
        MemoryStore::with(&[("blank.pdf", "  \n ")]),
        ScriptedExtractor::default(),
    )
    .await;
    harness
        .run(&pipeline(), &CancellationToken::new())
        .await
        .unwrap();
    let rows = rows(&harness.warehouse).await;
    assert_eq!(rows.len(), 1);
    let content = rows[0].content();
    assert_eq!(content["markdown"], "");
    assert_eq!(content["chunks"], serde_json::json!([]));
}

#[tokio::test]
async fn fetch_failure_is_reported_per_object() {
    let mut store = MemoryStore::with(&[("a/gone.pdf", "x"), ("a/here.pdf", "y")]);
    store.missing.insert("a/gone.pdf".into());
    let harness = Harness::new(store, ScriptedExtractor::default()).await;
    let summary = harness
        .run(&pipeline(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.done, 1);
    assert_eq!(summary.failed_at(Stage::Fetching), 1);
    assert_eq!(summary.failures[0].path, "a/gone.pdf");
    assert_eq!(harness.executor.extractor.calls_for("gone.pdf"), 0);
}

#[tokio::test]
async fn concurrency_is_bounded() {
    let paths = (0..12)
        .map(|idx| format!("batch/doc{idx:02}.pdf"))
        .collect::<Vec<_>>();
    let documents = paths
        .iter()
        .map(|path| (path.as_str(), "content"))
        .collect::<Vec<_>>();
    let harness = Harness::new(MemoryStore::with(&documents), ScriptedExtractor::default()).await;
    let config = crate::config::PipelineConfig {
        concurrency_limit: 3,
        ..pipeline()
    };
    let summary = harness
        .run(&config, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.done, 12);
    assert_eq!(rows(&harness.warehouse).await.len(), 12);
    let max = harness
        .executor
        .extractor
        .max_in_flight
        .load(Ordering::SeqCst);
    assert!((1..=3).contains(&max), "max in flight was {max}");
}

#[tokio::test]
async fn unavailable_store_fails_the_run() {
    let store = MemoryStore {
        list_unavailable: true,
        ..Default::default()
    };
    let harness = Harness::new(store, ScriptedExtractor::default()).await;
    let result = harness.run(&pipeline(), &CancellationToken::new()).await;
    assert!(matches!(result, Err(JobError::StoreUnavailable(_))));
    assert_eq!(harness.executor.store.list_calls.load(Ordering::SeqCst), 3);
    // The table is still created during preparation.
    assert!(rows(&harness.warehouse).await.is_empty());
}

#[tokio::test]
async fn write_failure_is_reported_per_record() {
    let local = LocalWarehouse::open("sqlite::memory:").await.unwrap();
    let mut warehouse = FailingWarehouse::new(local.client());
    warehouse.broken.insert("w/broken.pdf".into());
    warehouse
        .flaky
        .lock()
        .unwrap()
        .insert("w/busy.pdf".into(), 2);
    let executor = JobExecutor {
        store: MemoryStore::with(&[
            ("w/broken.pdf", "never stored"),
            ("w/busy.pdf", "stored after retries"),
            ("w/fine.pdf", "stored at once"),
        ]),
        extractor: ScriptedExtractor::default(),
        warehouse,
    };
    let summary = executor
        .run(
            TABLE,
            &pipeline(),
            &RecordingReporter::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary.done, 2);
    assert_eq!(summary.failed_at(Stage::Writing), 1);
    assert_eq!(summary.failed_total(), 1);
    assert_eq!(summary.failures[0].path, "w/broken.pdf");
    assert_eq!(summary.failures[0].stage, Stage::Writing);
    assert!(summary.failures[0].reason.starts_with("failed to write"));
    // Permanent errors are tried once; transient ones until they clear.
    assert_eq!(executor.warehouse.upserts_for("w/broken.pdf"), 1);
    assert_eq!(executor.warehouse.upserts_for("w/busy.pdf"), 3);

    let paths = rows(&local)
        .await
        .into_iter()
        .map(|row| row.file_path)
        .collect::<Vec<_>>();
    assert_eq!(paths, vec!["w/busy.pdf", "w/fine.pdf"]);
}
