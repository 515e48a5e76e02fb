use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use sqlx::prelude::FromRow;
use tokio_util::sync::CancellationToken;

use crate::{
    config::PipelineConfig,
    deploy::local::db::{self, LocalWarehouse},
    job::{
        JobError, JobExecutor, RunSummary,
        storage::{
            extract, objstore,
            warehouse::{self, Client as _},
        },
    },
    model::{ObjectRef, OutputRecord},
    progress::RecordingReporter,
    retry::Transient,
};

mod cancel;
mod pipeline;

const TABLE: &str = "docs";

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct FakeError {
    message: String,
    transient: bool,
    unsupported: bool,
}

impl FakeError {
    fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
            unsupported: false,
        }
    }

    fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
            unsupported: false,
        }
    }
}

impl Transient for FakeError {
    fn is_transient(&self) -> bool {
        self.transient
    }
}

/// In-memory object store. Paths listed in `missing` are listed but cannot be fetched.
#[derive(Default)]
pub struct MemoryStore {
    objects: IndexMap<String, bytes::Bytes>,
    missing: HashSet<String>,
    list_unavailable: bool,
    list_calls: AtomicUsize,
}

impl MemoryStore {
    fn with(objects: &[(&str, &str)]) -> Self {
        Self {
            objects: objects
                .iter()
                .map(|(path, text)| {
                    (
                        path.to_string(),
                        bytes::Bytes::copy_from_slice(text.as_bytes()),
                    )
                })
                .collect(),
            ..Default::default()
        }
    }
}

impl objstore::Client for MemoryStore {
    type Error = FakeError;

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectRef>, Self::Error> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.list_unavailable {
            return Err(FakeError::transient("connection refused"));
        }
        Ok(self
            .objects
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, bytes)| ObjectRef {
                path: path.clone(),
                size: bytes.len() as u64,
                last_modified: None,
            })
            .collect())
    }

    async fn get(&self, path: &str) -> Result<bytes::Bytes, Self::Error> {
        if self.missing.contains(path) {
            return Err(FakeError::permanent(format!("NoSuchKey: {path}")));
        }
        self.objects
            .get(path)
            .cloned()
            .ok_or_else(|| FakeError::permanent(format!("NoSuchKey: {path}")))
    }
}

/// Extractor whose behavior per file name is scripted by the test.
#[derive(Default)]
pub struct ScriptedExtractor {
    /// Transient failures left before the file succeeds.
    flaky: Mutex<HashMap<String, u32>>,
    rejected: HashSet<String>,
    /// Cancelled as soon as any document is understood.
    cancel_on_call: Option<CancellationToken>,
    /// Time each call takes; 5ms when unset.
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedExtractor {
    fn calls_for(&self, file_name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|name| *name == file_name)
            .count()
    }
}

impl extract::Client for ScriptedExtractor {
    type Error = FakeError;

    fn name(&self) -> &str {
        "scripted"
    }

    fn is_unsupported(error: &Self::Error) -> bool {
        error.unsupported
    }

    async fn understand(
        &self,
        staged: &Path,
        file_name: &str,
    ) -> Result<extract::Understanding, Self::Error> {
        self.calls.lock().unwrap().push(file_name.to_string());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(self.delay.unwrap_or(Duration::from_millis(5))).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(cancel) = &self.cancel_on_call {
            cancel.cancel();
        }
        if self.rejected.contains(file_name) {
            return Err(FakeError {
                message: "unsupported media type".into(),
                transient: false,
                unsupported: true,
            });
        }
        {
            let mut flaky = self.flaky.lock().unwrap();
            if let Some(left) = flaky.get_mut(file_name).filter(|left| **left > 0) {
                *left -= 1;
                return Err(FakeError::transient("request timed out"));
            }
        }
        let text = tokio::fs::read_to_string(staged).await.unwrap_or_default();
        if text.trim().is_empty() {
            return Ok(extract::Understanding::default());
        }
        Ok(extract::Understanding {
            markdown: text.clone(),
            chunks: vec![extract::UnderstoodChunk {
                text,
                chunk_type: "text".into(),
                chunk_id: Some("c0".into()),
                grounding: Vec::new(),
            }],
        })
    }
}

/// SQLite warehouse whose upserts fail for scripted paths.
pub struct FailingWarehouse {
    inner: db::Client,
    /// Paths whose upsert always fails permanently.
    broken: HashSet<String>,
    /// Transient upsert failures left per path.
    flaky: Mutex<HashMap<String, u32>>,
    upserts: Mutex<Vec<String>>,
}

impl FailingWarehouse {
    fn new(inner: db::Client) -> Self {
        Self {
            inner,
            broken: HashSet::new(),
            flaky: Mutex::default(),
            upserts: Mutex::default(),
        }
    }

    fn upserts_for(&self, path: &str) -> usize {
        self.upserts
            .lock()
            .unwrap()
            .iter()
            .filter(|upserted| *upserted == path)
            .count()
    }
}

impl warehouse::Client for FailingWarehouse {
    type Error = FakeError;

    async fn create_table(&self, table: &str) -> Result<(), Self::Error> {
        self.inner
            .create_table(table)
            .await
            .map_err(|error| FakeError::permanent(error.to_string()))
    }

    async fn upsert(&self, table: &str, record: &OutputRecord) -> Result<(), Self::Error> {
        let path = record.file_path.clone();
        self.upserts.lock().unwrap().push(path.clone());
        if self.broken.contains(&path) {
            return Err(FakeError::permanent(format!("constraint violated for {path}")));
        }
        {
            let mut flaky = self.flaky.lock().unwrap();
            if let Some(left) = flaky.get_mut(&path).filter(|left| **left > 0) {
                *left -= 1;
                return Err(FakeError::transient("warehouse busy"));
            }
        }
        self.inner
            .upsert(table, record)
            .await
            .map_err(|error| FakeError::permanent(error.to_string()))
    }

    async fn processed_paths(&self, table: &str) -> Result<HashSet<String>, Self::Error> {
        self.inner
            .processed_paths(table)
            .await
            .map_err(|error| FakeError::permanent(error.to_string()))
    }
}

#[derive(FromRow, Debug)]
struct DocRow {
    file_name: String,
    file_path: String,
    process_date: DateTime<Utc>,
    extracted_content: String,
}

impl DocRow {
    fn content(&self) -> serde_json::Value {
        serde_json::from_str(&self.extracted_content).unwrap()
    }
}

async fn rows(warehouse: &LocalWarehouse) -> Vec<DocRow> {
    sqlx::query_as::<_, DocRow>(&format!(
        "SELECT file_name, file_path, process_date, extracted_content FROM {TABLE} ORDER BY file_path"
    ))
    .fetch_all(warehouse.pool())
    .await
    .unwrap()
}

fn pipeline() -> PipelineConfig {
    PipelineConfig {
        retry_backoff_ms: 1,
        ..Default::default()
    }
}

struct Harness {
    warehouse: LocalWarehouse,
    executor: JobExecutor<MemoryStore, ScriptedExtractor, db::Client>,
    reporter: RecordingReporter,
}

impl Harness {
    async fn new(store: MemoryStore, extractor: ScriptedExtractor) -> Self {
        let warehouse = LocalWarehouse::open("sqlite::memory:").await.unwrap();
        let executor = JobExecutor {
            store,
            extractor,
            warehouse: warehouse.client(),
        };
        Self {
            warehouse,
            executor,
            reporter: RecordingReporter::default(),
        }
    }

    async fn run(
        &self,
        config: &PipelineConfig,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, JobError<FakeError, db::Error>> {
        self.executor
            .run(TABLE, config, &self.reporter, cancel)
            .await
    }
}

#[tokio::test]
async fn fixture_config_runs_on_local_backends() {
    use crate::{
        config::Config,
        deploy::{AnyExtractor, AnyStore, AnyWarehouse},
        job::storage::warehouse::Client as _,
    };

    let config = Config::load("src/tests/fixtures/config.yaml").await.unwrap();
    config.validate().unwrap();
    let executor = JobExecutor {
        store: AnyStore::from_config(&config.storage).await,
        extractor: AnyExtractor::from_config(&config.extractor).unwrap(),
        warehouse: AnyWarehouse::from_config(&config.warehouse).await.unwrap(),
    };
    let summary = executor
        .run(
            &config.warehouse.table,
            &config.pipeline,
            &RecordingReporter::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(summary.listed, 1);
    assert_eq!(summary.done, 1);

    let paths = executor
        .warehouse
        .processed_paths(&config.warehouse.table)
        .await
        .unwrap();
    assert_eq!(paths, HashSet::from(["invoices/jan.pdf".to_string()]));

    // Nothing new on the second run.
    let summary = executor
        .run(
            &config.warehouse.table,
            &config.pipeline,
            &RecordingReporter::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.done, 0);
}
