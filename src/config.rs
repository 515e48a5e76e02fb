use std::{path::PathBuf, sync::LazyLock, time::Duration};

use regex::Regex;
use serde::Deserialize;

use crate::retry::RetryPolicy;

static TABLE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*){0,2}$").unwrap()
});

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").unwrap());

pub static DEFAULT_LANDING_ENDPOINT: LazyLock<url::Url> = LazyLock::new(|| {
    "https://api.va.landing.ai/v1/tools/agentic-document-analysis"
        .parse()
        .unwrap()
});

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to read config {path:?}: {error}")]
    Read {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(serde_yaml::Error),
    #[error("Invalid table name: {0}")]
    InvalidTable(String),
    #[error("Invalid {kind} identifier: {name}")]
    InvalidIdentifier { kind: &'static str, name: String },
    #[error("concurrency_limit must be at least 1")]
    ZeroConcurrency,
    #[error("retry_attempts must be at least 1")]
    ZeroRetryAttempts,
    #[error("Bucket name must not be empty")]
    EmptyBucket,
    #[error("Environment variable {0} is not set")]
    MissingSecret(String),
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum StorageConfig {
    S3 {
        bucket: String,
        region: Option<String>,
        endpoint: Option<String>,
    },
    Local {
        root: PathBuf,
    },
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ExtractorConfig {
    LandingAi {
        endpoint: Option<url::Url>,
        api_key_env: Option<String>,
        timeout_secs: Option<u64>,
    },
    Debug {},
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum WarehouseBackend {
    Sqlite {
        url: String,
    },
    Snowflake {
        account: String,
        database: String,
        schema: String,
        warehouse: String,
        role: Option<String>,
        token_env: Option<String>,
        token_type: Option<String>,
    },
}

#[derive(Deserialize, Debug, Clone)]
pub struct WarehouseConfig {
    pub table: String,
    #[serde(flatten)]
    pub backend: WarehouseBackend,
}

fn default_concurrency_limit() -> usize {
    4
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_process_only_new() -> bool {
    true
}

fn default_max_document_bytes() -> u64 {
    50 * 1024 * 1024
}

/// Knobs of a single run.
#[derive(Deserialize, Debug, Clone)]
pub struct PipelineConfig {
    #[serde(default)]
    pub storage_prefix: String,
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_process_only_new")]
    pub process_only_new: bool,
    #[serde(default)]
    pub suffixes: Vec<String>,
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: u64,
    pub run_timeout_secs: Option<u64>,
}

impl PipelineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage_prefix: String::new(),
            concurrency_limit: default_concurrency_limit(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            process_only_new: default_process_only_new(),
            suffixes: Vec::new(),
            max_document_bytes: default_max_document_bytes(),
            run_timeout_secs: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub extractor: ExtractorConfig,
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Config {
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|error| Error::Read { path, error })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, Error> {
        serde_yaml::from_str(text).map_err(Error::Parse)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !TABLE_NAME.is_match(&self.warehouse.table) {
            return Err(Error::InvalidTable(self.warehouse.table.clone()));
        }
        if self.pipeline.concurrency_limit == 0 {
            return Err(Error::ZeroConcurrency);
        }
        if self.pipeline.retry_attempts == 0 {
            return Err(Error::ZeroRetryAttempts);
        }
        if let WarehouseBackend::Snowflake {
            database,
            schema,
            warehouse,
            ..
        } = &self.warehouse.backend
        {
            for (kind, name) in [
                ("database", database),
                ("schema", schema),
                ("warehouse", warehouse),
            ] {
                if !IDENTIFIER.is_match(name) {
                    return Err(Error::InvalidIdentifier {
                        kind,
                        name: name.clone(),
                    });
                }
            }
        }
        if let StorageConfig::S3 { bucket, .. } = &self.storage {
            if bucket.trim().is_empty() {
                return Err(Error::EmptyBucket);
            }
        }
        Ok(())
    }
}

/// Read a credential from the environment.
pub fn secret(var: &str) -> Result<String, Error> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::MissingSecret(var.to_string())),
    }
}
