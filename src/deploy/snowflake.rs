//! Snowflake warehouse through the SQL API (`/api/v2/statements`).

use std::{collections::HashSet, time::Duration};

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info};

use crate::{
    job::{
        self,
        sql::{self, Dialect},
    },
    model::OutputRecord,
    retry::Transient,
};

/// Seconds Snowflake may spend on one statement before cancelling it.
const STATEMENT_TIMEOUT_SECS: u64 = 120;
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const MAX_POLLS: usize = 240;
pub const DEFAULT_TOKEN_TYPE: &str = "PROGRAMMATIC_ACCESS_TOKEN";

pub struct Client {
    http: reqwest::Client,
    base: url::Url,
    token: String,
    token_type: String,
    database: String,
    schema: String,
    warehouse: String,
    role: Option<String>,
}

pub struct Settings {
    pub account: String,
    pub database: String,
    pub schema: String,
    pub warehouse: String,
    pub role: Option<String>,
    pub token: String,
    pub token_type: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid account identifier {0}")]
    InvalidAccount(String),
    #[error("Failed to build http client: {0}")]
    Build(reqwest::Error),
    #[error("Request failed: {0}")]
    Transport(reqwest::Error),
    #[error("Snowflake returned {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("Statement failed ({code}): {message}")]
    Statement { code: String, message: String },
    #[error("Failed to parse Snowflake response: {0}")]
    ParseJson(serde_json::Error),
    #[error("Failed to serialize extracted content: {0}")]
    Serialize(serde_json::Error),
    #[error("Statement {0} did not finish in time")]
    PollExhausted(String),
}

impl Transient for Error {
    fn is_transient(&self) -> bool {
        match self {
            Error::Transport(error) => error.is_timeout() || error.is_connect() || error.is_request(),
            Error::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::SERVICE_UNAVAILABLE
                    || *status == StatusCode::GATEWAY_TIMEOUT
            }
            Error::PollExhausted(_) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// Account-level DDL, run before the database exists.
    Account,
    /// Statements against the configured database and schema.
    Table,
}

#[derive(Serialize)]
struct Binding<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    statement_handle: Option<String>,
    #[serde(default)]
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    partition_info: Vec<serde_json::Value>,
}

/// Timestamp literal accepted by `TO_TIMESTAMP_NTZ`.
fn timestamp(record: &OutputRecord) -> String {
    record
        .process_date
        .format("%Y-%m-%d %H:%M:%S%.3f")
        .to_string()
}

impl Client {
    pub fn new(settings: Settings) -> Result<Self, Error> {
        let base = format!(
            "https://{}.snowflakecomputing.com/api/v2/statements",
            settings.account
        )
        .parse::<url::Url>()
        .map_err(|_| Error::InvalidAccount(settings.account.clone()))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(STATEMENT_TIMEOUT_SECS + 30))
            .build()
            .map_err(Error::Build)?;
        Ok(Self {
            http,
            base,
            token: settings.token,
            token_type: settings
                .token_type
                .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string()),
            database: settings.database,
            schema: settings.schema,
            warehouse: settings.warehouse,
            role: settings.role,
        })
    }

    fn request(&self, method: reqwest::Method, url: url::Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header("X-Snowflake-Authorization-Token-Type", &self.token_type)
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn read(response: reqwest::Response) -> Result<(StatusCode, StatementResponse), Error> {
        let status = response.status();
        let body = response.text().await.map_err(Error::Transport)?;
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            let failed: StatementResponse = serde_json::from_str(&body).unwrap_or_default();
            return Err(Error::Statement {
                code: failed.code.unwrap_or_default(),
                message: failed.message.unwrap_or(body),
            });
        }
        if !status.is_success() {
            return Err(Error::Status {
                status,
                message: body,
            });
        }
        let parsed = serde_json::from_str(&body).map_err(Error::ParseJson)?;
        Ok((status, parsed))
    }

    /// Request body of one statement. Account-scoped statements carry no
    /// database or schema, since those may not exist yet.
    fn statement_body(&self, scope: Scope, statement: &str, bindings: &[&str]) -> serde_json::Value {
        let bindings = bindings
            .iter()
            .enumerate()
            .map(|(idx, &value)| {
                (
                    (idx + 1).to_string(),
                    Binding {
                        kind: "TEXT",
                        value,
                    },
                )
            })
            .collect::<indexmap::IndexMap<_, _>>();
        let mut body = json!({
            "statement": statement,
            "timeout": STATEMENT_TIMEOUT_SECS,
            "bindings": bindings,
        });
        if let Some(role) = &self.role {
            body["role"] = json!(role);
        }
        if scope == Scope::Table {
            body["database"] = json!(self.database);
            body["schema"] = json!(self.schema);
            body["warehouse"] = json!(self.warehouse);
        }
        body
    }

    /// `CREATE .. IF NOT EXISTS` for the warehouse, database and schema.
    fn infrastructure_statements(&self) -> [String; 3] {
        [
            format!(
                "CREATE WAREHOUSE IF NOT EXISTS {} WITH WAREHOUSE_SIZE = 'XSMALL' AUTO_SUSPEND = 60 AUTO_RESUME = TRUE",
                self.warehouse
            ),
            format!("CREATE DATABASE IF NOT EXISTS {}", self.database),
            format!(
                "CREATE SCHEMA IF NOT EXISTS {}.{}",
                self.database, self.schema
            ),
        ]
    }

    /// Create the compute warehouse, database and schema the table lives in.
    pub async fn ensure_infrastructure(&self) -> Result<(), Error> {
        for statement in self.infrastructure_statements() {
            self.execute(Scope::Account, &statement, &[])
                .await
                .inspect_err(|error| error!(%error, statement, "Failed to bootstrap Snowflake"))?;
            debug!(statement, "executed bootstrap statement");
        }
        info!(
            warehouse = self.warehouse,
            database = self.database,
            schema = self.schema,
            "ensured Snowflake infrastructure"
        );
        Ok(())
    }

    /// Submit one statement and wait for its first partition of rows.
    async fn execute(
        &self,
        scope: Scope,
        statement: &str,
        bindings: &[&str],
    ) -> Result<Vec<Vec<Option<String>>>, Error> {
        let body = self.statement_body(scope, statement, bindings);
        let response = self
            .request(reqwest::Method::POST, self.base.clone())
            .json(&body)
            .send()
            .await
            .map_err(Error::Transport)?;
        let (mut status, mut parsed) = Self::read(response).await?;

        let mut polls = 0;
        while status == StatusCode::ACCEPTED {
            let handle = parsed.statement_handle.clone().unwrap_or_default();
            if polls >= MAX_POLLS {
                return Err(Error::PollExhausted(handle));
            }
            polls += 1;
            tokio::time::sleep(POLL_INTERVAL).await;
            let url = self.statement_url(&handle, None)?;
            let response = self
                .request(reqwest::Method::GET, url)
                .send()
                .await
                .map_err(Error::Transport)?;
            (status, parsed) = Self::read(response).await?;
        }

        let mut rows = std::mem::take(&mut parsed.data);
        let partitions = parsed
            .result_set_meta_data
            .as_ref()
            .map(|meta| meta.partition_info.len())
            .unwrap_or_default();
        if partitions > 1 {
            let handle = parsed.statement_handle.clone().unwrap_or_default();
            for partition in 1..partitions {
                let url = self.statement_url(&handle, Some(partition))?;
                let response = self
                    .request(reqwest::Method::GET, url)
                    .send()
                    .await
                    .map_err(Error::Transport)?;
                let (_, page) = Self::read(response).await?;
                rows.extend(page.data);
            }
        }
        Ok(rows)
    }

    fn statement_url(&self, handle: &str, partition: Option<usize>) -> Result<url::Url, Error> {
        let mut url = self
            .base
            .join(&format!("statements/{handle}"))
            .map_err(|_| Error::InvalidAccount(self.base.to_string()))?;
        if let Some(partition) = partition {
            url.query_pairs_mut()
                .append_pair("partition", &partition.to_string());
        }
        Ok(url)
    }
}

impl job::storage::warehouse::Client for Client {
    type Error = Error;

    async fn create_table(&self, table: &str) -> Result<(), Self::Error> {
        self.execute(Scope::Table, &sql::ddl(Dialect::Snowflake, table), &[])
            .await
            .inspect_err(|error| error!(%error, table, "Failed to create table"))?;
        info!(table, "ensured destination table");
        Ok(())
    }

    async fn upsert(&self, table: &str, record: &OutputRecord) -> Result<(), Self::Error> {
        let content = serde_json::to_string(&record.extracted_content).map_err(Error::Serialize)?;
        let process_date = timestamp(record);
        self.execute(
            Scope::Table,
            &sql::upsert(Dialect::Snowflake, table),
            &[
                record.file_name.as_str(),
                record.file_path.as_str(),
                process_date.as_str(),
                content.as_str(),
            ],
        )
        .await?;
        debug!(table, path = record.file_path, "merged row");
        Ok(())
    }

    async fn processed_paths(&self, table: &str) -> Result<HashSet<String>, Self::Error> {
        let rows = self.execute(Scope::Table, &sql::processed_paths(table), &[]).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().flatten())
            .collect())
    }
}
