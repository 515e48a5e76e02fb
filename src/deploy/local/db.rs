use std::{collections::HashSet, str::FromStr as _};

use tracing::{debug, error};

use crate::{
    job::{
        self,
        sql::{self, Dialect},
    },
    model::OutputRecord,
    retry::Transient,
};

/// SQLite-backed warehouse for local runs and tests.
pub struct LocalWarehouse {
    pool: sqlx::SqlitePool,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] sqlx::Error),
    #[error("Failed to serialize extracted content: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl Transient for Error {
    fn is_transient(&self) -> bool {
        match self {
            Error::Sqlite(sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)) => true,
            Error::Sqlite(sqlx::Error::Database(error)) => {
                let message = error.message();
                message.contains("database is locked") || message.contains("database is busy")
            }
            _ => false,
        }
    }
}

#[derive(Clone)]
pub struct Client {
    pool: sqlx::SqlitePool,
}

impl LocalWarehouse {
    pub async fn open(url: &str) -> Result<Self, sqlx::Error> {
        let options = sqlx::sqlite::SqliteConnectOptions::from_str(url)
            .inspect_err(|error| error!(%error, %url, "Failed to open local warehouse db"))?
            .create_if_missing(true);
        // A single long-lived connection keeps `sqlite::memory:` databases alive.
        let pool = sqlx::pool::PoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .inspect_err(|error| error!(%error, %url, "Failed to open local warehouse db"))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &sqlx::SqlitePool {
        &self.pool
    }

    pub fn client(&self) -> Client {
        Client {
            pool: self.pool.clone(),
        }
    }
}

impl job::storage::warehouse::Client for Client {
    type Error = Error;

    async fn create_table(&self, table: &str) -> Result<(), Self::Error> {
        sqlx::query(&sql::ddl(Dialect::Sqlite, table))
            .execute(&self.pool)
            .await?;
        debug!(table, "ensured destination table");
        Ok(())
    }

    async fn upsert(&self, table: &str, record: &OutputRecord) -> Result<(), Self::Error> {
        let content = serde_json::to_string(&record.extracted_content)?;
        sqlx::query(&sql::upsert(Dialect::Sqlite, table))
            .bind(&record.file_name)
            .bind(&record.file_path)
            .bind(record.process_date)
            .bind(content)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn processed_paths(&self, table: &str) -> Result<HashSet<String>, Self::Error> {
        let paths = sqlx::query_scalar::<_, String>(&sql::processed_paths(table))
            .fetch_all(&self.pool)
            .await?;
        Ok(paths.into_iter().collect())
    }
}
