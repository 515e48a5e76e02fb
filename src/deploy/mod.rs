//! Concrete collaborators, selected from the config at startup.

pub mod aws;
pub mod landing;
pub mod local;
pub mod snowflake;

use std::{collections::HashSet, path::Path, time::Duration};

use tracing::info;

use crate::{
    config::{self, Config, ExtractorConfig, StorageConfig, WarehouseBackend, WarehouseConfig},
    job::{
        sql::Dialect,
        storage::{
            extract::{self, Client as _},
            objstore::{self, Client as _},
            warehouse::{self, Client as _},
        },
    },
    model::{ObjectRef, OutputRecord},
    retry::Transient,
};

pub const DEFAULT_API_KEY_ENV: &str = "VISION_AGENT_API_KEY";
pub const DEFAULT_TOKEN_ENV: &str = "SNOWFLAKE_TOKEN";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::Error),
    #[error("Failed to open sqlite warehouse: {0}")]
    Sqlite(#[from] sqlx::Error),
    #[error(transparent)]
    Landing(#[from] landing::Error),
    #[error(transparent)]
    Snowflake(#[from] snowflake::Error),
    #[error(transparent)]
    S3(#[from] aws::s3::Error),
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

/// Bootstrap the source bucket, the warehouse objects and the destination
/// table. Only the store and the warehouse are built, so extractor
/// credentials are not required.
pub async fn setup(config: &Config) -> Result<(), Error> {
    let store = AnyStore::from_config(&config.storage).await;
    store.ensure().await?;
    let warehouse = AnyWarehouse::from_config(&config.warehouse).await?;
    warehouse.ensure().await?;
    warehouse.create_table(&config.warehouse.table).await?;
    info!(table = config.warehouse.table, "setup complete");
    Ok(())
}

pub enum AnyStore {
    S3(aws::s3::Client),
    Local(local::fs::LocalStore),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    S3(aws::s3::Error),
    #[error(transparent)]
    Local(local::fs::Error),
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        match self {
            StoreError::S3(error) => error.is_transient(),
            StoreError::Local(error) => error.is_transient(),
        }
    }
}

impl AnyStore {
    pub async fn from_config(config: &StorageConfig) -> Self {
        match config {
            StorageConfig::S3 {
                bucket,
                region,
                endpoint,
            } => AnyStore::S3(
                aws::s3::Client::new(bucket.clone(), region.clone(), endpoint.clone()).await,
            ),
            StorageConfig::Local { root } => AnyStore::Local(local::fs::LocalStore::new(root)),
        }
    }

    /// Make sure the source exists. Only S3 buckets can be created.
    pub async fn ensure(&self) -> Result<(), Error> {
        match self {
            AnyStore::S3(client) => Ok(client.ensure_bucket().await?),
            AnyStore::Local(_) => Ok(()),
        }
    }
}

impl objstore::Client for AnyStore {
    type Error = StoreError;

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectRef>, Self::Error> {
        match self {
            AnyStore::S3(client) => client.list(prefix).await.map_err(StoreError::S3),
            AnyStore::Local(client) => client.list(prefix).await.map_err(StoreError::Local),
        }
    }

    async fn get(&self, path: &str) -> Result<bytes::Bytes, Self::Error> {
        match self {
            AnyStore::S3(client) => client.get(path).await.map_err(StoreError::S3),
            AnyStore::Local(client) => client.get(path).await.map_err(StoreError::Local),
        }
    }
}

pub enum AnyExtractor {
    LandingAi(landing::Client),
    Debug(local::debug::DebugExtractor),
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    #[error(transparent)]
    LandingAi(landing::Error),
    #[error(transparent)]
    Debug(local::debug::Error),
}

impl Transient for ExtractorError {
    fn is_transient(&self) -> bool {
        match self {
            ExtractorError::LandingAi(error) => error.is_transient(),
            ExtractorError::Debug(error) => error.is_transient(),
        }
    }
}

impl AnyExtractor {
    pub fn from_config(config: &ExtractorConfig) -> Result<Self, Error> {
        match config {
            ExtractorConfig::LandingAi {
                endpoint,
                api_key_env,
                timeout_secs,
            } => {
                let endpoint = endpoint
                    .clone()
                    .unwrap_or_else(|| config::DEFAULT_LANDING_ENDPOINT.clone());
                let api_key =
                    config::secret(api_key_env.as_deref().unwrap_or(DEFAULT_API_KEY_ENV))?;
                Ok(AnyExtractor::LandingAi(landing::Client::new(
                    endpoint,
                    api_key,
                    timeout_secs.map(Duration::from_secs),
                )?))
            }
            ExtractorConfig::Debug {} => Ok(AnyExtractor::Debug(Default::default())),
        }
    }
}

impl extract::Client for AnyExtractor {
    type Error = ExtractorError;

    fn name(&self) -> &str {
        match self {
            AnyExtractor::LandingAi(client) => client.name(),
            AnyExtractor::Debug(client) => client.name(),
        }
    }

    fn is_unsupported(error: &Self::Error) -> bool {
        match error {
            ExtractorError::LandingAi(error) => landing::Client::is_unsupported(error),
            ExtractorError::Debug(error) => local::debug::DebugExtractor::is_unsupported(error),
        }
    }

    async fn understand(
        &self,
        staged: &Path,
        file_name: &str,
    ) -> Result<extract::Understanding, Self::Error> {
        match self {
            AnyExtractor::LandingAi(client) => client
                .understand(staged, file_name)
                .await
                .map_err(ExtractorError::LandingAi),
            AnyExtractor::Debug(client) => client
                .understand(staged, file_name)
                .await
                .map_err(ExtractorError::Debug),
        }
    }
}

pub enum AnyWarehouse {
    Sqlite(local::db::Client),
    Snowflake(snowflake::Client),
}

#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    #[error(transparent)]
    Sqlite(local::db::Error),
    #[error(transparent)]
    Snowflake(snowflake::Error),
}

impl Transient for WarehouseError {
    fn is_transient(&self) -> bool {
        match self {
            WarehouseError::Sqlite(error) => error.is_transient(),
            WarehouseError::Snowflake(error) => error.is_transient(),
        }
    }
}

/// SQL dialect of the configured warehouse.
pub fn dialect(config: &WarehouseConfig) -> Dialect {
    match config.backend {
        WarehouseBackend::Sqlite { .. } => Dialect::Sqlite,
        WarehouseBackend::Snowflake { .. } => Dialect::Snowflake,
    }
}

impl AnyWarehouse {
    pub async fn from_config(config: &WarehouseConfig) -> Result<Self, Error> {
        match &config.backend {
            WarehouseBackend::Sqlite { url } => {
                let warehouse = local::db::LocalWarehouse::open(url).await?;
                Ok(AnyWarehouse::Sqlite(warehouse.client()))
            }
            WarehouseBackend::Snowflake {
                account,
                database,
                schema,
                warehouse,
                role,
                token_env,
                token_type,
            } => {
                let token = config::secret(token_env.as_deref().unwrap_or(DEFAULT_TOKEN_ENV))?;
                Ok(AnyWarehouse::Snowflake(snowflake::Client::new(
                    snowflake::Settings {
                        account: account.clone(),
                        database: database.clone(),
                        schema: schema.clone(),
                        warehouse: warehouse.clone(),
                        role: role.clone(),
                        token,
                        token_type: token_type.clone(),
                    },
                )?))
            }
        }
    }
}

impl AnyWarehouse {
    /// Make sure the database objects around the table exist. SQLite files
    /// are created on open.
    pub async fn ensure(&self) -> Result<(), Error> {
        match self {
            AnyWarehouse::Sqlite(_) => Ok(()),
            AnyWarehouse::Snowflake(client) => Ok(client.ensure_infrastructure().await?),
        }
    }
}

impl warehouse::Client for AnyWarehouse {
    type Error = WarehouseError;

    async fn create_table(&self, table: &str) -> Result<(), Self::Error> {
        match self {
            AnyWarehouse::Sqlite(client) => client
                .create_table(table)
                .await
                .map_err(WarehouseError::Sqlite),
            AnyWarehouse::Snowflake(client) => client
                .create_table(table)
                .await
                .map_err(WarehouseError::Snowflake),
        }
    }

    async fn upsert(&self, table: &str, record: &OutputRecord) -> Result<(), Self::Error> {
        match self {
            AnyWarehouse::Sqlite(client) => client
                .upsert(table, record)
                .await
                .map_err(WarehouseError::Sqlite),
            AnyWarehouse::Snowflake(client) => client
                .upsert(table, record)
                .await
                .map_err(WarehouseError::Snowflake),
        }
    }

    async fn processed_paths(&self, table: &str) -> Result<HashSet<String>, Self::Error> {
        match self {
            AnyWarehouse::Sqlite(client) => client
                .processed_paths(table)
                .await
                .map_err(WarehouseError::Sqlite),
            AnyWarehouse::Snowflake(client) => client
                .processed_paths(table)
                .await
                .map_err(WarehouseError::Snowflake),
        }
    }
}
