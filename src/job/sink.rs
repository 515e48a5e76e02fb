use tracing::{error, info};

use crate::{model::OutputRecord, retry::RetryPolicy};

use super::{ObjectError, storage::warehouse};

/// Upsert one record keyed by its file path. Calling twice for the same path
/// replaces the row.
pub async fn write<W: warehouse::Client>(
    warehouse: &W,
    table: &str,
    record: &OutputRecord,
    retry: &RetryPolicy,
) -> Result<(), ObjectError> {
    retry
        .run("upsert", || warehouse.upsert(table, record))
        .await
        .map_err(|(error, attempts)| {
            error!(%error, path = record.file_path, table, attempts, "failed to upsert record");
            ObjectError::WriteFailed {
                path: record.file_path.clone(),
                cause: format!("{error} (after {attempts} attempts)"),
            }
        })?;
    info!(path = record.file_path, table, "upserted record");
    Ok(())
}
