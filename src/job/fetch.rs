use tracing::{debug, error};

use crate::{
    model::{ObjectRef, RawDocument},
    retry::RetryPolicy,
};

use super::{ObjectError, storage::objstore};

/// Download one object, retrying transient failures.
pub async fn fetch<S: objstore::Client>(
    store: &S,
    object: &ObjectRef,
    retry: &RetryPolicy,
) -> Result<RawDocument, ObjectError> {
    let bytes = retry
        .run("fetch", || store.get(&object.path))
        .await
        .map_err(|(error, attempts)| {
            error!(%error, path = object.path, attempts, "failed to fetch object");
            ObjectError::FetchFailed {
                path: object.path.clone(),
                cause: format!("{error} (after {attempts} attempts)"),
            }
        })?;
    debug!(path = object.path, size = bytes.len(), "fetched object");
    Ok(RawDocument {
        object: object.clone(),
        bytes,
    })
}
