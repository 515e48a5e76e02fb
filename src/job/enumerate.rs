//! Object enumeration
//!
//! Lists a prefix completely and yields the objects still to be processed.

use tracing::{debug, error};

use crate::{model::ObjectRef, retry::RetryPolicy};

use super::storage::objstore;

/// List every object under `prefix`, retrying transient store failures.
/// Listing either completes or fails; partial results are never returned.
pub async fn list_objects<S: objstore::Client>(
    store: &S,
    prefix: &str,
    retry: &RetryPolicy,
) -> Result<Vec<ObjectRef>, S::Error> {
    let objects = retry
        .run("list", || store.list(prefix))
        .await
        .map_err(|(error, attempts)| {
            error!(%error, prefix, attempts, "failed to list objects");
            error
        })?;
    debug!(prefix, count = objects.len(), "listed objects");
    Ok(objects)
}

/// Case-insensitive suffix match. An empty allow-list accepts everything.
pub fn matches_suffix(path: &str, suffixes: &[String]) -> bool {
    if suffixes.is_empty() {
        return true;
    }
    let path = path.to_ascii_lowercase();
    suffixes
        .iter()
        .any(|suffix| path.ends_with(&suffix.to_ascii_lowercase()))
}

/// Lazily select objects that pass the suffix filter and are not yet processed.
/// Directory placeholders (keys ending in `/`) are always skipped.
pub fn pending<'a>(
    objects: impl IntoIterator<Item = ObjectRef> + 'a,
    suffixes: &'a [String],
    is_processed: impl Fn(&ObjectRef) -> bool + 'a,
) -> impl Iterator<Item = ObjectRef> + 'a {
    objects.into_iter().filter(move |object| {
        !object.path.ends_with('/')
            && matches_suffix(&object.path, suffixes)
            && !is_processed(object)
    })
}
