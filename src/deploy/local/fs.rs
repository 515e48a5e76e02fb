use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{job, model::ObjectRef, retry::Transient};

/// Object store over a directory tree. Keys are `/`-separated paths relative
/// to the root.
pub struct LocalStore {
    root: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to list {root:?}: {message}")]
    List { root: PathBuf, message: String },
    #[error("Failed to read {path:?}: {error}")]
    Read {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("Key escapes the store root: {0}")]
    InvalidKey(String),
}

impl Transient for Error {
    fn is_transient(&self) -> bool {
        match self {
            Error::Read { error, .. } => matches!(
                error.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            Error::List { .. } | Error::InvalidKey(_) => false,
        }
    }
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, Error> {
        let relative = Path::new(key);
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(Error::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn walk(root: &Path) -> Result<Vec<ObjectRef>, String> {
    let root_str = root.to_str().ok_or("root is not valid UTF-8")?;
    // The root is literal; only the suffix is a pattern.
    let pattern = format!(
        "{}{}**{}*",
        glob::Pattern::escape(root_str),
        std::path::MAIN_SEPARATOR,
        std::path::MAIN_SEPARATOR
    );
    let mut objects = Vec::new();
    for entry in glob::glob(&pattern).map_err(|error| error.to_string())? {
        let path = entry.map_err(|error| error.to_string())?;
        let metadata = std::fs::metadata(&path).map_err(|error| error.to_string())?;
        if !metadata.is_file() {
            continue;
        }
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let key = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        objects.push(ObjectRef {
            path: key,
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }
    Ok(objects)
}

impl job::storage::objstore::Client for LocalStore {
    type Error = Error;

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectRef>, Self::Error> {
        let root = self.root.clone();
        let objects = tokio::task::spawn_blocking(move || walk(&root))
            .await
            .map_err(|error| error.to_string())
            .and_then(|objects| objects)
            .map_err(|message| Error::List {
                root: self.root.clone(),
                message,
            })?;
        let mut objects = objects
            .into_iter()
            .filter(|object| object.path.starts_with(prefix))
            .collect::<Vec<_>>();
        objects.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(root = %self.root.display(), prefix, count = objects.len(), "listed directory");
        Ok(objects)
    }

    async fn get(&self, path: &str) -> Result<bytes::Bytes, Self::Error> {
        let path = self.resolve(path)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|error| Error::Read { path, error })?;
        Ok(bytes.into())
    }
}
