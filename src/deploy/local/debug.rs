use std::path::Path;

use tracing::info;

use crate::{
    job::storage::extract::{self, Understanding, UnderstoodBox, UnderstoodChunk, UnderstoodGrounding},
    retry::Transient,
};

/// Offline extractor. UTF-8 documents become markdown split into paragraph
/// chunks; anything else yields an empty result.
#[derive(Default)]
pub struct DebugExtractor {}

#[derive(Debug, thiserror::Error)]
#[error("Failed to read staged file {path:?}: {error}")]
pub struct Error {
    path: std::path::PathBuf,
    error: std::io::Error,
}

impl Transient for Error {
    fn is_transient(&self) -> bool {
        false
    }
}

const FULL_PAGE: UnderstoodBox = UnderstoodBox {
    l: 0.0,
    t: 0.0,
    r: 1.0,
    b: 1.0,
};

fn understand_text(text: &str) -> Understanding {
    let chunks = text
        .split("\n\n")
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
        .enumerate()
        .map(|(idx, paragraph)| UnderstoodChunk {
            text: paragraph.to_string(),
            chunk_type: if paragraph.starts_with('#') {
                "title".into()
            } else {
                "text".into()
            },
            chunk_id: Some(format!("chunk-{idx}")),
            grounding: vec![UnderstoodGrounding {
                page: 0,
                bbox: Some(FULL_PAGE),
            }],
        })
        .collect();
    Understanding {
        markdown: text.to_string(),
        chunks,
    }
}

impl extract::Client for DebugExtractor {
    type Error = Error;

    fn name(&self) -> &str {
        "debug"
    }

    fn is_unsupported(_: &Self::Error) -> bool {
        false
    }

    async fn understand(&self, staged: &Path, file_name: &str) -> Result<Understanding, Self::Error> {
        let bytes = tokio::fs::read(staged).await.map_err(|error| Error {
            path: staged.to_path_buf(),
            error,
        })?;
        info!(file_name, size = bytes.len(), "understand document");
        Ok(match std::str::from_utf8(&bytes) {
            Ok(text) => understand_text(text),
            Err(_) => Understanding::default(),
        })
    }
}
