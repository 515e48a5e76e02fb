//! Document extraction
//!
//! Stages the fetched bytes as a temporary file, invokes the understanding
//! service once per document (with bounded retries), and normalizes its answer
//! into an [`ExtractionResult`].

use std::io::Write as _;

use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::{debug, error, info};

use crate::{
    model::{
        BoundingBox, Chunk, ChunkType, ExtractionMetadata, ExtractionResult, Grounding,
        ObjectRef, RawDocument,
    },
    retry::RetryPolicy,
};

use super::{
    ObjectError,
    storage::extract::{self, Understanding},
};

pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "pdf", "png", "jpg", "jpeg", "tif", "tiff", "bmp", "webp", "gif",
];

/// Reject documents the service cannot take, without calling it.
pub fn check_supported(document: &RawDocument, max_bytes: u64) -> Result<(), String> {
    let size = document.bytes.len() as u64;
    if size == 0 {
        return Err("empty document".into());
    }
    if size > max_bytes {
        return Err(format!("{size} bytes exceeds the {max_bytes} byte limit"));
    }
    let extension = document
        .object
        .file_name()
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_ascii_lowercase());
    match extension {
        Some(extension) if SUPPORTED_EXTENSIONS.contains(&extension.as_str()) => Ok(()),
        Some(extension) => Err(format!("unsupported file type .{extension}")),
        None => Err("file has no extension".into()),
    }
}

/// Write the bytes to a temporary file that is removed when dropped.
/// The suffix keeps the original file name so the service can sniff the type.
async fn stage(document: &RawDocument) -> std::io::Result<NamedTempFile> {
    let bytes = document.bytes.clone();
    let suffix = format!("_{}", document.object.file_name());
    tokio::task::spawn_blocking(move || -> std::io::Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("docsync-")
            .suffix(&suffix)
            .tempfile()?;
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(file)
    })
    .await
    .map_err(std::io::Error::other)?
}

/// Map the service answer onto the canonical schema.
pub fn normalize(
    understanding: Understanding,
    object: &ObjectRef,
    file_size: u64,
    extractor: &str,
) -> ExtractionResult {
    let chunks = understanding
        .chunks
        .into_iter()
        .map(|chunk| Chunk {
            text: chunk.text,
            chunk_type: ChunkType::from_service(&chunk.chunk_type),
            chunk_id: chunk.chunk_id,
            grounding: chunk
                .grounding
                .into_iter()
                .map(|grounding| {
                    let bbox = grounding.bbox.unwrap_or_default();
                    Grounding {
                        page: grounding.page,
                        bbox: BoundingBox {
                            left: bbox.l,
                            top: bbox.t,
                            right: bbox.r,
                            bottom: bbox.b,
                        },
                    }
                })
                .collect(),
        })
        .collect();
    ExtractionResult {
        markdown: understanding.markdown,
        chunks,
        metadata: ExtractionMetadata {
            file_name: object.file_name().to_string(),
            file_size,
            extractor: extractor.to_string(),
            extracted_at: Utc::now(),
        },
    }
}

pub async fn extract<C: extract::Client>(
    client: &C,
    document: &RawDocument,
    max_bytes: u64,
    retry: &RetryPolicy,
) -> Result<ExtractionResult, ObjectError> {
    let path = &document.object.path;
    check_supported(document, max_bytes).map_err(|reason| {
        info!(path, reason, "skipping unsupported document");
        ObjectError::UnsupportedDocument {
            path: path.clone(),
            reason,
        }
    })?;

    let staged = stage(document)
        .await
        .map_err(|error| ObjectError::ExtractionFailed {
            path: path.clone(),
            cause: format!("failed to stage document: {error}"),
        })?;
    debug!(path, staged = %staged.path().display(), "staged document");

    let file_name = document.object.file_name();
    let understanding = retry
        .run("extract", || client.understand(staged.path(), file_name))
        .await;
    // Staged file is released here whatever the outcome.
    drop(staged);

    let understanding = understanding.map_err(|(error, attempts)| {
        if C::is_unsupported(&error) {
            info!(%error, path, "service rejected document");
            ObjectError::UnsupportedDocument {
                path: path.clone(),
                reason: error.to_string(),
            }
        } else {
            error!(%error, path, attempts, "failed to extract document");
            ObjectError::ExtractionFailed {
                path: path.clone(),
                cause: format!("{error} (after {attempts} attempts)"),
            }
        }
    })?;
    let result = normalize(
        understanding,
        &document.object,
        document.bytes.len() as u64,
        client.name(),
    );
    debug!(path, chunks = result.chunks.len(), "extracted document");
    Ok(result)
}
