//! Records flowing through a run: listed objects, fetched bytes, extracted
//! content, and the row persisted per object.

use chrono::{DateTime, Utc};
use derive_debug::Dbg;
use serde::{Deserialize, Serialize};

/// A source document in the object store. `path` is the unique key.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub path: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

impl ObjectRef {
    /// Last segment of the object path.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

#[derive(Dbg, Clone)]
pub struct RawDocument {
    pub object: ObjectRef,
    #[dbg(skip)]
    pub bytes: bytes::Bytes,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Table,
    Paragraph,
    List,
    Header,
    Figure,
    Other,
}

impl ChunkType {
    /// Map a service-reported chunk kind onto the canonical set.
    pub fn from_service(kind: &str) -> Self {
        match kind.to_ascii_lowercase().as_str() {
            "text" | "paragraph" => Self::Paragraph,
            "table" => Self::Table,
            "list" | "list_item" => Self::List,
            "title" | "header" | "page_header" | "section_header" => Self::Header,
            "figure" | "image" | "picture" => Self::Figure,
            _ => Self::Other,
        }
    }
}

/// Document-relative coordinates in `[0, 1]`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Grounding {
    pub page: u32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub chunk_type: ChunkType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
    /// Reading order, not necessarily sorted by page.
    #[serde(default)]
    pub grounding: Vec<Grounding>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExtractionMetadata {
    pub file_name: String,
    pub file_size: u64,
    pub extractor: String,
    pub extracted_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub markdown: String,
    /// Empty when the document has no segmentable content; never absent.
    #[serde(default)]
    pub chunks: Vec<Chunk>,
    pub metadata: ExtractionMetadata,
}

/// One row of the destination table, keyed by `file_path`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OutputRecord {
    pub file_name: String,
    pub file_path: String,
    pub process_date: DateTime<Utc>,
    pub extracted_content: ExtractionResult,
}

impl OutputRecord {
    /// Stamp a record for `object` with the current time.
    pub fn new(object: &ObjectRef, extracted_content: ExtractionResult) -> Self {
        Self {
            file_name: object.file_name().to_string(),
            file_path: object.path.clone(),
            process_date: Utc::now(),
            extracted_content,
        }
    }
}
