use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::retry::Transient;

/// Raw answer of the document-understanding service.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Understanding {
    #[serde(default)]
    pub markdown: String,
    #[serde(default)]
    pub chunks: Vec<UnderstoodChunk>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UnderstoodChunk {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub chunk_type: String,
    #[serde(default)]
    pub chunk_id: Option<String>,
    #[serde(default)]
    pub grounding: Vec<UnderstoodGrounding>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UnderstoodGrounding {
    #[serde(default)]
    pub page: u32,
    #[serde(rename = "box", default)]
    pub bbox: Option<UnderstoodBox>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct UnderstoodBox {
    #[serde(default)]
    pub l: f64,
    #[serde(default)]
    pub t: f64,
    #[serde(default)]
    pub r: f64,
    #[serde(default)]
    pub b: f64,
}

pub trait Client {
    type Error: std::error::Error + Transient + Send + Sync + 'static;

    /// Identifier recorded in the extraction metadata.
    fn name(&self) -> &str;

    /// Whether the error means the service refuses this document for good.
    fn is_unsupported(error: &Self::Error) -> bool;

    /// One call per document. `staged` is a file holding the document bytes.
    fn understand(
        &self,
        staged: &Path,
        file_name: &str,
    ) -> impl Future<Output = Result<Understanding, Self::Error>> + Send;
}
