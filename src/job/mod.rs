//! Job execution module
//!
//! This module turns listed objects into warehouse rows: enumerate, fetch,
//! extract and write, coordinated per run by [`JobExecutor`].

pub mod enumerate;
mod executor;
pub mod extract;
pub mod fetch;
pub mod sink;
pub mod sql;
pub mod storage;

use serde::Serialize;

pub use executor::{CancelReport, FailureReport, JobExecutor, RunSummary};

/// Position of one object in its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    Pending,
    Fetching,
    Extracting,
    Writing,
    Done,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Pending => "pending",
            Stage::Fetching => "fetching",
            Stage::Extracting => "extracting",
            Stage::Writing => "writing",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Failure of a single object. Never aborts the run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjectError {
    #[error("failed to fetch {path}: {cause}")]
    FetchFailed { path: String, cause: String },
    #[error("failed to extract {path}: {cause}")]
    ExtractionFailed { path: String, cause: String },
    #[error("unsupported document {path}: {reason}")]
    UnsupportedDocument { path: String, reason: String },
    #[error("failed to write {path}: {cause}")]
    WriteFailed { path: String, cause: String },
}

impl ObjectError {
    pub fn stage(&self) -> Stage {
        match self {
            ObjectError::FetchFailed { .. } => Stage::Fetching,
            ObjectError::ExtractionFailed { .. } | ObjectError::UnsupportedDocument { .. } => {
                Stage::Extracting
            }
            ObjectError::WriteFailed { .. } => Stage::Writing,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            ObjectError::FetchFailed { path, .. }
            | ObjectError::ExtractionFailed { path, .. }
            | ObjectError::UnsupportedDocument { path, .. }
            | ObjectError::WriteFailed { path, .. } => path,
        }
    }
}

/// Error type for job execution. Only these end a run early.
#[derive(Debug, thiserror::Error)]
pub enum JobError<SE, WE> {
    #[error("object store unavailable: {0}")]
    StoreUnavailable(SE),
    #[error("warehouse: {0}")]
    Warehouse(WE),
}
