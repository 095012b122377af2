//! Crate-wide error types.
//!
//! Mirrors the fatal/non-fatal boundary from the error-handling design:
//! [`PipelineError`] propagates only for conditions that should abort the
//! run (bad configuration, a broken store, an invalid partition spec).
//! Per-document and per-stage failures are captured as data
//! ([`crate::stage_machine::StageOutcome`]) and never become a `PipelineError`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid partition spec '{0}': expected 'M/N' with 1 <= M <= N")]
    InvalidPartition(String),

    #[error("unknown data source: {0}")]
    UnknownDataSource(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("field '{0}' is not facetable")]
    InvalidField(String),

    #[error("downloader not configured for data source '{0}'")]
    DownloaderNotConfigured(String),

    #[error("downloader exited with non-zero status: {0}")]
    DownloaderFailed(std::process::ExitStatus),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
