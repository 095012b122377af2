//! Document store adapter.
//!
//! Exposes a single logical interface over the physical store — the
//! contract is what callers depend on, not which engine answers a given
//! field.

mod model;
mod sqlite;

pub use model::{BBox, Chunk, ChunkElement, Document, InlineReference, StageRecord, Status, TableCell};
pub use sqlite::SqliteStore;

use crate::error::Result;

/// Filter/ordering facets surfaced by the store for year-faceted fetches.
pub trait DocumentStore: Send + Sync {
    /// All documents currently in `status`, optionally restricted to a single year.
    fn get_documents_by_status(&self, status: Status, year: Option<i32>) -> Result<Vec<Document>>;

    /// Distinct `published_year` values present among documents in `status`,
    /// descending. Used to drive `recent_first` fetches without scanning
    /// the whole status bucket at once.
    fn get_years_for_status(&self, status: Status) -> Result<Vec<i32>>;

    fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// Merge `fields` into the stored document. When `wait` is true the
    /// write is durable and observable by the time this call returns: a
    /// subsequent `get_document`/`get_documents_by_status` on the same
    /// store handle will see it. When `wait` is false the write may still
    /// be durable immediately (this adapter has no async replication lag),
    /// but callers must not rely on that — only a `wait=true` write is
    /// part of the contract.
    fn update_document(&self, id: &str, fields: DocumentUpdate, wait: bool) -> Result<()>;

    fn delete_document_chunks(&self, document_id: &str) -> Result<()>;

    fn clear_all_data(&self) -> Result<()>;

    fn list_documents(&self, offset: usize, limit: usize) -> Result<Vec<Document>>;

    fn save_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()>;

    fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>>;

    /// Distinct values of a facetable document field (`organization`,
    /// `document_type`, `country`, `language`, or `status`), optionally
    /// narrowed to values containing `filter` as a substring. `field` is
    /// validated against a fixed allow-list by the implementation rather
    /// than interpolated directly, since it ultimately comes from CLI input.
    fn facet_documents(&self, field: &str, filter: Option<&str>) -> Result<Vec<String>>;
}

/// A partial update to merge into a stored document. Every field left
/// `None` is left untouched; `stages` entries are merged per-key, not
/// replaced wholesale, matching the read-modify-write the stage machine
/// performs against `sys_stages` in the source implementation.
#[derive(Debug, Clone, Default)]
pub struct DocumentUpdate {
    pub status: Option<Status>,
    pub error_message: Option<Option<String>>,
    pub parsed_folder: Option<Option<String>>,
    pub stage: Option<(String, StageRecord)>,
    pub page_count: Option<Option<u32>>,
    pub word_count: Option<Option<u32>>,
    pub file_format: Option<Option<String>>,
    pub file_size_mb: Option<Option<f64>>,
    pub toc: Option<Option<String>>,
    pub toc_classified: Option<bool>,
    pub full_summary: Option<Option<String>>,
    pub pipeline_elapsed_seconds: Option<Option<f64>>,
}

impl DocumentUpdate {
    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn stopped(reason: impl Into<String>) -> Self {
        Self {
            status: Some(Status::Stopped),
            error_message: Some(Some(reason.into())),
            ..Default::default()
        }
    }

    pub fn with_stage(mut self, stage: impl Into<String>, record: StageRecord) -> Self {
        self.stage = Some((stage.into(), record));
        self
    }
}
