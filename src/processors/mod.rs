//! Stage processor traits.
//!
//! The orchestrator never knows how a document is actually parsed,
//! summarized, tagged, or embedded — it only knows the stage contract.
//! Real implementations (calling out to a parsing service, an LLM, an
//! embedding server) are out of scope for this crate; [`fake`] supplies
//! deterministic in-memory implementations used by the orchestrator's
//! own tests and by anything downstream that wants to exercise the
//! pipeline without real collaborators.

pub mod fake;

use async_trait::async_trait;

use crate::error::Result;
use crate::store::{Chunk, Document};

/// Output of a successful parse: the subset of [`Document`] fields the
/// stage is allowed to populate, plus the parsed page tree the chunker
/// consumes later. Kept separate from `Document` so a processor cannot
/// accidentally overwrite lifecycle bookkeeping fields.
#[derive(Debug, Clone, Default)]
pub struct ParseOutput {
    pub parsed_folder: Option<String>,
    pub page_count: Option<u32>,
    pub word_count: Option<u32>,
    pub file_format: Option<String>,
    pub file_size_mb: Option<f64>,
    pub toc: Option<String>,
    /// Parsed page elements, keyed by page number, ready for the chunker.
    pub pages: Vec<ParsedPage>,
}

/// One page of a parsed document: its raw text elements, tables, and
/// images, in source order. Mirrors the shape the chunker's element maps
/// (`chunker::maps`) are built from.
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    pub page_num: u32,
    pub page_height: f64,
    pub elements: Vec<crate::store::ChunkElement>,
}

#[derive(Debug, Clone, Default)]
pub struct SummarizeOutput {
    pub full_summary: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TagOutput {
    pub toc_classified: bool,
}

/// Parses a downloaded document into page-level elements, the chunker's raw input.
#[async_trait]
pub trait Parser: Send + Sync {
    async fn parse(&self, document: &Document) -> Result<ParseOutput>;
}

/// Produces a whole-document summary from a parsed document.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, document: &Document) -> Result<SummarizeOutput>;
}

/// Classifies a document's table of contents / section structure.
#[async_trait]
pub trait Tagger: Send + Sync {
    async fn tag(&self, document: &Document) -> Result<TagOutput>;
}

/// Embeds chunk text (and optionally table text) for retrieval.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_dense(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_sparse(&self, text: &str) -> Result<Vec<(u32, f32)>>;
}

/// Persists finished chunks and marks a document indexed. Separate from
/// [`crate::store::DocumentStore`] because an indexer may also need to
/// push vectors to an external index, not just the local store.
#[async_trait]
pub trait Indexer: Send + Sync {
    async fn index(&self, document: &Document, chunks: &[Chunk]) -> Result<()>;
}
