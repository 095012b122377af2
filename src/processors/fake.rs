//! Deterministic in-memory processor implementations.
//!
//! Used by the orchestrator's own tests (no network, no subprocess, no
//! GPU) and available to embedders of this crate that want to exercise
//! the full pipeline end to end without real collaborators.

use async_trait::async_trait;

use super::{ParseOutput, ParsedPage, SummarizeOutput, TagOutput};
use crate::error::Result;
use crate::store::{Chunk, ChunkElement, Document};

/// A parser that fabricates a single page with a couple of text elements
/// from the document's title, so downstream stages have something to
/// chunk without touching the filesystem.
pub struct FakeParser;

#[async_trait]
impl super::Parser for FakeParser {
    async fn parse(&self, document: &Document) -> Result<ParseOutput> {
        let body = if document.title.is_empty() {
            format!("Document {}", document.id)
        } else {
            document.title.clone()
        };
        Ok(ParseOutput {
            parsed_folder: Some(format!("parsed/{}", document.id)),
            page_count: Some(1),
            word_count: Some(body.split_whitespace().count() as u32),
            file_format: Some("pdf".into()),
            file_size_mb: Some(0.1),
            toc: None,
            pages: vec![ParsedPage {
                page_num: 1,
                page_height: 792.0,
                elements: vec![ChunkElement::Text {
                    text: body,
                    label: "paragraph".into(),
                    page: 1,
                    bbox: None,
                    position_hint: 0.1,
                    is_reference: false,
                    inline_references: Vec::new(),
                }],
            }],
        })
    }
}

pub struct FakeSummarizer;

#[async_trait]
impl super::Summarizer for FakeSummarizer {
    async fn summarize(&self, document: &Document) -> Result<SummarizeOutput> {
        Ok(SummarizeOutput {
            full_summary: Some(format!("Summary of {}", document.id)),
        })
    }
}

pub struct FakeTagger;

#[async_trait]
impl super::Tagger for FakeTagger {
    async fn tag(&self, _document: &Document) -> Result<TagOutput> {
        Ok(TagOutput {
            toc_classified: true,
        })
    }
}

/// Produces stable, low-dimensional embeddings deterministically derived
/// from text length so tests can assert on them without floating-point
/// fuzziness across runs.
pub struct FakeEmbedder {
    pub dense_dims: usize,
}

impl Default for FakeEmbedder {
    fn default() -> Self {
        Self { dense_dims: 8 }
    }
}

#[async_trait]
impl super::Embedder for FakeEmbedder {
    async fn embed_dense(&self, text: &str) -> Result<Vec<f32>> {
        let len = text.len() as f32;
        Ok((0..self.dense_dims)
            .map(|i| (len + i as f32).sin())
            .collect())
    }

    async fn embed_sparse(&self, text: &str) -> Result<Vec<(u32, f32)>> {
        let mut weights = std::collections::HashMap::new();
        for word in text.split_whitespace() {
            let token = (word.len() as u32).min(63);
            *weights.entry(token).or_insert(0.0_f32) += 1.0;
        }
        let mut pairs: Vec<(u32, f32)> = weights.into_iter().collect();
        pairs.sort_by_key(|(token, _)| *token);
        Ok(pairs)
    }
}

/// Records indexed documents in memory; useful for asserting that the
/// indexer was invoked with the expected chunk set.
#[derive(Default)]
pub struct FakeIndexer {
    pub indexed: std::sync::Mutex<Vec<(String, usize)>>,
}

#[async_trait]
impl super::Indexer for FakeIndexer {
    async fn index(&self, document: &Document, chunks: &[Chunk]) -> Result<()> {
        self.indexed
            .lock()
            .unwrap()
            .push((document.id.clone(), chunks.len()));
        Ok(())
    }
}
