//! Chunker: turns a parsed document's page tree into retrieval-ready
//! [`crate::store::Chunk`]s.
//!
//! Pipeline, in order: flatten pages into an element stream, run the
//! hybrid token-bounded splitter (cleaning text as it goes), drop images
//! that don't spatially belong to their chunk, then run the cross-chunk
//! footnote reconciliation and final text rendering pass. Every stage is
//! pure and deterministic — re-running it over the same parsed pages
//! produces byte-identical chunks, which is what lets a document be
//! re-indexed without re-parsing (the idempotence extends to this whole
//! component, not just text cleaning).

pub mod hybrid;
pub mod images;
pub mod maps;
pub mod post;
pub mod text_cleaning;

use crate::processors::ParsedPage;
use crate::store::{Chunk, ChunkElement};

use hybrid::TokenCounter;

/// Runs the full chunking pipeline for one document's parsed pages.
pub fn chunk_document(document_id: &str, pages: &[ParsedPage], counter: &dyn TokenCounter) -> Vec<Chunk> {
    let mut chunks = hybrid::split_into_chunks(document_id, pages, counter);
    for chunk in chunks.iter_mut() {
        let text = post::build_chunk_text(chunk);
        let filtered = images::filter_images_before_text(
            std::mem::take(&mut chunk.chunk_elements),
            &text,
        );
        chunk.chunk_elements = filtered
            .into_iter()
            .filter(|element| !matches!(
                element,
                ChunkElement::Table { rows, .. } if is_table_metadata_noise(rows)
            ))
            .collect();
    }
    post::post_process_chunks(chunks)
}

fn is_table_metadata_noise(rows: &[Vec<crate::store::TableCell>]) -> bool {
    if rows.len() > 1 {
        return false;
    }
    rows.iter()
        .flat_map(|row| row.iter())
        .all(|cell| post::filter_table_metadata_text(&cell.text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::hybrid::WordCounter;

    #[test]
    fn chunk_document_produces_rendered_text_with_hierarchy_prefix() {
        let pages = vec![ParsedPage {
            page_num: 1,
            page_height: 792.0,
            elements: vec![
                ChunkElement::Text {
                    text: "Introduction".into(),
                    label: "h1".into(),
                    page: 1,
                    bbox: None,
                    position_hint: 0.0,
                    is_reference: false,
                    inline_references: Vec::new(),
                },
                ChunkElement::Text {
                    text: "This is the body of the introduction.".into(),
                    label: "paragraph".into(),
                    page: 1,
                    bbox: None,
                    position_hint: 0.1,
                    is_reference: false,
                    inline_references: Vec::new(),
                },
            ],
        }];
        let chunks = chunk_document("doc1", &pages, &WordCounter);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.starts_with("-- Introduction --"));
    }

    #[test]
    fn chunk_document_is_idempotent_over_the_same_parsed_pages() {
        let pages = vec![ParsedPage {
            page_num: 1,
            page_height: 792.0,
            elements: vec![ChunkElement::Text {
                text: "Stable content that should chunk the same way twice.".into(),
                label: "paragraph".into(),
                page: 1,
                bbox: None,
                position_hint: 0.1,
                is_reference: false,
                inline_references: Vec::new(),
            }],
        }];
        let first = chunk_document("doc1", &pages, &WordCounter);
        let second = chunk_document("doc1", &pages, &WordCounter);
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].text, second[0].text);
    }
}
