//! Hybrid tokenizer-aware chunk splitting/merging.
//!
//! Walks a document's flattened element stream in reading order and packs
//! it into chunks that stay under `max_tokens`, splitting an oversized
//! single element and merging runs of undersized trailing elements so a
//! lone short paragraph doesn't become its own chunk.

use std::collections::HashMap;

use tokenizers::Tokenizer;

use crate::processors::ParsedPage;
use crate::store::{BBox, Chunk, ChunkElement};

use super::maps::build_text_elements_map;
use super::text_cleaning::clean_text;

/// Default chunk size cap, in tokenizer tokens, per the chunker design.
pub const MAX_TOKENS: usize = 512;

/// Counts tokens with a real tokenizer when one is configured, falling
/// back to a whitespace-based approximation otherwise (keeps the chunker
/// usable without bundling a vocabulary file for tests and fakes).
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

pub struct WordCounter;

impl TokenCounter for WordCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

pub struct HuggingFaceTokenCounter {
    tokenizer: Tokenizer,
}

impl HuggingFaceTokenCounter {
    pub fn new(tokenizer: Tokenizer) -> Self {
        Self { tokenizer }
    }
}

impl TokenCounter for HuggingFaceTokenCounter {
    fn count(&self, text: &str) -> usize {
        self.tokenizer
            .encode(text, false)
            .map(|enc| enc.len())
            .unwrap_or_else(|_| text.split_whitespace().count())
    }
}

struct Builder<'a> {
    counter: &'a dyn TokenCounter,
    current_elements: Vec<ChunkElement>,
    current_tokens: usize,
    current_headings: Vec<String>,
    chunks: Vec<Chunk>,
    document_id: String,
    heading_stack: Vec<String>,
}

fn heading_level(label: &str) -> Option<usize> {
    match label {
        "title" | "h1" | "section_header_h1" => Some(1),
        "h2" | "section_header_h2" => Some(2),
        "h3" | "section_header_h3" => Some(3),
        "section_header" | "heading" => Some(1),
        _ => None,
    }
}

impl<'a> Builder<'a> {
    fn new(document_id: &str, counter: &'a dyn TokenCounter) -> Self {
        Self {
            counter,
            current_elements: Vec::new(),
            current_tokens: 0,
            current_headings: Vec::new(),
            chunks: Vec::new(),
            document_id: document_id.to_string(),
            heading_stack: Vec::new(),
        }
    }

    fn element_text_len(element: &ChunkElement) -> usize {
        match element {
            ChunkElement::Text { text, .. } => text.len(),
            _ => 0,
        }
    }

    fn element_tokens(&self, element: &ChunkElement) -> usize {
        match element {
            ChunkElement::Text { text, .. } => self.counter.count(text),
            ChunkElement::Table { rows, .. } => {
                let text = rows
                    .iter()
                    .flat_map(|row| row.iter())
                    .map(|c| c.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                self.counter.count(&text)
            }
            ChunkElement::Image { .. } => 0,
        }
    }

    fn flush(&mut self) {
        if self.current_elements.is_empty() {
            return;
        }
        let page_num = self.current_elements[0].page();
        let mut bboxes: HashMap<u32, Vec<BBox>> = HashMap::new();
        let mut item_types = Vec::new();
        for element in &self.current_elements {
            if let Some(bbox) = element.bbox() {
                bboxes.entry(element.page()).or_default().push(bbox);
            }
            let label = match element {
                ChunkElement::Text { label, .. } => label.clone(),
                ChunkElement::Table { .. } => "table".to_string(),
                ChunkElement::Image { .. } => "image".to_string(),
            };
            item_types.push(label);
        }
        let chunk = Chunk {
            id: format!("{}-chunk-{}", self.document_id, self.chunks.len()),
            document_id: self.document_id.clone(),
            text: String::new(),
            page_num,
            headings: self.current_headings.clone(),
            item_types,
            bboxes,
            chunk_elements: std::mem::take(&mut self.current_elements),
            dense_embedding: None,
            sparse_embedding: None,
        };
        self.chunks.push(chunk);
        self.current_tokens = 0;
    }

    fn push(&mut self, element: ChunkElement) {
        if let ChunkElement::Text { label, text, .. } = &element {
            if let Some(level) = heading_level(label) {
                self.heading_stack.truncate(level - 1);
                self.heading_stack.push(text.clone());
            }
        }
        let tokens = self.element_tokens(&element);
        if self.current_tokens > 0 && self.current_tokens + tokens > MAX_TOKENS {
            self.flush();
        }
        if self.current_elements.is_empty() {
            self.current_headings = self.heading_stack.clone();
        }
        self.current_tokens += tokens;
        self.current_elements.push(element);
    }

    /// Splits an oversized text element's content across sentence
    /// boundaries so no single element overflows `MAX_TOKENS` on its own.
    fn split_oversized_text(&self, label: &str, text: &str, page: u32, bbox: Option<BBox>, position_hint: f64) -> Vec<ChunkElement> {
        let sentences: Vec<&str> = text.split_inclusive(". ").collect();
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut current_tokens = 0;
        for sentence in sentences {
            let sentence_tokens = self.counter.count(sentence);
            if current_tokens > 0 && current_tokens + sentence_tokens > MAX_TOKENS {
                parts.push(std::mem::take(&mut current));
                current_tokens = 0;
            }
            current.push_str(sentence);
            current_tokens += sentence_tokens;
        }
        if !current.is_empty() {
            parts.push(current);
        }
        parts
            .into_iter()
            .map(|part| ChunkElement::Text {
                text: part,
                label: label.to_string(),
                page,
                bbox,
                position_hint,
                is_reference: false,
                inline_references: Vec::new(),
            })
            .collect()
    }
}

/// Splits a document's parsed pages into token-bounded chunks, cleaning
/// every text element's content along the way. Tables and images pass
/// through untouched (cleaning only applies to prose text).
pub fn split_into_chunks(
    document_id: &str,
    pages: &[ParsedPage],
    counter: &dyn TokenCounter,
) -> Vec<Chunk> {
    let elements = build_text_elements_map(pages);
    let mut builder = Builder::new(document_id, counter);

    for element in elements {
        let cleaned = match element {
            ChunkElement::Text {
                text,
                label,
                page,
                bbox,
                position_hint,
                is_reference,
                inline_references,
            } => ChunkElement::Text {
                text: clean_text(&text),
                label,
                page,
                bbox,
                position_hint,
                is_reference,
                inline_references,
            },
            other => other,
        };

        let tokens = builder.element_tokens(&cleaned);
        if tokens > MAX_TOKENS {
            if let ChunkElement::Text {
                label,
                text,
                page,
                bbox,
                position_hint,
                ..
            } = &cleaned
            {
                for part in builder.split_oversized_text(label, text, *page, *bbox, *position_hint) {
                    builder.push(part);
                }
                continue;
            }
        }
        builder.push(cleaned);
    }
    builder.flush();

    merge_undersized_trailing_chunks(builder.chunks, counter)
}

/// Merges a trailing run of undersized chunks into the preceding one
/// rather than leaving lone short paragraphs as standalone chunks,
/// stopping as soon as the merge would exceed `MAX_TOKENS` or the two
/// chunks sit under different heading trails — a short paragraph that
/// opens a new section shouldn't get folded into the previous section.
fn merge_undersized_trailing_chunks(mut chunks: Vec<Chunk>, counter: &dyn TokenCounter) -> Vec<Chunk> {
    const MIN_STANDALONE_TOKENS: usize = 64;

    let mut i = chunks.len();
    while i > 1 {
        i -= 1;
        let tokens: usize = chunks[i]
            .chunk_elements
            .iter()
            .map(|e| match e {
                ChunkElement::Text { text, .. } => counter.count(text),
                _ => 0,
            })
            .sum();
        if tokens >= MIN_STANDALONE_TOKENS {
            continue;
        }
        if chunks[i - 1].headings != chunks[i].headings {
            continue;
        }
        let prev_tokens: usize = chunks[i - 1]
            .chunk_elements
            .iter()
            .map(|e| match e {
                ChunkElement::Text { text, .. } => counter.count(text),
                _ => 0,
            })
            .sum();
        if prev_tokens + tokens > MAX_TOKENS {
            continue;
        }
        let small = chunks.remove(i);
        chunks[i - 1].chunk_elements.extend(small.chunk_elements);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_of_paragraphs(count: usize, words_each: usize) -> ParsedPage {
        ParsedPage {
            page_num: 1,
            page_height: 792.0,
            elements: (0..count)
                .map(|i| ChunkElement::Text {
                    text: vec!["word"; words_each].join(" "),
                    label: "paragraph".into(),
                    page: 1,
                    bbox: None,
                    position_hint: i as f64 * 0.01,
                    is_reference: false,
                    inline_references: Vec::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn packs_multiple_small_elements_into_one_chunk() {
        let pages = vec![page_of_paragraphs(5, 10)];
        let chunks = split_into_chunks("doc1", &pages, &WordCounter);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_elements.len(), 5);
    }

    #[test]
    fn splits_when_token_budget_is_exceeded() {
        let pages = vec![page_of_paragraphs(3, 300)];
        let chunks = split_into_chunks("doc1", &pages, &WordCounter);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            let tokens: usize = chunk
                .chunk_elements
                .iter()
                .map(|e| match e {
                    ChunkElement::Text { text, .. } => text.split_whitespace().count(),
                    _ => 0,
                })
                .sum();
            assert!(tokens <= MAX_TOKENS);
        }
    }

    fn small_chunk(id: &str, headings: Vec<&str>, words: usize) -> Chunk {
        Chunk {
            id: id.into(),
            document_id: "doc1".into(),
            text: String::new(),
            page_num: 1,
            headings: headings.into_iter().map(String::from).collect(),
            item_types: vec!["paragraph".into()],
            bboxes: Default::default(),
            chunk_elements: vec![ChunkElement::Text {
                text: vec!["word"; words].join(" "),
                label: "paragraph".into(),
                page: 1,
                bbox: None,
                position_hint: 0.1,
                is_reference: false,
                inline_references: Vec::new(),
            }],
            dense_embedding: None,
            sparse_embedding: None,
        }
    }

    #[test]
    fn undersized_trailing_chunks_under_the_same_headings_are_merged() {
        let chunks = vec![
            small_chunk("c0", vec!["Intro"], 10),
            small_chunk("c1", vec!["Intro"], 5),
        ];
        let merged = merge_undersized_trailing_chunks(chunks, &WordCounter);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].chunk_elements.len(), 2);
    }

    #[test]
    fn undersized_trailing_chunk_under_a_different_heading_trail_is_not_merged() {
        let chunks = vec![
            small_chunk("c0", vec!["Intro"], 10),
            small_chunk("c1", vec!["Methodology"], 5),
        ];
        let merged = merge_undersized_trailing_chunks(chunks, &WordCounter);
        assert_eq!(merged.len(), 2, "a short chunk opening a new section should stay separate");
    }

    #[test]
    fn oversized_single_element_is_split_across_sentences() {
        let sentence = "This is one sentence with several words in it. ";
        let huge_text = sentence.repeat(200);
        let pages = vec![ParsedPage {
            page_num: 1,
            page_height: 792.0,
            elements: vec![ChunkElement::Text {
                text: huge_text,
                label: "paragraph".into(),
                page: 1,
                bbox: None,
                position_hint: 0.1,
                is_reference: false,
                inline_references: Vec::new(),
            }],
        }];
        let chunks = split_into_chunks("doc1", &pages, &WordCounter);
        assert!(chunks.len() > 1, "a single oversized element must split");
    }
}
