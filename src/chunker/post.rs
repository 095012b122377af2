//! Cross-chunk footnote post-processing.
//!
//! Footnote markers are detected per-chunk but footnotes themselves can
//! live in a different chunk than the text that references them (often
//! the last chunk on a page, or the document's endnotes section). This
//! pass builds a document-wide footnote registry, finds inline references
//! against it, and reconciles: a chunk element carrying an unreferenced
//! footnote definition is dropped, while a chunk missing a footnote that
//! another chunk references gets a synthetic one re-added.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::store::{Chunk, ChunkElement, InlineReference};

/// Footnote-definition markers recognized at the start of a text element:
/// `[^12]`, `[12]`, `^12`, or `<sup>12</sup>`, each optionally followed by
/// `:`.
static FOOTNOTE_DEFINITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\[\^|\[|\^|<sup>)*(\d{1,3})(?:\]|</sup>|:)*\s").unwrap());

/// Inline reference patterns, checked in order and named so callers can
/// see why a reference was detected.
static PERIOD_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.(\d{1,3})\s").unwrap());
static START_OF_TEXT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{1,3})\s").unwrap());
static COMMA_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",(\d{1,3})\s").unwrap());
static PERIOD_NEWLINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.(\d{1,3})\n").unwrap());
static GEOMETRIC_CARET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\^(\d{1,3})\b").unwrap());
static BRACKET_CARET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[\^(\d{1,3})\]").unwrap());
static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<sup>(\d{1,3})</sup>").unwrap());

fn inline_patterns() -> [(&'static str, &'static Regex); 7] {
    [
        ("period_space", &PERIOD_SPACE),
        ("start_of_text", &START_OF_TEXT),
        ("comma_space", &COMMA_SPACE),
        ("period_newline", &PERIOD_NEWLINE),
        ("geometric_caret", &GEOMETRIC_CARET),
        ("bracket_caret", &BRACKET_CARET),
        ("html_tag", &HTML_TAG),
    ]
}

/// A known footnote definition: its number and which chunk element defines it.
#[derive(Debug, Clone)]
struct FootnoteDef {
    number: u32,
    chunk_index: usize,
    element_index: usize,
}

/// Scans every chunk's text elements for a leading footnote-definition
/// marker and records where each numbered footnote lives.
fn build_footnote_registry(chunks: &[Chunk]) -> HashMap<u32, FootnoteDef> {
    let mut registry = HashMap::new();
    for (chunk_index, chunk) in chunks.iter().enumerate() {
        for (element_index, element) in chunk.chunk_elements.iter().enumerate() {
            if let ChunkElement::Text { text, .. } = element {
                if let Some(caps) = FOOTNOTE_DEFINITION.captures(text) {
                    if let Ok(number) = caps[1].parse::<u32>() {
                        registry.insert(
                            number,
                            FootnoteDef {
                                number,
                                chunk_index,
                                element_index,
                            },
                        );
                    }
                }
            }
        }
    }
    registry
}

/// Finds every inline footnote reference in `text` whose number is present
/// in `footnote_numbers` (the document-wide registry), trying each pattern
/// in order and keeping the first match at each position. A number not in
/// the registry is just a plain digit — the only thing separating "page
/// 14" from a reference to footnote 14 is that the latter has a definition
/// somewhere in the document.
fn detect_inline_references(text: &str, footnote_numbers: &HashMap<u32, FootnoteDef>) -> Vec<InlineReference> {
    let mut found = Vec::new();
    for (name, regex) in inline_patterns() {
        for caps in regex.captures_iter(text) {
            if let Some(num_match) = caps.get(1) {
                if let Ok(number) = num_match.as_str().parse::<u32>() {
                    if !footnote_numbers.contains_key(&number) {
                        continue;
                    }
                    found.push(InlineReference {
                        number,
                        position: num_match.start(),
                        pattern: name,
                    });
                }
            }
        }
    }
    found.sort_by_key(|r| r.position);
    found.dedup_by_key(|r| r.position);
    found
}

/// Annotates every text element's `inline_references` against the
/// document-wide footnote registry. A footnote-definition line is skipped
/// (left with no inline references of its own) — its leading marker would
/// otherwise self-match `start_of_text` and make every definition look
/// referenced by itself.
fn annotate_inline_references(chunks: &mut [Chunk], registry: &HashMap<u32, FootnoteDef>) {
    for chunk in chunks.iter_mut() {
        for element in chunk.chunk_elements.iter_mut() {
            if let ChunkElement::Text {
                text,
                inline_references,
                ..
            } = element
            {
                *inline_references = if FOOTNOTE_DEFINITION.is_match(text) {
                    Vec::new()
                } else {
                    detect_inline_references(text, registry)
                };
            }
        }
    }
}

/// Reconciles footnotes per chunk, matching the scoping of
/// `_filter_chunk_elements`/`_add_missing_footnotes`: a chunk only keeps a
/// footnote-definition element if something *in that same chunk*
/// references it, and a chunk referencing a number it doesn't itself
/// define gets that definition's text copied in from wherever else in the
/// document it lives (or, if the registry has no definition for it at all,
/// a synthesized placeholder).
pub fn reconcile_footnotes(chunks: &mut Vec<Chunk>) {
    let registry = build_footnote_registry(chunks);
    annotate_inline_references(chunks, &registry);

    let definitions: HashMap<u32, ChunkElement> = registry
        .values()
        .filter_map(|def| {
            chunks[def.chunk_index]
                .chunk_elements
                .get(def.element_index)
                .cloned()
                .map(|element| (def.number, element))
        })
        .collect();

    for (chunk_index, chunk) in chunks.iter_mut().enumerate() {
        let referenced: HashSet<u32> = chunk
            .chunk_elements
            .iter()
            .filter_map(|element| match element {
                ChunkElement::Text {
                    inline_references, ..
                } => Some(inline_references.iter().map(|r| r.number)),
                _ => None,
            })
            .flatten()
            .collect();

        let mut to_drop = Vec::new();
        for (element_index, element) in chunk.chunk_elements.iter().enumerate() {
            if let ChunkElement::Text { text, .. } = element {
                if let Some(caps) = FOOTNOTE_DEFINITION.captures(text) {
                    if let Ok(number) = caps[1].parse::<u32>() {
                        let defines_here = registry.get(&number).map(|d| d.chunk_index) == Some(chunk_index);
                        if defines_here && !referenced.contains(&number) {
                            to_drop.push(element_index);
                        }
                    }
                }
            }
        }
        for element_index in to_drop.into_iter().rev() {
            chunk.chunk_elements.remove(element_index);
        }

        let locally_defined: HashSet<u32> = registry
            .values()
            .filter(|def| def.chunk_index == chunk_index)
            .map(|def| def.number)
            .collect();
        let mut missing: Vec<u32> = referenced
            .iter()
            .filter(|number| !locally_defined.contains(number))
            .copied()
            .collect();
        missing.sort_unstable();
        for number in missing {
            let element = definitions.get(&number).cloned().unwrap_or_else(|| ChunkElement::Text {
                text: format!("[^{number}] (reference recovered, original definition missing)"),
                label: "footnote".into(),
                page: chunk.page_num,
                bbox: None,
                position_hint: 1.0,
                is_reference: true,
                inline_references: Vec::new(),
            });
            chunk.chunk_elements.push(element);
        }
    }
}

/// Orders a chunk's elements by page, then by `position_hint` — the
/// canonical reading order the hybrid splitter assembled them in, but
/// re-asserted here in case footnote reconciliation appended new elements
/// out of order.
pub fn sort_chunk_elements(chunk: &mut Chunk) {
    chunk
        .chunk_elements
        .sort_by(|a, b| a.page().cmp(&b.page()).then(a.position_hint().total_cmp(&b.position_hint())));
}

fn build_table_text(rows: &[Vec<crate::store::TableCell>]) -> String {
    rows.iter()
        .map(|row| {
            row.iter()
                .map(|cell| cell.text.as_str())
                .collect::<Vec<_>>()
                .join(" | ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders a chunk's elements into its final `text` field: text elements
/// joined by blank lines, tables rendered as pipe-delimited rows, images
/// contributing nothing (they're carried as metadata/bboxes only).
pub fn build_chunk_text(chunk: &Chunk) -> String {
    chunk
        .chunk_elements
        .iter()
        .filter_map(|element| match element {
            ChunkElement::Text { text, .. } => Some(text.clone()),
            ChunkElement::Table { rows, .. } => Some(build_table_text(rows)),
            ChunkElement::Image { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Prefixes a chunk's text with its heading breadcrumb
/// (`-- h1 > h2 > h3 --`), using at most the last three ancestor headings.
pub fn inject_hierarchy_prefix(chunk: &Chunk) -> String {
    let body = build_chunk_text(chunk);
    if chunk.headings.is_empty() {
        return body;
    }
    let start = chunk.headings.len().saturating_sub(3);
    let breadcrumb = chunk.headings[start..].join(" > ");
    format!("-- {breadcrumb} --\n\n{body}")
}

/// Drops table-metadata boilerplate text (page numbers, running headers)
/// that sometimes survives as a standalone short text element next to a
/// table, per `filter_table_metadata_text` — only applied when the
/// element's text is short, so real body text is never touched.
static TABLE_METADATA_PATTERNS: &[&str] = &[
    r"^(?i)page \d+(?: of \d+)?$",
    r"^(?i)table \d+(?: continued)?$",
    r"^\d+$",
    r"^(?i)continued on next page$",
    r"^-{3,}$",
];

pub fn filter_table_metadata_text(text: &str) -> bool {
    if text.chars().count() >= 100 {
        return false;
    }
    let trimmed = text.trim();
    TABLE_METADATA_PATTERNS
        .iter()
        .any(|pat| Regex::new(pat).map(|re| re.is_match(trimmed)).unwrap_or(false))
}

/// Runs the full post-processing pass over a document's chunks: inline
/// reference detection, footnote reconciliation, re-sort, then text/prefix
/// rendering into each chunk's final `text` field.
pub fn post_process_chunks(mut chunks: Vec<Chunk>) -> Vec<Chunk> {
    reconcile_footnotes(&mut chunks);
    for chunk in chunks.iter_mut() {
        sort_chunk_elements(chunk);
        chunk.text = inject_hierarchy_prefix(chunk);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.into(),
            document_id: "doc".into(),
            text: String::new(),
            page_num: 1,
            headings: vec!["Overview".into(), "Methodology".into()],
            item_types: vec!["paragraph".into()],
            bboxes: Default::default(),
            chunk_elements: vec![ChunkElement::Text {
                text: text.into(),
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
    fn unreferenced_footnote_definition_is_dropped() {
        let mut chunks = vec![
            text_chunk("c1", "Body text with no reference markers."),
            text_chunk("c2", "1 An orphaned footnote nobody points to."),
        ];
        reconcile_footnotes(&mut chunks);
        assert_eq!(chunks[1].chunk_elements.len(), 0);
    }

    #[test]
    fn referenced_footnote_defined_in_another_chunk_is_copied_in() {
        let mut chunks = vec![
            text_chunk("c1", "A claim worth citing.14 "),
            text_chunk("c2", "14 United Nations evaluation framework."),
        ];
        reconcile_footnotes(&mut chunks);
        let first = &chunks[0];
        let has_definition = first.chunk_elements.iter().any(|e| matches!(
            e,
            ChunkElement::Text { text, .. } if text.starts_with("14 United Nations")
        ));
        assert!(has_definition, "chunk referencing footnote 14 should get its definition copied in from elsewhere in the document");
    }

    #[test]
    fn inline_reference_to_an_undefined_number_is_ignored() {
        let mut chunks = vec![text_chunk("c1", "A claim worth citing.14 ")];
        reconcile_footnotes(&mut chunks);
        assert_eq!(chunks[0].chunk_elements.len(), 1, "no definition anywhere means 14 is just a digit, not a reference");
    }

    #[test]
    fn hierarchy_prefix_uses_last_three_headings() {
        let mut chunk = text_chunk("c1", "content");
        chunk.headings = vec!["A".into(), "B".into(), "C".into(), "D".into()];
        let rendered = inject_hierarchy_prefix(&chunk);
        assert!(rendered.starts_with("-- B > C > D --\n\n"));
    }

    #[test]
    fn table_metadata_filter_only_applies_to_short_text() {
        assert!(filter_table_metadata_text("Page 3 of 12"));
        assert!(!filter_table_metadata_text(
            "Page 3 of 12 discusses the methodology used across all evaluation sites in significant depth."
        ));
    }
}
