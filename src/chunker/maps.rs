//! Text-element and table-index maps.
//!
//! The hybrid splitter and the footnote/image post-processing passes all
//! need to look elements up by page and by position without re-deriving
//! `position_hint` each time, so the parsed page tree is flattened into
//! these two maps once per document.

use std::collections::HashMap;

use crate::processors::ParsedPage;
use crate::store::ChunkElement;

/// `position_hint` is the element's vertical position on its page,
/// normalized to `[0, 1]` with `0` at the top:
/// `round((page_height - bbox_bottom) / page_height, 3)`.
pub fn position_hint(bbox_bottom: f64, page_height: f64) -> f64 {
    if page_height <= 0.0 {
        return 0.0;
    }
    let hint = (page_height - bbox_bottom) / page_height;
    (hint * 1000.0).round() / 1000.0
}

/// All text/table/image elements for a document, in page-then-position
/// order, ready for the hybrid splitter to walk linearly.
pub fn build_text_elements_map(pages: &[ParsedPage]) -> Vec<ChunkElement> {
    let mut elements: Vec<ChunkElement> = pages
        .iter()
        .flat_map(|page| page.elements.iter().cloned())
        .collect();
    elements.sort_by(|a, b| {
        a.page()
            .cmp(&b.page())
            .then(a.position_hint().total_cmp(&b.position_hint()))
    });
    elements
}

/// Maps a table's `idx` to its owning page, so the hybrid splitter can
/// attach a table to the chunk that contains the text surrounding it
/// without re-scanning every element.
pub fn build_table_index_map(pages: &[ParsedPage]) -> HashMap<usize, u32> {
    let mut map = HashMap::new();
    for page in pages {
        for element in &page.elements {
            if let ChunkElement::Table { idx, page: p, .. } = element {
                map.insert(*idx, *p);
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_hint_is_zero_at_top_and_one_at_bottom() {
        assert_eq!(position_hint(792.0, 792.0), 0.0);
        assert_eq!(position_hint(0.0, 792.0), 1.0);
    }

    #[test]
    fn text_elements_map_is_sorted_by_page_then_position() {
        let pages = vec![ParsedPage {
            page_num: 1,
            page_height: 792.0,
            elements: vec![
                ChunkElement::Text {
                    text: "second".into(),
                    label: "paragraph".into(),
                    page: 1,
                    bbox: None,
                    position_hint: 0.5,
                    is_reference: false,
                    inline_references: Vec::new(),
                },
                ChunkElement::Text {
                    text: "first".into(),
                    label: "paragraph".into(),
                    page: 1,
                    bbox: None,
                    position_hint: 0.1,
                    is_reference: false,
                    inline_references: Vec::new(),
                },
            ],
        }];
        let map = build_text_elements_map(&pages);
        let ChunkElement::Text { text, .. } = &map[0] else {
            panic!("expected text element");
        };
        assert_eq!(text, "first");
    }
}
