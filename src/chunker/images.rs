//! Spatial image filtering.
//!
//! A figure image only belongs in a chunk if its vertical extent overlaps
//! the chunk's text, or — when the surrounding text looks like a caption —
//! is within a generous tolerance of it. Without this, page layouts with
//! two-column figures tend to pull unrelated images into every chunk on
//! the page.

use crate::store::{BBox, ChunkElement};

/// Vertical tolerance (PDF points) applied when the text immediately
/// around an image looks like a figure caption.
const CAPTION_TOLERANCE: f64 = 250.0;

const CAPTION_KEYWORDS: &[&str] = &["figure", "fig.", "chart", "diagram", "exhibit", "table"];

fn looks_like_caption(text: &str) -> bool {
    let lower = text.to_lowercase();
    CAPTION_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// The `[min_y, max_y]` vertical span covered by a chunk's text elements,
/// in the same coordinate space as element bboxes (`bbox[1]` = top,
/// `bbox[3]` = bottom).
pub fn calculate_text_bbox_ranges(elements: &[ChunkElement]) -> Option<(f64, f64)> {
    let mut min_y = f64::MAX;
    let mut max_y = f64::MIN;
    let mut found = false;
    for element in elements {
        if let ChunkElement::Text { bbox: Some(b), .. } = element {
            min_y = min_y.min(b[1]);
            max_y = max_y.max(b[3]);
            found = true;
        }
    }
    found.then_some((min_y, max_y))
}

fn ranges_overlap(a: (f64, f64), b: (f64, f64)) -> bool {
    a.0 <= b.1 && b.0 <= a.1
}

fn expand(range: (f64, f64), tolerance: f64) -> (f64, f64) {
    (range.0 - tolerance, range.1 + tolerance)
}

/// Whether `image_bbox` should be included alongside text spanning
/// `text_range`. Strict Y-overlap passes unconditionally; otherwise the
/// image is kept only if nearby text reads like a caption and the gap is
/// within [`CAPTION_TOLERANCE`].
pub fn should_include_image(image_bbox: BBox, text_range: (f64, f64), nearby_text: &str) -> bool {
    let image_range = (image_bbox[1], image_bbox[3]);
    if ranges_overlap(image_range, text_range) {
        return true;
    }
    if looks_like_caption(nearby_text) {
        return ranges_overlap(image_range, expand(text_range, CAPTION_TOLERANCE));
    }
    false
}

/// Index of the first text element that doesn't read like a caption. No
/// match (every text element looks like a caption, or there's no text at
/// all) means the chunk has no boundary to apply the leading-image rule
/// against, so it doesn't apply.
fn first_non_caption_text_index(elements: &[ChunkElement]) -> Option<usize> {
    elements
        .iter()
        .position(|e| matches!(e, ChunkElement::Text { text, .. } if !looks_like_caption(text)))
}

/// Drops any image sitting before the first non-caption text element in
/// reading order — a figure stranded at the top of a chunk with nothing
/// above it but its own caption almost never belongs to that chunk.
fn drop_images_before_first_non_caption_text(elements: Vec<ChunkElement>) -> Vec<ChunkElement> {
    let Some(cutoff) = first_non_caption_text_index(&elements) else {
        return elements;
    };
    elements
        .into_iter()
        .enumerate()
        .filter(|(i, e)| *i >= cutoff || !matches!(e, ChunkElement::Image { .. }))
        .map(|(_, e)| e)
        .collect()
}

/// Drops images from `elements` that fail [`should_include_image`]
/// against the chunk's combined text span, after first dropping any
/// image that leads the chunk before its first non-caption text.
pub fn filter_images_before_text(elements: Vec<ChunkElement>, chunk_text: &str) -> Vec<ChunkElement> {
    let elements = drop_images_before_first_non_caption_text(elements);

    let Some(text_range) = calculate_text_bbox_ranges(&elements) else {
        return elements
            .into_iter()
            .filter(|e| !matches!(e, ChunkElement::Image { .. }))
            .collect();
    };
    elements
        .into_iter()
        .filter(|element| match element {
            ChunkElement::Image { bbox: Some(b), .. } => {
                should_include_image(*b, text_range, chunk_text)
            }
            ChunkElement::Image { bbox: None, .. } => false,
            _ => true,
        })
        .collect()
}
