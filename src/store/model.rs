//! Document, chunk, and status types shared by the store adapter, the
//! selector, the stage machine, and the chunker.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable lifecycle label for a document. Exactly one applies at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Downloaded,
    Parsing,
    Parsed,
    ParseFailed,
    Summarizing,
    Summarized,
    SummarizeFailed,
    Tagging,
    Tagged,
    Indexing,
    Indexed,
    IndexFailed,
    Stopped,
    DownloadError,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Downloaded => "downloaded",
            Self::Parsing => "parsing",
            Self::Parsed => "parsed",
            Self::ParseFailed => "parse_failed",
            Self::Summarizing => "summarizing",
            Self::Summarized => "summarized",
            Self::SummarizeFailed => "summarize_failed",
            Self::Tagging => "tagging",
            Self::Tagged => "tagged",
            Self::Indexing => "indexing",
            Self::Indexed => "indexed",
            Self::IndexFailed => "index_failed",
            Self::Stopped => "stopped",
            Self::DownloadError => "download_error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "downloaded" => Self::Downloaded,
            "parsing" => Self::Parsing,
            "parsed" => Self::Parsed,
            "parse_failed" => Self::ParseFailed,
            "summarizing" => Self::Summarizing,
            "summarized" => Self::Summarized,
            "summarize_failed" => Self::SummarizeFailed,
            "tagging" => Self::Tagging,
            "tagged" => Self::Tagged,
            "indexing" => Self::Indexing,
            "indexed" => Self::Indexed,
            "index_failed" => Self::IndexFailed,
            "stopped" => Self::Stopped,
            "download_error" => Self::DownloadError,
            _ => return None,
        })
    }

    /// `true` for the transient `*-ing` statuses that must never survive a
    /// crash: a supervisor finding one of these after a worker has died
    /// must rewrite it to `Stopped`.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Parsing | Self::Summarizing | Self::Tagging | Self::Indexing
        )
    }
}

/// Timing and outcome for a single stage run against a document.
/// `elapsed_seconds` is `Some` iff the stage has terminated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageRecord {
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: Option<f64>,
    pub success: bool,
    pub error: Option<String>,
}

/// A single evaluation report and its processing lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub organization: Option<String>,
    pub published_year: Option<i32>,
    pub document_type: Option<String>,
    pub country: Option<String>,
    pub language: Option<String>,
    pub filepath: String,
    pub pdf_url: Option<String>,

    pub status: Status,
    pub error_message: Option<String>,
    pub parsed_folder: Option<String>,
    pub stages: HashMap<String, StageRecord>,

    pub page_count: Option<u32>,
    pub word_count: Option<u32>,
    pub file_format: Option<String>,
    pub file_size_mb: Option<f64>,
    pub toc: Option<String>,
    pub toc_classified: bool,
    pub full_summary: Option<String>,
    pub pipeline_elapsed_seconds: Option<f64>,
}

impl Document {
    pub fn new(id: impl Into<String>, filepath: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            organization: None,
            published_year: None,
            document_type: None,
            country: None,
            language: None,
            filepath: filepath.into(),
            pdf_url: None,
            status: Status::Downloaded,
            error_message: None,
            parsed_folder: None,
            stages: HashMap::new(),
            page_count: None,
            word_count: None,
            file_format: None,
            file_size_mb: None,
            toc: None,
            toc_classified: false,
            full_summary: None,
            pipeline_elapsed_seconds: None,
        }
    }

    /// Year sorted safely for `recent_first`: missing/non-integer years sort as 0.
    pub fn sort_year(&self) -> i32 {
        self.published_year.unwrap_or(0)
    }
}

/// A 2-D bounding box `[left, top, right, bottom]` in PDF coordinate space.
pub type BBox = [f64; 4];

/// A footnote or endnote inline reference found in a text element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineReference {
    pub number: u32,
    pub position: usize,
    pub pattern: &'static str,
}

/// One cell of a table row, associated with a chunk element.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableCell {
    pub text: String,
}

/// A tagged element inside a chunk's `chunk_elements` sequence, modeled
/// as a sum type rather than runtime class inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "element_type", rename_all = "snake_case")]
pub enum ChunkElement {
    Text {
        text: String,
        label: String,
        page: u32,
        bbox: Option<BBox>,
        position_hint: f64,
        #[serde(default)]
        is_reference: bool,
        #[serde(default)]
        inline_references: Vec<InlineReference>,
    },
    Table {
        idx: usize,
        page: u32,
        bbox: Option<BBox>,
        position_hint: f64,
        rows: Vec<Vec<TableCell>>,
    },
    Image {
        path: String,
        page: u32,
        bbox: Option<BBox>,
        position_hint: f64,
    },
}

impl ChunkElement {
    pub fn page(&self) -> u32 {
        match self {
            ChunkElement::Text { page, .. }
            | ChunkElement::Table { page, .. }
            | ChunkElement::Image { page, .. } => *page,
        }
    }

    pub fn position_hint(&self) -> f64 {
        match self {
            ChunkElement::Text { position_hint, .. }
            | ChunkElement::Table { position_hint, .. }
            | ChunkElement::Image { position_hint, .. } => *position_hint,
        }
    }

    pub fn bbox(&self) -> Option<BBox> {
        match self {
            ChunkElement::Text { bbox, .. }
            | ChunkElement::Table { bbox, .. }
            | ChunkElement::Image { bbox, .. } => *bbox,
        }
    }
}

/// A retrieval-ready unit of document text, fully regenerable from the
/// parsed document representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub page_num: u32,
    pub headings: Vec<String>,
    pub item_types: Vec<String>,
    pub bboxes: HashMap<u32, Vec<BBox>>,
    pub chunk_elements: Vec<ChunkElement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dense_embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sparse_embedding: Option<Vec<(u32, f32)>>,
}
