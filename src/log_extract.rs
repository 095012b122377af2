//! Processing log extraction.
//!
//! A bounded synchronous scan of the orchestrator's own log file for
//! lines tagged with a given document id, used to build a per-document
//! processing report without re-running anything.

use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::Result;

/// Maximum number of matching lines collected per document, so a pathological
/// log (or a document id that happens to be a common substring) can't make
/// this scan unbounded.
pub const MAX_LOG_LINES: usize = 500;

/// Extracts every log line mentioning `document_id` from `log_path`, in
/// file order, capped at [`MAX_LOG_LINES`].
pub fn extract_document_log(log_path: &Path, document_id: &str) -> Result<Vec<String>> {
    let file = std::fs::File::open(log_path)?;
    let reader = BufReader::new(file);
    let mut matched = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.contains(document_id) {
            matched.push(line);
            if matched.len() >= MAX_LOG_LINES {
                break;
            }
        }
    }
    Ok(matched)
}

/// Builds a short, human-readable summary of a document's processing
/// history from its matched log lines: stage lines it went through and
/// whether an error line was seen, mirroring the qualitative content of
/// `_generate_processing_log`'s report without parsing its exact format.
pub fn summarize_document_log(lines: &[String]) -> String {
    if lines.is_empty() {
        return "no log entries found for this document".to_string();
    }
    let error_count = lines.iter().filter(|l| l.to_lowercase().contains("error")).count();
    format!(
        "{} matching log lines, {} mentioning an error",
        lines.len(),
        error_count
    )
}
