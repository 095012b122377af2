//! Document selector.
//!
//! Decides, for a given pipeline stage, which documents a run should touch:
//! which status bucket feeds that stage, how duplicates are resolved, how
//! agency/report filters are applied, how results are ordered, and how a
//! `partition_num/partition_total` split carves out this process's slice.
//! Documents with no `published_year` sort as if published in year 0, so
//! they never shadow the `recent_first` ordering with an unknown date.

use crate::error::{PipelineError, Result};
use crate::store::{Document, DocumentStore, Status};

/// The pipeline stage a selection feeds. Each maps to the status bucket(s)
/// that hold its eligible input documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Parse,
    Summarize,
    Tag,
    Index,
}

impl Stage {
    /// Status buckets this stage reads from, most-preferred first. `index`
    /// accepts both `summarized` and `parsed` documents (an indexed-only
    /// run skips summarization), mirroring `collect_docs_by_stage`'s stage
    /// config tuple list.
    fn source_statuses(&self) -> &'static [Status] {
        match self {
            Stage::Parse => &[Status::Downloaded],
            Stage::Summarize => &[Status::Parsed],
            Stage::Tag => &[Status::Summarized],
            Stage::Index => &[Status::Summarized, Status::Parsed],
        }
    }
}

/// Optional narrowing filters applied after stage-gated collection, before
/// sorting and partitioning. `doc_id` short-circuits the rest of selection
/// entirely (see [`select_documents`]); `year`/`from_year`/`to_year` narrow
/// by `published_year` once the stage's status bucket has been collected.
#[derive(Debug, Clone, Default)]
pub struct SelectionFilters {
    pub agency: Option<String>,
    pub report: Option<String>,
    pub year: Option<i32>,
    pub from_year: Option<i32>,
    pub to_year: Option<i32>,
    pub doc_id: Option<String>,
}

impl SelectionFilters {
    fn matches(&self, doc: &Document) -> bool {
        if let Some(agency) = &self.agency {
            if doc.organization.as_deref() != Some(agency.as_str()) {
                return false;
            }
        }
        if let Some(report) = &self.report {
            if !doc.filepath.contains(report.as_str()) {
                return false;
            }
        }
        if let Some(year) = self.year {
            if doc.published_year != Some(year) {
                return false;
            }
        }
        if let Some(from_year) = self.from_year {
            if doc.sort_year() < from_year {
                return false;
            }
        }
        if let Some(to_year) = self.to_year {
            if doc.sort_year() > to_year {
                return false;
            }
        }
        true
    }
}

/// A validated `partition_num/partition_total` pair (1-indexed, `num <= total`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub num: usize,
    pub total: usize,
}

impl Partition {
    pub fn parse(spec: &str) -> Result<Self> {
        let (num_s, total_s) = spec
            .split_once('/')
            .ok_or_else(|| PipelineError::InvalidPartition(spec.to_string()))?;
        let num: usize = num_s
            .trim()
            .parse()
            .map_err(|_| PipelineError::InvalidPartition(spec.to_string()))?;
        let total: usize = total_s
            .trim()
            .parse()
            .map_err(|_| PipelineError::InvalidPartition(spec.to_string()))?;
        if num == 0 || total == 0 || num > total {
            return Err(PipelineError::InvalidPartition(spec.to_string()));
        }
        Ok(Self { num, total })
    }
}

/// Collect every document eligible for `stage`, across all of its source
/// status buckets, deduped by id (last bucket wins, matching
/// `dedupe_docs_by_id`'s "last seen" rule over the `stage_configs` order).
pub fn collect_docs_by_stage(store: &dyn DocumentStore, stage: Stage) -> Result<Vec<Document>> {
    let mut by_id: Vec<Document> = Vec::new();
    for status in stage.source_statuses() {
        let docs = store.get_documents_by_status(*status, None)?;
        dedupe_merge(&mut by_id, docs);
    }
    Ok(by_id)
}

/// Merge `incoming` into `acc`, keeping the last-seen document for any
/// repeated id (an id present in more than one status bucket — shouldn't
/// happen given each document has exactly one status, but the merge rule
/// is defined defensively anyway).
fn dedupe_merge(acc: &mut Vec<Document>, incoming: Vec<Document>) {
    for doc in incoming {
        if let Some(existing) = acc.iter_mut().find(|d| d.id == doc.id) {
            *existing = doc;
        } else {
            acc.push(doc);
        }
    }
}

/// Sort `docs` most-recent-first by `published_year`, treating a missing
/// year as `0` so undated documents sort last. Ties are broken by id for a
/// deterministic order across runs.
pub fn sort_recent_first(mut docs: Vec<Document>) -> Vec<Document> {
    docs.sort_by(|a, b| {
        b.sort_year()
            .cmp(&a.sort_year())
            .then_with(|| a.id.cmp(&b.id))
    });
    docs
}

/// Apply agency/report filters, dropping documents that fail either check.
pub fn apply_filters(docs: Vec<Document>, filters: &SelectionFilters) -> Vec<Document> {
    docs.into_iter().filter(|d| filters.matches(d)).collect()
}

/// Split `docs` into `partition.total` contiguous, roughly-equal slices and
/// return the one at `partition.num` (1-indexed). The `total_docs %
/// partition.total` remainder is distributed to the first `remainder`
/// slices, one extra document each — ported verbatim from
/// `get_partition_slice`.
pub fn partition_slice(docs: Vec<Document>, partition: Option<Partition>) -> Vec<Document> {
    let Some(partition) = partition else {
        return docs;
    };
    let total_docs = docs.len();
    let chunk_size = total_docs / partition.total;
    let remainder = total_docs % partition.total;

    let mut start = 0usize;
    for i in 1..partition.num {
        start += chunk_size + usize::from(i <= remainder);
    }
    let end = start + chunk_size + usize::from(partition.num <= remainder);

    docs.into_iter()
        .skip(start)
        .take(end.saturating_sub(start))
        .collect()
}

/// Full selection pipeline for a stage: collect, filter, sort recent-first
/// (only when `recent_first` is set — natural store order otherwise),
/// partition, then truncate to `limit` (if any). This is the single entry
/// point the worker pool and CLI call; the sub-steps above stay public for
/// targeted testing.
///
/// If `filters.doc_id` is set, everything else is bypassed: the named
/// document is fetched directly and returned alone (or as an empty list if
/// it doesn't exist).
pub fn select_documents(
    store: &dyn DocumentStore,
    stage: Stage,
    filters: &SelectionFilters,
    partition: Option<Partition>,
    limit: Option<usize>,
    recent_first: bool,
) -> Result<Vec<Document>> {
    if let Some(doc_id) = &filters.doc_id {
        return Ok(store.get_document(doc_id)?.into_iter().collect());
    }

    let docs = collect_docs_by_stage(store, stage)?;
    let docs = apply_filters(docs, filters);
    let docs = if recent_first { sort_recent_first(docs) } else { docs };
    let docs = partition_slice(docs, partition);
    Ok(match limit {
        Some(n) => docs.into_iter().take(n).collect(),
        None => docs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, year: Option<i32>) -> Document {
        let mut d = Document::new(id, format!("{id}.pdf"));
        d.published_year = year;
        d
    }

    #[test]
    fn sort_recent_first_treats_missing_year_as_zero() {
        let docs = vec![doc("a", Some(2020)), doc("b", None), doc("c", Some(2024))];
        let sorted = sort_recent_first(docs);
        let ids: Vec<&str> = sorted.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn partition_slice_distributes_remainder_to_first_slices() {
        let docs: Vec<Document> = (0..10).map(|i| doc(&format!("d{i}"), None)).collect();
        let p1 = partition_slice(docs.clone(), Some(Partition { num: 1, total: 3 }));
        let p2 = partition_slice(docs.clone(), Some(Partition { num: 2, total: 3 }));
        let p3 = partition_slice(docs, Some(Partition { num: 3, total: 3 }));
        assert_eq!(p1.len(), 4);
        assert_eq!(p2.len(), 3);
        assert_eq!(p3.len(), 3);
    }

    #[test]
    fn partition_slice_is_a_complete_disjoint_cover() {
        let docs: Vec<Document> = (0..7).map(|i| doc(&format!("d{i}"), None)).collect();
        let mut seen = std::collections::HashSet::new();
        let mut total = 0;
        for num in 1..=4 {
            let slice = partition_slice(docs.clone(), Some(Partition { num, total: 4 }));
            for d in &slice {
                assert!(seen.insert(d.id.clone()), "id {} seen twice", d.id);
            }
            total += slice.len();
        }
        assert_eq!(total, docs.len());
    }

    #[test]
    fn partition_parse_rejects_out_of_range() {
        assert!(Partition::parse("0/3").is_err());
        assert!(Partition::parse("4/3").is_err());
        assert!(Partition::parse("not-a-partition").is_err());
        assert_eq!(Partition::parse("2/3").unwrap(), Partition { num: 2, total: 3 });
    }

    #[test]
    fn filters_match_agency_exactly_and_report_by_substring() {
        let mut a = doc("a", None);
        a.organization = Some("Agency X".into());
        a.filepath = "pdfs/agency-x/2020/annual-report.pdf".into();
        let mut b = doc("b", None);
        b.organization = Some("Agency Y".into());
        b.filepath = "pdfs/agency-y/2020/quarterly.pdf".into();

        let filters = SelectionFilters {
            agency: Some("Agency X".into()),
            report: Some("annual".into()),
            ..Default::default()
        };
        let kept = apply_filters(vec![a, b], &filters);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "a");
    }

    #[test]
    fn year_range_filters_narrow_by_published_year() {
        let filters = SelectionFilters {
            from_year: Some(2021),
            to_year: Some(2023),
            ..Default::default()
        };
        let docs = vec![doc("a", Some(2020)), doc("b", Some(2022)), doc("c", Some(2024))];
        let kept = apply_filters(docs, &filters);
        let ids: Vec<&str> = kept.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[test]
    fn select_documents_with_doc_id_short_circuits_everything_else() {
        use crate::store::SqliteStore;

        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_document(&doc("a", Some(2020))).unwrap();
        store.upsert_document(&doc("b", Some(2024))).unwrap();

        let filters = SelectionFilters {
            doc_id: Some("a".to_string()),
            ..Default::default()
        };
        let found = select_documents(&store, Stage::Parse, &filters, None, None, true).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "a");

        let filters = SelectionFilters {
            doc_id: Some("missing".to_string()),
            ..Default::default()
        };
        let found = select_documents(&store, Stage::Parse, &filters, None, None, true).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn select_documents_only_sorts_recent_first_when_requested() {
        use crate::store::SqliteStore;

        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_document(&doc("b", Some(2020))).unwrap();
        store.upsert_document(&doc("m", Some(2024))).unwrap();

        let natural = select_documents(&store, Stage::Parse, &SelectionFilters::default(), None, None, false).unwrap();
        let ids: Vec<&str> = natural.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "m"], "natural store order is by id");

        let recent = select_documents(&store, Stage::Parse, &SelectionFilters::default(), None, None, true).unwrap();
        let ids: Vec<&str> = recent.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["m", "b"], "recent_first sorts by published_year descending");
    }
}
