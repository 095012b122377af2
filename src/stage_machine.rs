//! Stage state machine.
//!
//! Drives one document through whichever of parse/summarize/tag/index it
//! still needs, writing the transient `*-ing` status before a stage runs
//! and the terminal status plus [`crate::store::StageRecord`] after.
//! Parse and summarize failures short-circuit the rest of the pipeline
//! for that document; a tag failure does not, since a document can still
//! be usefully indexed without topic tags.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::chunker;
use crate::chunker::hybrid::TokenCounter;
use crate::error::Result;
use crate::processors::{Embedder, Indexer, Parser, Summarizer, Tagger};
use crate::store::{Document, DocumentStore, DocumentUpdate, StageRecord, Status};

/// What happened to a document after a stage machine run.
#[derive(Debug, Clone)]
pub enum StageOutcome {
    /// The document advanced to `status` and every stage attempted succeeded.
    Completed { status: Status },
    /// A stage failed in a way that short-circuits the rest of the run;
    /// the document was left in `status` with `error` recorded.
    Failed { status: Status, error: String },
}

/// The collaborators a stage run needs. Held together, behind `Arc`, so
/// the worker pool can clone a context cheaply into each spawned task
/// without threading five separate trait objects through every call.
#[derive(Clone)]
pub struct StageContext {
    pub store: Arc<dyn DocumentStore>,
    pub parser: Arc<dyn Parser>,
    pub summarizer: Arc<dyn Summarizer>,
    pub tagger: Arc<dyn Tagger>,
    pub embedder: Arc<dyn Embedder>,
    pub indexer: Arc<dyn Indexer>,
    pub token_counter: Arc<dyn TokenCounter>,
}

async fn run_timed<T, E, F>(fut: F) -> (std::result::Result<T, E>, f64)
where
    F: std::future::Future<Output = std::result::Result<T, E>>,
{
    let start = Instant::now();
    let result = fut.await;
    (result, start.elapsed().as_secs_f64())
}

fn record(success: bool, elapsed: f64, error: Option<String>) -> StageRecord {
    StageRecord {
        started_at: Some(Utc::now()),
        elapsed_seconds: Some(elapsed),
        success,
        error,
    }
}

/// Runs the parse stage for a `downloaded` document. On success the
/// document moves to `parsed` with its parsed metadata merged in; on
/// failure it moves to `parse_failed` and the rest of the pipeline is
/// skipped for this document.
pub async fn run_parse(ctx: &StageContext, document: &Document) -> Result<StageOutcome> {
    ctx.store
        .update_document(&document.id, DocumentUpdate::status(Status::Parsing), true)?;

    let (outcome, elapsed) = run_timed(ctx.parser.parse(document)).await;
    match outcome {
        Ok(parsed) => {
            let mut update = DocumentUpdate::status(Status::Parsed)
                .with_stage("parse", record(true, elapsed, None));
            update.parsed_folder = Some(parsed.parsed_folder.clone());
            update.page_count = Some(parsed.page_count);
            update.word_count = Some(parsed.word_count);
            update.file_format = Some(parsed.file_format.clone());
            update.file_size_mb = Some(parsed.file_size_mb);
            update.toc = Some(parsed.toc.clone());
            ctx.store.update_document(&document.id, update, true)?;
            Ok(StageOutcome::Completed {
                status: Status::Parsed,
            })
        }
        Err(e) => {
            let error = e.to_string();
            ctx.store.update_document(
                &document.id,
                DocumentUpdate::status(Status::ParseFailed)
                    .with_stage("parse", record(false, elapsed, Some(error.clone()))),
                true,
            )?;
            Ok(StageOutcome::Failed {
                status: Status::ParseFailed,
                error,
            })
        }
    }
}

/// Runs the summarize stage for a `parsed` document.
pub async fn run_summarize(ctx: &StageContext, document: &Document) -> Result<StageOutcome> {
    ctx.store.update_document(
        &document.id,
        DocumentUpdate::status(Status::Summarizing),
        true,
    )?;

    let (outcome, elapsed) = run_timed(ctx.summarizer.summarize(document)).await;
    match outcome {
        Ok(summary) => {
            let mut update = DocumentUpdate::status(Status::Summarized)
                .with_stage("summarize", record(true, elapsed, None));
            update.full_summary = Some(summary.full_summary.clone());
            ctx.store.update_document(&document.id, update, true)?;
            Ok(StageOutcome::Completed {
                status: Status::Summarized,
            })
        }
        Err(e) => {
            let error = e.to_string();
            ctx.store.update_document(
                &document.id,
                DocumentUpdate::status(Status::SummarizeFailed)
                    .with_stage("summarize", record(false, elapsed, Some(error.clone()))),
                true,
            )?;
            Ok(StageOutcome::Failed {
                status: Status::SummarizeFailed,
                error,
            })
        }
    }
}

/// Runs the tag stage for a `summarized` document. Unlike parse/summarize,
/// a tag failure never short-circuits: the document still advances toward
/// indexing, just without `toc_classified` set.
pub async fn run_tag(ctx: &StageContext, document: &Document) -> Result<StageOutcome> {
    ctx.store
        .update_document(&document.id, DocumentUpdate::status(Status::Tagging), true)?;

    let (outcome, elapsed) = run_timed(ctx.tagger.tag(document)).await;
    match outcome {
        Ok(tagged) => {
            let mut update = DocumentUpdate::status(Status::Tagged)
                .with_stage("tag", record(true, elapsed, None));
            update.toc_classified = Some(tagged.toc_classified);
            ctx.store.update_document(&document.id, update, true)?;
            Ok(StageOutcome::Completed {
                status: Status::Tagged,
            })
        }
        Err(e) => {
            let error = e.to_string();
            // Tag failures are recorded but still advance to `tagged` —
            // indexing does not require topic tags.
            ctx.store.update_document(
                &document.id,
                DocumentUpdate::status(Status::Tagged)
                    .with_stage("tag", record(false, elapsed, Some(error.clone()))),
                true,
            )?;
            Ok(StageOutcome::Completed {
                status: Status::Tagged,
            })
        }
    }
}

/// Runs the index stage for a `tagged`, `summarized`, or `parsed` document
/// (any of these is eligible as long as a `parsed_folder` is present):
/// re-chunks the document, embeds every chunk, and persists
/// the result.
pub async fn run_index(ctx: &StageContext, document: &Document, pages: &[crate::processors::ParsedPage]) -> Result<StageOutcome> {
    ctx.store
        .update_document(&document.id, DocumentUpdate::status(Status::Indexing), true)?;

    let start = Instant::now();
    let mut chunks = chunker::chunk_document(&document.id, pages, ctx.token_counter.as_ref());
    for chunk in chunks.iter_mut() {
        chunk.dense_embedding = Some(ctx.embedder.embed_dense(&chunk.text).await?);
        chunk.sparse_embedding = Some(ctx.embedder.embed_sparse(&chunk.text).await?);
    }

    let result = async {
        ctx.store.save_chunks(&document.id, &chunks)?;
        ctx.indexer.index(document, &chunks).await?;
        Ok::<(), crate::error::PipelineError>(())
    }
    .await;
    let elapsed = start.elapsed().as_secs_f64();

    match result {
        Ok(()) => {
            ctx.store.update_document(
                &document.id,
                DocumentUpdate::status(Status::Indexed)
                    .with_stage("index", record(true, elapsed, None)),
                true,
            )?;
            Ok(StageOutcome::Completed {
                status: Status::Indexed,
            })
        }
        Err(e) => {
            let error = e.to_string();
            ctx.store.update_document(
                &document.id,
                DocumentUpdate::status(Status::IndexFailed)
                    .with_stage("index", record(false, elapsed, Some(error.clone()))),
                true,
            )?;
            Ok(StageOutcome::Failed {
                status: Status::IndexFailed,
                error,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::hybrid::WordCounter;
    use crate::processors::fake::{FakeEmbedder, FakeIndexer, FakeParser, FakeSummarizer, FakeTagger};
    use crate::processors::Parser as _;
    use crate::store::SqliteStore;

    fn ctx(
        store: SqliteStore,
        parser: impl Parser + 'static,
        summarizer: impl Summarizer + 'static,
        tagger: impl Tagger + 'static,
        embedder: impl Embedder + 'static,
        indexer: impl Indexer + 'static,
    ) -> StageContext {
        StageContext {
            store: Arc::new(store),
            parser: Arc::new(parser),
            summarizer: Arc::new(summarizer),
            tagger: Arc::new(tagger),
            embedder: Arc::new(embedder),
            indexer: Arc::new(indexer),
            token_counter: Arc::new(WordCounter),
        }
    }

    #[tokio::test]
    async fn parse_then_summarize_then_tag_then_index_advances_through_every_status() {
        let store = SqliteStore::open_in_memory().unwrap();
        let doc = Document::new("d1", "x.pdf");
        store.upsert_document(&doc).unwrap();

        let context = ctx(
            store,
            FakeParser,
            FakeSummarizer,
            FakeTagger,
            FakeEmbedder::default(),
            FakeIndexer::default(),
        );

        run_parse(&context, &doc).await.unwrap();
        let doc = context.store.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.status, Status::Parsed);

        run_summarize(&context, &doc).await.unwrap();
        let doc = context.store.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.status, Status::Summarized);

        run_tag(&context, &doc).await.unwrap();
        let doc = context.store.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.status, Status::Tagged);
        assert!(doc.toc_classified);

        let parsed = FakeParser.parse(&doc).await.unwrap();
        run_index(&context, &doc, &parsed.pages).await.unwrap();
        let doc = context.store.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.status, Status::Indexed);
        assert!(!context.store.get_chunks("d1").unwrap().is_empty());
    }

    struct FailingParser;

    #[async_trait::async_trait]
    impl Parser for FailingParser {
        async fn parse(&self, _document: &Document) -> Result<crate::processors::ParseOutput> {
            Err(crate::error::PipelineError::Config("boom".into()))
        }
    }

    #[tokio::test]
    async fn parse_failure_short_circuits_to_parse_failed() {
        let store = SqliteStore::open_in_memory().unwrap();
        let doc = Document::new("d1", "x.pdf");
        store.upsert_document(&doc).unwrap();

        let context = ctx(
            store,
            FailingParser,
            FakeSummarizer,
            FakeTagger,
            FakeEmbedder::default(),
            FakeIndexer::default(),
        );

        let outcome = run_parse(&context, &doc).await.unwrap();
        assert!(matches!(
            outcome,
            StageOutcome::Failed {
                status: Status::ParseFailed,
                ..
            }
        ));
        let doc = context.store.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.status, Status::ParseFailed);
        assert!(doc.stages["parse"].error.is_some());
    }

    struct FailingTagger;

    #[async_trait::async_trait]
    impl Tagger for FailingTagger {
        async fn tag(&self, _document: &Document) -> Result<crate::processors::TagOutput> {
            Err(crate::error::PipelineError::Config("tag boom".into()))
        }
    }

    #[tokio::test]
    async fn tag_failure_does_not_short_circuit() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut doc = Document::new("d1", "x.pdf");
        doc.status = Status::Summarized;
        store.upsert_document(&doc).unwrap();

        let context = ctx(
            store,
            FakeParser,
            FakeSummarizer,
            FailingTagger,
            FakeEmbedder::default(),
            FakeIndexer::default(),
        );

        let outcome = run_tag(&context, &doc).await.unwrap();
        assert!(matches!(
            outcome,
            StageOutcome::Completed {
                status: Status::Tagged
            }
        ));
        let doc = context.store.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.status, Status::Tagged);
        assert!(!doc.stages["tag"].success);
    }
}
