//! Top-level orchestration.
//!
//! Wires the selector, stage machine, and worker pool together into the
//! download -> scan -> parse -> summarize -> tag -> index sequence a full
//! `run` invocation drives. `setup_initial`/`teardown` bracket a run as
//! ordinary async setup before, and an explicit call after, rather than a
//! `finally` block (Rust has no destructor-time async, so teardown must be
//! called explicitly by the caller — see [`Orchestrator::run_full_pipeline`]'s
//! doc comment for why this one method owns that responsibility).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::error::Result;
use crate::selector::{self, Partition, SelectionFilters, Stage};
use crate::service_lifecycle::EmbeddingServerManager;
use crate::stage_machine::{self, StageContext};
use crate::store::{Document, DocumentStore, Status};
use crate::worker_pool::{self, ProcessingResult};

pub struct RunOptions {
    pub partition: Option<Partition>,
    pub filters: SelectionFilters,
    pub limit: Option<usize>,
    pub concurrency: usize,
    /// Fetch each stage's input status bucket year-by-year, most recent
    /// first, instead of natural store order.
    pub recent_first: bool,
    /// Also write each indexed document's chunks to disk under the
    /// orchestrator's `chunks_dir`, when one is configured.
    pub save_chunks: bool,
    /// Wipe the store before this run starts.
    pub clear_db: bool,
    pub skip_download: bool,
    pub skip_scan: bool,
    pub skip_parse: bool,
    pub skip_summarize: bool,
    pub skip_tag: bool,
    pub skip_index: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            partition: None,
            filters: SelectionFilters::default(),
            limit: None,
            concurrency: 4,
            recent_first: false,
            save_chunks: false,
            clear_db: false,
            skip_download: false,
            skip_scan: false,
            skip_parse: false,
            skip_summarize: false,
            skip_tag: false,
            skip_index: false,
        }
    }
}

pub struct Orchestrator {
    context: StageContext,
    embedding_server: EmbeddingServerManager,
    chunks_dir: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(context: StageContext, embedding_server: EmbeddingServerManager) -> Self {
        Self {
            context,
            embedding_server,
            chunks_dir: None,
        }
    }

    /// Configures a directory that indexed chunks are written to (as one
    /// JSON file per document) when a run is started with `--save-chunks`.
    pub fn with_chunks_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.chunks_dir = Some(dir.into());
        self
    }

    /// `setup_initial`: recovers any document left in a transient status
    /// by a prior unclean shutdown, then brings the embedding server up —
    /// unless indexing is skipped entirely for this run, in which case no
    /// embedding server is needed.
    pub async fn setup_initial(&mut self, skip_index: bool) -> Result<()> {
        let swept = worker_pool::sweep_transient_statuses(self.context.store.as_ref())?;
        if swept > 0 {
            info!(swept, "recovered documents from a prior unclean shutdown");
        }
        if !skip_index {
            self.embedding_server.start("embedding-server", &[]).await?;
        }
        Ok(())
    }

    /// `teardown`: stops anything `setup_initial` started. Callers must
    /// invoke this after a run completes, including on the error path —
    /// there is no async `Drop` in Rust to do it implicitly, so
    /// `run_full_pipeline` wraps its body to guarantee this still runs.
    pub async fn teardown(&mut self) {
        self.embedding_server.stop().await;
    }

    /// Runs one stage's worth of selection + worker-pool dispatch. Public
    /// so single-stage CLI invocations can drive exactly one stage without
    /// going through [`Self::run_full_pipeline`].
    pub async fn run_stage_for(&self, stage: Stage, options: &RunOptions) -> Result<Vec<ProcessingResult>> {
        let documents = selector::select_documents(
            self.context.store.as_ref(),
            stage,
            &options.filters,
            options.partition,
            options.limit,
            options.recent_first,
        )?;
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        info!(stage = ?stage, count = documents.len(), "selected documents for stage");

        let context = self.context.clone();
        let results = match stage {
            Stage::Parse => {
                worker_pool::run_pool(documents, context, options.concurrency, default_probe_factory(), |ctx, doc| async move {
                    stage_machine::run_parse(&ctx, &doc).await
                })
                .await
            }
            Stage::Summarize => {
                worker_pool::run_pool(documents, context, options.concurrency, default_probe_factory(), |ctx, doc| async move {
                    stage_machine::run_summarize(&ctx, &doc).await
                })
                .await
            }
            Stage::Tag => {
                worker_pool::run_pool(documents, context, options.concurrency, default_probe_factory(), |ctx, doc| async move {
                    stage_machine::run_tag(&ctx, &doc).await
                })
                .await
            }
            Stage::Index => {
                worker_pool::run_pool(documents, context, options.concurrency, default_probe_factory(), |ctx, doc| async move {
                    let pages = re_parse_for_indexing(&ctx, &doc).await?;
                    stage_machine::run_index(&ctx, &doc, &pages).await
                })
                .await
            }
        };

        if stage == Stage::Index && options.save_chunks {
            if let Some(dir) = self.chunks_dir.clone() {
                let doc_ids: Vec<String> = documents.iter().map(|d| d.id.clone()).collect();
                self.dump_chunks(&dir, &doc_ids)?;
            }
        }
        Ok(results)
    }

    /// Writes each of `doc_ids`' already-persisted chunks to `dir` as one
    /// JSON file per document, skipping documents with no chunks (index
    /// stage failures leave nothing to dump).
    fn dump_chunks(&self, dir: &std::path::Path, doc_ids: &[String]) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        for doc_id in doc_ids {
            let chunks = self.context.store.get_chunks(doc_id)?;
            if chunks.is_empty() {
                continue;
            }
            let path = dir.join(format!("{doc_id}.json"));
            let data = serde_json::to_string_pretty(&chunks)?;
            std::fs::write(path, data)?;
        }
        Ok(())
    }

    /// Runs parse -> summarize -> tag -> index over whichever documents
    /// each stage's selector picks up, in sequence, bracketed by
    /// `setup_initial`/`teardown` the way `PipelineOrchestrator.run` does.
    /// Stages named in `options`' skip flags are bypassed entirely.
    pub async fn run_full_pipeline(&mut self, options: RunOptions) -> Result<PipelineRunReport> {
        if options.clear_db {
            self.context.store.clear_all_data()?;
        }
        self.setup_initial(options.skip_index).await?;
        let result = self.run_full_pipeline_inner(&options).await;
        self.teardown().await;
        result
    }

    async fn run_full_pipeline_inner(&self, options: &RunOptions) -> Result<PipelineRunReport> {
        let mut report = PipelineRunReport::default();
        let stages = [
            (Stage::Parse, options.skip_parse),
            (Stage::Summarize, options.skip_summarize),
            (Stage::Tag, options.skip_tag),
            (Stage::Index, options.skip_index),
        ];
        for (stage, skip) in stages {
            if skip {
                continue;
            }
            let results = self.run_stage_for(stage, options).await?;
            report.record(stage, &results);
        }
        Ok(report)
    }
}

/// The index stage needs the parsed page tree again to re-chunk, since
/// chunks are regenerable rather than stored as an intermediate artifact
/// Calling the parser a second time is the simplest thing that satisfies
/// that invariant without inventing a parsed-page cache.
async fn re_parse_for_indexing(
    ctx: &StageContext,
    document: &Document,
) -> Result<Vec<crate::processors::ParsedPage>> {
    let parsed = ctx.parser.parse(document).await?;
    Ok(parsed.pages)
}

fn default_probe_factory() -> impl Fn() -> Box<dyn crate::resource_guard::MemoryProbe> + Send + Sync + 'static {
    || Box::new(crate::resource_guard::SystemMemoryProbe::default())
}

/// Per-stage document counts for a completed `run` invocation.
#[derive(Debug, Default)]
pub struct PipelineRunReport {
    pub advanced: HashMap<Status, usize>,
    pub stopped: usize,
}

impl PipelineRunReport {
    fn record(&mut self, _stage: Stage, results: &[ProcessingResult]) {
        for result in results {
            match result {
                ProcessingResult::Advanced { final_status } => {
                    *self.advanced.entry(*final_status).or_insert(0) += 1;
                }
                ProcessingResult::Stopped { .. } => {
                    self.stopped += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::hybrid::WordCounter;
    use crate::processors::fake::{FakeEmbedder, FakeIndexer, FakeParser, FakeSummarizer, FakeTagger};
    use crate::service_lifecycle::ModelMode;
    use crate::store::SqliteStore;

    #[tokio::test]
    async fn full_pipeline_advances_a_fresh_document_to_indexed() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_document(&Document::new("d1", "d1.pdf")).unwrap();

        let context = StageContext {
            store: Arc::new(store),
            parser: Arc::new(FakeParser),
            summarizer: Arc::new(FakeSummarizer),
            tagger: Arc::new(FakeTagger),
            embedder: Arc::new(FakeEmbedder::default()),
            indexer: Arc::new(FakeIndexer::default()),
            token_counter: Arc::new(WordCounter),
        };
        let embedding_server = EmbeddingServerManager::new(ModelMode::Remote, "unused");
        let mut orchestrator = Orchestrator::new(context.clone(), embedding_server);

        let report = orchestrator
            .run_full_pipeline(RunOptions::default())
            .await
            .unwrap();

        assert_eq!(report.stopped, 0);
        let doc = context.store.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.status, Status::Indexed);
    }
}
