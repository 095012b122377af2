//! Worker pool and fault supervisor.
//!
//! A long-lived `tokio` task pool with a per-task deadline, rather than
//! OS-process isolation: an async runtime has no idiomatic equivalent to
//! a process pool, and the isolation a process pool buys is largely about
//! memory-leak containment, which periodic task recycling reproduces well
//! enough. Each task still gets its own resource-guard check before
//! claiming a document, and a stuck task is killed at [`T_TASK_TIMEOUT`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{error, info, info_span, warn, Instrument};

use crate::resource_guard::{self, MemoryProbe};
use crate::stage_machine::{self, StageContext, StageOutcome};
use crate::store::{Document, DocumentUpdate, Status};

/// Per-document processing timeout, matching `res.get(timeout=600)` in the
/// original multiprocessing pool.
pub const T_TASK_TIMEOUT: Duration = Duration::from_secs(600);

/// Documents a single worker handles before being recycled, matching
/// `maxtasksperchild=5`. Recycling here just means re-acquiring a fresh
/// semaphore permit; unlike a process pool there's no interpreter state to
/// actually tear down, but the cap keeps any one task from monopolizing a
/// slot indefinitely across a long run.
pub const K_MAX_TASKS_PER_WORKER: usize = 5;

/// Why a document's processing attempt did not end in a normal stage
/// outcome. Mirrors `_process_docs_parallel`'s three failure buckets:
/// timeout/OOM, worker crash, and an in-band error returned by the worker.
#[derive(Debug, Clone)]
pub enum FaultKind {
    /// The resource guard never saw enough free memory, or the task
    /// itself ran past [`T_TASK_TIMEOUT`].
    TimeoutOrOom,
    /// The task panicked or its future was otherwise aborted.
    WorkerCrash { detail: String },
    /// The stage machine itself reported a failure (already recorded by
    /// the stage machine, but still worth surfacing to the supervisor for
    /// accounting).
    StageFailure { status: Status, error: String },
}

/// Outcome of processing one document through every stage it still needs.
#[derive(Debug, Clone)]
pub enum ProcessingResult {
    Advanced { final_status: Status },
    Stopped { reason: FaultKind },
}

/// Runs `documents` through `run_stage` with bounded concurrency
/// (`max_concurrency`), guarding each task behind the resource guard and a
/// per-task timeout, and classifying any fault per [`FaultKind`].
pub async fn run_pool<F, Fut>(
    documents: Vec<Document>,
    context: StageContext,
    max_concurrency: usize,
    probe_factory: impl Fn() -> Box<dyn MemoryProbe> + Send + Sync + 'static,
    run_stage: F,
) -> Vec<ProcessingResult>
where
    F: Fn(StageContext, Document) -> Fut + Send + Sync + 'static + Clone,
    Fut: std::future::Future<Output = crate::error::Result<StageOutcome>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let tasks_run = Arc::new(AtomicUsize::new(0));
    let probe_factory = Arc::new(probe_factory);
    let mut join_set = tokio::task::JoinSet::new();
    let mut in_flight: HashMap<tokio::task::Id, Document> = HashMap::new();

    for document in documents {
        let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
        let task_context = context.clone();
        let run_stage = run_stage.clone();
        let tasks_run = tasks_run.clone();
        let probe_factory = probe_factory.clone();
        let doc_id = document.id.clone();
        let span = info_span!("process_document", doc_id = %doc_id);
        let doc_for_map = document.clone();

        let abort_handle = join_set.spawn(
            async move {
                let context = task_context;
                let _permit = permit;
                let count = tasks_run.fetch_add(1, Ordering::SeqCst);
                if count > 0 && count % K_MAX_TASKS_PER_WORKER == 0 {
                    info!(tasks_run = count, "recycling worker slot");
                }

                let mut probe = probe_factory();
                if !resource_guard::wait_for_available_memory(probe.as_mut()).await {
                    mark_stopped(&context, &document, "OOM protection: insufficient memory").await;
                    return (doc_id, ProcessingResult::Stopped { reason: FaultKind::TimeoutOrOom });
                }

                match tokio::time::timeout(T_TASK_TIMEOUT, run_stage(context.clone(), document.clone())).await {
                    Ok(Ok(StageOutcome::Completed { status })) => {
                        (doc_id, ProcessingResult::Advanced { final_status: status })
                    }
                    Ok(Ok(StageOutcome::Failed { status, error })) => {
                        (doc_id, ProcessingResult::Stopped { reason: FaultKind::StageFailure { status, error } })
                    }
                    Ok(Err(e)) => {
                        mark_stopped(&context, &document, &format!("Worker Error: {e}")).await;
                        (doc_id, ProcessingResult::Stopped { reason: FaultKind::WorkerCrash { detail: e.to_string() } })
                    }
                    Err(_elapsed) => {
                        mark_stopped(&context, &document, "Worker Timeout/OOM").await;
                        (doc_id, ProcessingResult::Stopped { reason: FaultKind::TimeoutOrOom })
                    }
                }
            }
            .instrument(span),
        );
        in_flight.insert(abort_handle.id(), doc_for_map);
    }

    let mut results = Vec::new();
    while let Some(joined) = join_set.join_next_with_id().await {
        match joined {
            Ok((id, (doc_id, result))) => {
                in_flight.remove(&id);
                match &result {
                    ProcessingResult::Advanced { final_status } => {
                        info!(doc_id = %doc_id, status = final_status.as_str(), "document advanced");
                    }
                    ProcessingResult::Stopped { reason } => {
                        warn!(doc_id = %doc_id, ?reason, "document stopped");
                    }
                }
                results.push(result);
            }
            Err(join_error) => {
                error!(%join_error, "worker task panicked");
                if let Some(document) = in_flight.remove(&join_error.id()) {
                    mark_stopped(&context, &document, &format!("Worker panic: {join_error}")).await;
                }
                results.push(ProcessingResult::Stopped {
                    reason: FaultKind::WorkerCrash {
                        detail: join_error.to_string(),
                    },
                });
            }
        }
    }
    results
}

/// Marks a document `stopped` with `wait=true`, matching
/// `mark_as_stopped`'s durability guarantee: by the time this returns, a
/// supervisor re-scan will see the document as `stopped`, not stuck in a
/// transient status.
async fn mark_stopped(context: &StageContext, document: &Document, reason: &str) {
    if let Err(e) = context
        .store
        .update_document(&document.id, DocumentUpdate::stopped(reason), true)
    {
        error!(doc_id = %document.id, error = %e, "failed to mark document stopped");
    }
}

/// Supervisor sweep: any document left in a transient `*-ing` status —
/// meaning a prior run crashed mid-stage without reaching [`mark_stopped`]
/// — is rewritten to `stopped` before a new run starts.
pub fn sweep_transient_statuses(store: &dyn crate::store::DocumentStore) -> crate::error::Result<usize> {
    let transient = [
        Status::Parsing,
        Status::Summarizing,
        Status::Tagging,
        Status::Indexing,
    ];
    let mut swept = 0;
    for status in transient {
        for doc in store.get_documents_by_status(status, None)? {
            store.update_document(
                &doc.id,
                DocumentUpdate::stopped("recovered from unclean shutdown"),
                true,
            )?;
            swept += 1;
        }
    }
    Ok(swept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::hybrid::WordCounter;
    use crate::processors::fake::{FakeEmbedder, FakeIndexer, FakeParser, FakeSummarizer, FakeTagger};
    use crate::resource_guard::MemoryProbe;
    use crate::store::{Document, SqliteStore};

    struct AlwaysAvailableProbe;
    impl MemoryProbe for AlwaysAvailableProbe {
        fn available_bytes(&mut self) -> u64 {
            u64::MAX
        }
    }

    fn context(store: SqliteStore) -> StageContext {
        StageContext {
            store: Arc::new(store),
            parser: Arc::new(FakeParser),
            summarizer: Arc::new(FakeSummarizer),
            tagger: Arc::new(FakeTagger),
            embedder: Arc::new(FakeEmbedder::default()),
            indexer: Arc::new(FakeIndexer::default()),
            token_counter: Arc::new(WordCounter),
        }
    }

    #[tokio::test]
    async fn pool_advances_every_document_when_stage_succeeds() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut docs = Vec::new();
        for i in 0..4 {
            let doc = Document::new(format!("d{i}"), format!("d{i}.pdf"));
            store.upsert_document(&doc).unwrap();
            docs.push(doc);
        }
        let ctx = context(store);

        let results = run_pool(
            docs,
            ctx,
            2,
            || Box::new(AlwaysAvailableProbe),
            |ctx, doc| async move { stage_machine::run_parse(&ctx, &doc).await },
        )
        .await;

        assert_eq!(results.len(), 4);
        assert!(results
            .iter()
            .all(|r| matches!(r, ProcessingResult::Advanced { final_status: Status::Parsed })));
    }

    #[tokio::test]
    async fn a_panicking_task_marks_its_document_stopped() {
        let store = SqliteStore::open_in_memory().unwrap();
        let doc = Document::new("d1", "d1.pdf");
        store.upsert_document(&doc).unwrap();
        let ctx = context(store);
        let store_ref = ctx.store.clone();

        let results = run_pool(
            vec![doc],
            ctx,
            1,
            || Box::new(AlwaysAvailableProbe),
            |_ctx: StageContext, _doc: Document| async move { panic!("simulated worker crash") },
        )
        .await;

        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], ProcessingResult::Stopped { .. }));
        let doc = store_ref.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.status, Status::Stopped);
    }

    #[tokio::test]
    async fn sweep_transient_statuses_recovers_crashed_documents() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut doc = Document::new("d1", "d1.pdf");
        doc.status = Status::Parsing;
        store.upsert_document(&doc).unwrap();

        let swept = sweep_transient_statuses(&store).unwrap();
        assert_eq!(swept, 1);
        let doc = store.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.status, Status::Stopped);
    }
}
