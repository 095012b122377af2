//! Entry point: `dotenvy::dotenv()` -> `tracing_subscriber` init -> dispatch.

use std::sync::Arc;

use clap::Parser;
use evlab_pipeline::chunker::hybrid::WordCounter;
use evlab_pipeline::cli::{Cli, Commands, ModelModeArg};
use evlab_pipeline::config::{self, Settings};
use evlab_pipeline::downloader;
use evlab_pipeline::log_extract;
use evlab_pipeline::orchestrator::{Orchestrator, RunOptions};
use evlab_pipeline::processors::fake::{FakeEmbedder, FakeIndexer, FakeParser, FakeSummarizer, FakeTagger};
use evlab_pipeline::selector::{Partition, SelectionFilters, Stage};
use evlab_pipeline::service_lifecycle::{EmbeddingServerManager, ModelMode};
use evlab_pipeline::stage_machine::StageContext;
use evlab_pipeline::store::SqliteStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let settings = Settings::load(&cli.config, &cli.datasources)?;
    let _log_guard = evlab_pipeline::log_setup::init(&settings.log_dir, cli.is_verbose());
    config::configure_thread_env();

    let store = SqliteStore::open(&settings.data_mount_path.join("pipeline.sqlite3"))?;
    let context = build_context(store, &settings);

    match cli.command {
        Commands::Download => {
            let target = cli
                .target
                .ok_or_else(|| anyhow::anyhow!("--target is required for download"))?;
            let spec = settings.downloader_for(&target)?;
            downloader::run(&spec, &Default::default()).await?;
        }
        Commands::Scan => {
            for status in [
                evlab_pipeline::store::Status::Downloaded,
                evlab_pipeline::store::Status::Parsed,
                evlab_pipeline::store::Status::Summarized,
                evlab_pipeline::store::Status::Tagged,
                evlab_pipeline::store::Status::Indexed,
            ] {
                let docs = context.store.get_documents_by_status(status, None)?;
                println!("{:<16} {}", status.as_str(), docs.len());
            }
        }
        Commands::Run {
            partition,
            agency,
            report,
            limit,
            model_mode,
            concurrency,
            skip_download,
            skip_scan,
            skip_parse,
            skip_summarize,
            skip_tag,
            skip_index,
            clear_db,
            save_chunks,
            recent_first,
            file_id,
            year,
            from_year,
            to_year,
        } => {
            if !skip_download {
                if let Some(target) = &cli.target {
                    if let Ok(spec) = settings.downloader_for(target) {
                        downloader::run(&spec, &Default::default()).await?;
                    }
                }
            }
            if !skip_scan {
                for status in [
                    evlab_pipeline::store::Status::Downloaded,
                    evlab_pipeline::store::Status::Parsed,
                    evlab_pipeline::store::Status::Summarized,
                    evlab_pipeline::store::Status::Tagged,
                    evlab_pipeline::store::Status::Indexed,
                ] {
                    let docs = context.store.get_documents_by_status(status, None)?;
                    println!("{:<16} {}", status.as_str(), docs.len());
                }
            }

            let embedding_server = EmbeddingServerManager::new(to_model_mode(model_mode), "http://localhost:8000/health");
            let mut orchestrator = Orchestrator::new(context, embedding_server);
            if save_chunks {
                orchestrator = orchestrator.with_chunks_dir(settings.data_mount_path.join("chunks"));
            }
            let options = RunOptions {
                partition: partition.as_deref().map(Partition::parse).transpose()?,
                filters: SelectionFilters {
                    agency,
                    report,
                    year,
                    from_year,
                    to_year,
                    doc_id: file_id,
                },
                limit,
                concurrency,
                recent_first,
                save_chunks,
                clear_db,
                skip_download,
                skip_scan,
                skip_parse,
                skip_summarize,
                skip_tag,
                skip_index,
            };
            let run_report = orchestrator.run_full_pipeline(options).await?;
            println!("{run_report:?}");
        }
        Commands::Parse { partition, limit } => {
            run_single_stage(context, Stage::Parse, partition, limit).await?;
        }
        Commands::Summarize { partition, limit } => {
            run_single_stage(context, Stage::Summarize, partition, limit).await?;
        }
        Commands::Tag { partition, limit } => {
            run_single_stage(context, Stage::Tag, partition, limit).await?;
        }
        Commands::Index { partition, limit } => {
            run_single_stage(context, Stage::Index, partition, limit).await?;
        }
        Commands::Log { document_id } => {
            let lines = log_extract::extract_document_log(&settings.log_dir.join("orchestrator.log"), &document_id)?;
            println!("{}", log_extract::summarize_document_log(&lines));
            for line in lines {
                println!("{line}");
            }
        }
    }

    Ok(())
}

/// Drives a single stage directly through [`Orchestrator::run_stage_for`],
/// bracketed by the same `setup_initial`/`teardown` pair a full run uses.
/// The embedding server only comes up for the index stage.
async fn run_single_stage(
    context: StageContext,
    stage: Stage,
    partition: Option<String>,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let embedding_server = EmbeddingServerManager::new(ModelMode::Local, "http://localhost:8000/health");
    let mut orchestrator = Orchestrator::new(context, embedding_server);
    let options = RunOptions {
        partition: partition.as_deref().map(Partition::parse).transpose()?,
        limit,
        ..RunOptions::default()
    };

    orchestrator.setup_initial(stage != Stage::Index).await?;
    let results = orchestrator.run_stage_for(stage, &options).await;
    orchestrator.teardown().await;

    let results = results?;
    println!("{} document(s) processed for {:?}", results.len(), stage);
    for result in &results {
        println!("{result:?}");
    }
    Ok(())
}

fn to_model_mode(arg: ModelModeArg) -> ModelMode {
    match arg {
        ModelModeArg::Local => ModelMode::Local,
        ModelModeArg::Remote => ModelMode::Remote,
    }
}

/// Builds the stage collaborators. Real parser/summarizer/tagger/embedder
/// backends are explicitly out of this crate's scope; the fakes
/// stand in until a deployment wires in its own implementations of the
/// processor traits.
fn build_context(store: SqliteStore, _settings: &Settings) -> StageContext {
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
