//! CLI surface: a `clap::Parser` top-level struct with a global verbosity
//! flag and a subcommand enum per operation.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "evlab-pipeline", about = "Document-processing pipeline orchestrator for evaluation report corpora")]
pub struct Cli {
    /// Data source to operate on (matches a `[sources.*]` entry in datasources.toml).
    #[arg(long, global = true)]
    pub target: Option<String>,

    /// Path to pipeline.toml. Defaults to ./pipeline.toml.
    #[arg(long, global = true, default_value = "pipeline.toml")]
    pub config: PathBuf,

    /// Path to datasources.toml. Defaults to ./datasources.toml.
    #[arg(long, global = true, default_value = "datasources.toml")]
    pub datasources: PathBuf,

    /// Increase log verbosity; repeatable (-v, -vv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn is_verbose(&self) -> bool {
        self.verbose > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModelModeArg {
    Local,
    Remote,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the downloader subprocess for `--target`.
    Download,

    /// Scan the store and report document counts by status.
    Scan,

    /// Run the full parse -> summarize -> tag -> index pipeline.
    Run {
        #[arg(long)]
        partition: Option<String>,

        #[arg(long)]
        agency: Option<String>,

        #[arg(long)]
        report: Option<String>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long, value_enum, default_value_t = ModelModeArg::Local)]
        model_mode: ModelModeArg,

        /// Worker count for the in-process task pool.
        #[arg(long = "workers", default_value_t = 4)]
        concurrency: usize,

        /// Skip the downloader subprocess.
        #[arg(long = "skip-download")]
        skip_download: bool,

        /// Skip the filesystem->store scan.
        #[arg(long = "skip-scan")]
        skip_scan: bool,

        /// Skip the parse stage.
        #[arg(long = "skip-parse")]
        skip_parse: bool,

        /// Skip the summarize stage.
        #[arg(long = "skip-summarize")]
        skip_summarize: bool,

        /// Skip the tag stage.
        #[arg(long = "skip-tag")]
        skip_tag: bool,

        /// Skip the index stage.
        #[arg(long = "skip-index")]
        skip_index: bool,

        /// Wipe the store before running.
        #[arg(long = "clear-db")]
        clear_db: bool,

        /// Persist each indexed document's chunks to disk alongside the store.
        #[arg(long = "save-chunks")]
        save_chunks: bool,

        /// Fetch each stage's input status bucket year-by-year, most recent first.
        #[arg(long = "recent-first")]
        recent_first: bool,

        /// Select a single document by id, bypassing every other filter.
        #[arg(long = "file-id")]
        file_id: Option<String>,

        /// Restrict to documents published in exactly this year.
        #[arg(long)]
        year: Option<i32>,

        /// Restrict to documents published in or after this year.
        #[arg(long = "from-year")]
        from_year: Option<i32>,

        /// Restrict to documents published in or before this year.
        #[arg(long = "to-year")]
        to_year: Option<i32>,
    },

    /// Run only the parse stage.
    Parse {
        #[arg(long)]
        partition: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Run only the summarize stage.
    Summarize {
        #[arg(long)]
        partition: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Run only the tag stage.
    Tag {
        #[arg(long)]
        partition: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Run only the index stage.
    Index {
        #[arg(long)]
        partition: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print the processing log lines recorded for one document.
    Log { document_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_run_invocation_with_partition_and_filters() {
        let cli = Cli::parse_from([
            "evlab-pipeline",
            "--target",
            "epa",
            "-vv",
            "run",
            "--partition",
            "2/4",
            "--agency",
            "EPA",
        ]);
        assert_eq!(cli.target.as_deref(), Some("epa"));
        assert!(cli.is_verbose());
        match cli.command {
            Commands::Run { partition, agency, .. } => {
                assert_eq!(partition.as_deref(), Some("2/4"));
                assert_eq!(agency.as_deref(), Some("EPA"));
            }
            _ => panic!("expected Run"),
        }
    }

    #[test]
    fn parses_skip_flags_and_year_range_and_file_id() {
        let cli = Cli::parse_from([
            "evlab-pipeline",
            "run",
            "--skip-download",
            "--skip-tag",
            "--clear-db",
            "--save-chunks",
            "--recent-first",
            "--workers",
            "8",
            "--file-id",
            "d1",
            "--from-year",
            "2020",
            "--to-year",
            "2024",
        ]);
        match cli.command {
            Commands::Run {
                skip_download,
                skip_scan,
                skip_tag,
                clear_db,
                save_chunks,
                recent_first,
                concurrency,
                file_id,
                from_year,
                to_year,
                ..
            } => {
                assert!(skip_download);
                assert!(!skip_scan);
                assert!(skip_tag);
                assert!(clear_db);
                assert!(save_chunks);
                assert!(recent_first);
                assert_eq!(concurrency, 8);
                assert_eq!(file_id.as_deref(), Some("d1"));
                assert_eq!(from_year, Some(2020));
                assert_eq!(to_year, Some(2024));
            }
            _ => panic!("expected Run"),
        }
    }
}
