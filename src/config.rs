//! Configuration loading and thread-cap environment setup.
//!
//! Layered: a TOML file provides defaults, environment variables (loaded
//! via `dotenvy`) override them, and CLI flags override both.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::downloader::DownloaderSpec;
use crate::error::{PipelineError, Result};
use crate::service_lifecycle::ModelMode;

/// Environment variables read directly, outside the TOML layer, because
/// they configure process-level behavior (thread caps) rather than
/// pipeline semantics.
pub const THREAD_CAP_ENV_VARS: &[&str] = &[
    "OMP_NUM_THREADS",
    "OPENBLAS_NUM_THREADS",
    "MKL_NUM_THREADS",
    "VECLIB_MAXIMUM_THREADS",
    "NUMEXPR_NUM_THREADS",
    "TOKENIZERS_PARALLELISM",
];

/// Sets every thread-cap env var to a single-threaded value, matching
/// `configure_thread_env`'s rationale: worker-pool concurrency is managed
/// at the task level, so per-call libraries spinning up their own thread
/// pools just causes oversubscription.
pub fn configure_thread_env() {
    for var in THREAD_CAP_ENV_VARS {
        if *var == "TOKENIZERS_PARALLELISM" {
            std::env::set_var(var, "false");
        } else {
            std::env::set_var(var, "1");
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataSourceConfig {
    pub executable: String,
    #[serde(default)]
    pub arg_template: Vec<String>,
}

impl From<DataSourceConfig> for DownloaderSpec {
    fn from(value: DataSourceConfig) -> Self {
        DownloaderSpec {
            executable: value.executable,
            arg_template: value.arg_template,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StageConfig {
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineFile {
    #[serde(default)]
    pub parse: StageConfig,
    #[serde(default)]
    pub summarize: StageConfig,
    #[serde(default)]
    pub tag: StageConfig,
    #[serde(default)]
    pub index: StageConfig,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for PipelineFile {
    fn default() -> Self {
        Self {
            parse: StageConfig::default(),
            summarize: StageConfig::default(),
            tag: StageConfig::default(),
            index: StageConfig::default(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    crate::chunker::hybrid::MAX_TOKENS
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DataSourcesFile {
    #[serde(default)]
    pub sources: HashMap<String, DataSourceConfig>,
}

/// Fully resolved runtime settings: TOML file contents with environment
/// overrides for the fields that are deployment knobs rather than
/// pipeline behavior.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_mount_path: PathBuf,
    pub embedding_api_url: Option<String>,
    pub dense_embedding_model: Option<String>,
    pub log_dir: PathBuf,
    pub model_mode: ModelMode,
    pub pipeline: PipelineFile,
    pub data_sources: HashMap<String, DataSourceConfig>,
}

impl Settings {
    /// Loads `.env` (if present), then `pipeline_toml_path` and
    /// `datasources_toml_path`, then applies environment overrides.
    pub fn load(pipeline_toml_path: &Path, datasources_toml_path: &Path) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let pipeline: PipelineFile = if pipeline_toml_path.exists() {
            let raw = std::fs::read_to_string(pipeline_toml_path)?;
            toml::from_str(&raw).map_err(|e| PipelineError::Config(e.to_string()))?
        } else {
            PipelineFile::default()
        };

        let data_sources: DataSourcesFile = if datasources_toml_path.exists() {
            let raw = std::fs::read_to_string(datasources_toml_path)?;
            toml::from_str(&raw).map_err(|e| PipelineError::Config(e.to_string()))?
        } else {
            DataSourcesFile::default()
        };

        let data_mount_path = std::env::var("DATA_MOUNT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let log_dir = std::env::var("LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./logs"));
        let embedding_api_url = std::env::var("EMBEDDING_API_URL").ok();
        let dense_embedding_model = std::env::var("DENSE_EMBEDDING_MODEL").ok();
        let model_mode = match std::env::var("MODEL_MODE").as_deref() {
            Ok("remote") => ModelMode::Remote,
            _ => ModelMode::Local,
        };

        Ok(Self {
            data_mount_path,
            embedding_api_url,
            dense_embedding_model,
            log_dir,
            model_mode,
            pipeline,
            data_sources: data_sources.sources,
        })
    }

    pub fn downloader_for(&self, source: &str) -> Result<DownloaderSpec> {
        self.data_sources
            .get(source)
            .cloned()
            .map(DownloaderSpec::from)
            .ok_or_else(|| PipelineError::UnknownDataSource(source.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_defaults_when_no_toml_files_exist() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(
            &dir.path().join("pipeline.toml"),
            &dir.path().join("datasources.toml"),
        )
        .unwrap();
        assert_eq!(settings.pipeline.max_tokens, crate::chunker::hybrid::MAX_TOKENS);
        assert!(settings.data_sources.is_empty());
    }

    #[test]
    fn parses_a_datasources_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let datasources_path = dir.path().join("datasources.toml");
        std::fs::write(
            &datasources_path,
            r#"
            [sources.epa]
            executable = "epa-fetch"
            arg_template = ["--year", "{year}"]
            "#,
        )
        .unwrap();

        let settings = Settings::load(&dir.path().join("pipeline.toml"), &datasources_path).unwrap();
        let spec = settings.downloader_for("epa").unwrap();
        assert_eq!(spec.executable, "epa-fetch");

        assert!(settings.downloader_for("missing").is_err());
    }
}
