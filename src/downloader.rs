//! Downloader subprocess contract.
//!
//! A data source's downloader is an external program invoked with a
//! templated argument list: each argument may contain `{key}` placeholders
//! resolved from a parameter map, and an argument that is itself exactly
//! `--flag` whose following placeholder resolves to "no value" is dropped
//! entirely (rather than passed as a bare flag with an empty string).

use std::collections::HashMap;
use std::process::Stdio;

use tokio::process::Command;
use tracing::info;

use crate::error::{PipelineError, Result};

/// One data source's downloader: an executable plus an argument template.
/// `{key}` tokens in any argument are substituted from the parameter map
/// passed to [`run`]; an argument is dropped if, after substitution, it
/// still contains an unresolved `{key}` — an unresolved parameter drops
/// this argument and the flag before it.
#[derive(Debug, Clone)]
pub struct DownloaderSpec {
    pub executable: String,
    pub arg_template: Vec<String>,
}

/// Resolves `{key}` placeholders in `arg_template` against `params`,
/// dropping an argument (and the flag immediately preceding it, if any)
/// when its placeholder has no value.
fn resolve_args(arg_template: &[String], params: &HashMap<String, String>) -> Vec<String> {
    let mut resolved = Vec::with_capacity(arg_template.len());
    let mut i = 0;
    while i < arg_template.len() {
        let arg = &arg_template[i];
        if let Some(key) = placeholder_key(arg) {
            match params.get(key) {
                Some(value) => resolved.push(value.clone()),
                None => {
                    // Drop this placeholder argument and, if the previous
                    // token looks like a flag (`--foo`), drop it too.
                    if let Some(prev) = resolved.last() {
                        if prev.starts_with("--") {
                            resolved.pop();
                        }
                    }
                }
            }
        } else {
            resolved.push(arg.clone());
        }
        i += 1;
    }
    resolved
}

/// If `arg` is exactly a single `{key}` placeholder, returns `key`.
/// Partial substitutions (`--year={key}`) are resolved in place instead of
/// dropped, since only a wholly-missing value should drop a flag.
fn placeholder_key(arg: &str) -> Option<&str> {
    arg.strip_prefix('{').and_then(|s| s.strip_suffix('}'))
}

fn substitute_inline(arg: &str, params: &HashMap<String, String>) -> String {
    let mut out = arg.to_string();
    for (key, value) in params {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// Runs the downloader for one data source, substituting `params` into
/// its argument template and waiting for it to exit.
pub async fn run(spec: &DownloaderSpec, params: &HashMap<String, String>) -> Result<()> {
    let resolved: Vec<String> = arg_template_with_inline_substitution(spec, params);
    info!(executable = %spec.executable, args = ?resolved, "launching downloader");

    let status = Command::new(&spec.executable)
        .args(&resolved)
        .stdin(Stdio::null())
        .status()
        .await?;

    if !status.success() {
        return Err(PipelineError::DownloaderFailed(status));
    }
    Ok(())
}

fn arg_template_with_inline_substitution(
    spec: &DownloaderSpec,
    params: &HashMap<String, String>,
) -> Vec<String> {
    let whole_placeholder_resolved = resolve_args(&spec.arg_template, params);
    whole_placeholder_resolved
        .into_iter()
        .map(|arg| substitute_inline(&arg, params))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_flag_and_placeholder_when_value_is_missing() {
        let template = vec![
            "--agency".to_string(),
            "{agency}".to_string(),
            "--year".to_string(),
            "{year}".to_string(),
            "--out".to_string(),
            "/data".to_string(),
        ];
        let mut params = HashMap::new();
        params.insert("agency".to_string(), "epa".to_string());
        // `year` intentionally left unset.

        let resolved = resolve_args(&template, &params);
        assert_eq!(resolved, vec!["--agency", "epa", "--out", "/data"]);
    }

    #[test]
    fn resolves_inline_placeholders_within_a_single_argument() {
        let mut params = HashMap::new();
        params.insert("year".to_string(), "2024".to_string());
        let resolved = substitute_inline("--year={year}", &params);
        assert_eq!(resolved, "--year=2024");
    }
}
