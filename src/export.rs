//! Export a stored analysis as JSON.
//!
//! Writes the most recent record for one exact scope (repository, optional
//! ref, optional subfolder) either to a file or to stdout for piping.

use anyhow::Result;
use std::path::Path;

use crate::analyzer::RepositoryAnalyzer;
use crate::config::Config;

/// Run `repa export`.
pub async fn run_export(
    config: &Config,
    repo_url: &str,
    git_ref: Option<&str>,
    subfolder: Option<&str>,
    output: Option<&Path>,
) -> Result<()> {
    let analyzer = RepositoryAnalyzer::open(config).await?;
    let json = analyzer
        .export_analysis_at(repo_url, git_ref, subfolder)
        .await?;

    write_output(&json, output)?;
    if let Some(path) = output {
        eprintln!("Exported analysis of {} to {}", repo_url, path.display());
    }
    Ok(())
}

/// Write `json` to `output`, creating parent directories, or print it.
pub fn write_output(json: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(path, json)?;
        }
        None => {
            println!("{}", json);
        }
    }
    Ok(())
}
