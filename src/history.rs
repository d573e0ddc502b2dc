//! `repa history`: list stored analyses, newest first.

use anyhow::Result;

use crate::analyzer::RepositoryAnalyzer;
use crate::config::Config;
use crate::models::CacheRecord;
use crate::stats::format_ts_relative;

pub async fn run_history(
    config: &Config,
    repo_url: Option<&str>,
    subfolder: Option<&str>,
) -> Result<()> {
    let analyzer = RepositoryAnalyzer::open(config).await?;
    let records = analyzer.history(repo_url, subfolder).await?;

    if records.is_empty() {
        println!("No analyses stored.");
        return Ok(());
    }

    println!(
        "{:>5}  {:<44} {:<12} {:<20} {:>5}  {}",
        "ID", "REPOSITORY", "REF", "SUBFOLDER", "FILES", "ANALYZED"
    );
    for record in &records {
        println!("{}", history_line(record));
    }
    Ok(())
}

fn history_line(record: &CacheRecord) -> String {
    format!(
        "{:>5}  {:<44} {:<12} {:<20} {:>5}  {}",
        record.id,
        record.repo_url,
        record.git_ref,
        record.subfolder.as_deref().unwrap_or("-"),
        record.metadata.analyzed_files,
        format_ts_relative(record.analyzed_at.timestamp())
    )
}
