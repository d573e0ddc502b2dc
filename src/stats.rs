//! Database statistics overview.
//!
//! Used by `repa stats`: how many analyses are stored, for which
//! repositories, and when each was last refreshed.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::{db, migrate};

struct RepoStats {
    repo_url: String,
    analyses: i64,
    scopes: i64,
    last_analyzed_ms: i64,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM analyses")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("repa — Database Stats");
    println!("=====================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Analyses:    {}", total);

    let rows = sqlx::query(
        r#"
        SELECT
            repo_url,
            COUNT(*) AS analyses,
            COUNT(DISTINCT COALESCE(subfolder, '')) AS scopes,
            MAX(analyzed_at) AS last_analyzed
        FROM analyses
        GROUP BY repo_url
        ORDER BY analyses DESC, repo_url
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let repos: Vec<RepoStats> = rows
        .iter()
        .map(|row| RepoStats {
            repo_url: row.get("repo_url"),
            analyses: row.get("analyses"),
            scopes: row.get("scopes"),
            last_analyzed_ms: row.get("last_analyzed"),
        })
        .collect();

    if !repos.is_empty() {
        println!();
        println!("  By repository:");
        println!(
            "  {:<48} {:>8} {:>6}   {}",
            "REPOSITORY", "ANALYSES", "SCOPES", "LAST ANALYZED"
        );
        println!("  {}", "-".repeat(82));

        for r in &repos {
            println!(
                "  {:<48} {:>8} {:>6}   {}",
                r.repo_url,
                r.analyses,
                r.scopes,
                format_ts_relative(r.last_analyzed_ms / 1000)
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp (seconds) relative to now, e.g. "3 hours ago".
pub(crate) fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        format_ts_iso(ts)
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
