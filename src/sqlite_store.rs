//! SQLite-backed [`Store`] implementation.
//!
//! One row per analysis in the `analyses` table (see [`migrate`](crate::migrate)).
//! Metadata and result are stored as JSON text; timestamps as Unix millis.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{CacheRecord, NewRecord};
use crate::store::{HistoryFilter, Store};

const RECORD_COLUMNS: &str = "id, repo_hash, repo_url, git_ref, subfolder, model, \
                              metadata_json, result_json, created_at, analyzed_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .with_context(|| format!("timestamp out of range: {}", ms))
}

fn row_to_record(row: &SqliteRow) -> Result<CacheRecord> {
    let metadata_json: String = row.get("metadata_json");
    let result_json: String = row.get("result_json");

    Ok(CacheRecord {
        id: row.get("id"),
        repo_hash: row.get("repo_hash"),
        repo_url: row.get("repo_url"),
        git_ref: row.get("git_ref"),
        subfolder: row.get("subfolder"),
        model: row.get("model"),
        created_at: from_millis(row.get("created_at"))?,
        analyzed_at: from_millis(row.get("analyzed_at"))?,
        metadata: serde_json::from_str(&metadata_json)
            .context("corrupt metadata_json in analyses table")?,
        result: serde_json::from_str(&result_json)
            .context("corrupt result_json in analyses table")?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn lookup(&self, repo_hash: &str) -> Result<Option<CacheRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM analyses WHERE repo_hash = ?",
            RECORD_COLUMNS
        ))
        .bind(repo_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn upsert(&self, record: &NewRecord) -> Result<CacheRecord> {
        let metadata_json = serde_json::to_string(&record.metadata)?;
        let result_json = serde_json::to_string(&record.result)?;
        let now = Utc::now().timestamp_millis();

        let row = sqlx::query(
            r#"
            INSERT INTO analyses (repo_hash, repo_url, git_ref, subfolder, model,
                                  metadata_json, result_json, created_at, analyzed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(repo_hash) DO UPDATE SET
                repo_url = excluded.repo_url,
                git_ref = excluded.git_ref,
                subfolder = excluded.subfolder,
                model = excluded.model,
                metadata_json = excluded.metadata_json,
                result_json = excluded.result_json,
                analyzed_at = excluded.analyzed_at
            RETURNING id, created_at
            "#,
        )
        .bind(&record.repo_hash)
        .bind(&record.repo_url)
        .bind(&record.git_ref)
        .bind(&record.subfolder)
        .bind(&record.model)
        .bind(&metadata_json)
        .bind(&result_json)
        .bind(now)
        .bind(record.analyzed_at.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        Ok(CacheRecord {
            id: row.get("id"),
            repo_hash: record.repo_hash.clone(),
            repo_url: record.repo_url.clone(),
            git_ref: record.git_ref.clone(),
            subfolder: record.subfolder.clone(),
            model: record.model.clone(),
            created_at: from_millis(row.get("created_at"))?,
            analyzed_at: from_millis(record.analyzed_at.timestamp_millis())?,
            metadata: record.metadata.clone(),
            result: record.result.clone(),
        })
    }

    async fn history(&self, filter: &HistoryFilter) -> Result<Vec<CacheRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM analyses
            WHERE (? IS NULL OR repo_url = ?)
              AND (? IS NULL OR subfolder = ?)
            ORDER BY created_at DESC, id DESC
            "#,
            RECORD_COLUMNS
        ))
        .bind(filter.repo_url.as_deref())
        .bind(filter.repo_url.as_deref())
        .bind(filter.subfolder.as_deref())
        .bind(filter.subfolder.as_deref())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn latest(
        &self,
        repo_url: &str,
        subfolder: Option<&str>,
        git_ref: Option<&str>,
    ) -> Result<Option<CacheRecord>> {
        // `IS` compares NULL to NULL as equal, so the root scope matches itself.
        let row = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM analyses
            WHERE repo_url = ?
              AND subfolder IS ?
              AND (? IS NULL OR git_ref = ?)
            ORDER BY analyzed_at DESC, id DESC
            LIMIT 1
            "#,
            RECORD_COLUMNS
        ))
        .bind(repo_url)
        .bind(subfolder)
        .bind(git_ref)
        .bind(git_ref)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }
}
