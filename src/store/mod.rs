//! Storage abstraction for persisted analyses.
//!
//! The [`Store`] trait is the cache the orchestrator consults before calling
//! the model and writes to after parsing. Records are keyed uniquely by
//! `repo_hash`; re-analysis of the same identity overwrites in place.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{CacheRecord, NewRecord};

/// Filter for [`Store::history`]. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub repo_url: Option<String>,
    pub subfolder: Option<String>,
}

impl HistoryFilter {
    pub fn matches(&self, record: &CacheRecord) -> bool {
        let url_ok = self
            .repo_url
            .as_deref()
            .map_or(true, |url| record.repo_url == url);
        let sub_ok = self
            .subfolder
            .as_deref()
            .map_or(true, |sub| record.subfolder.as_deref() == Some(sub));
        url_ok && sub_ok
    }
}

/// Abstract analysis store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`lookup`](Store::lookup) | Fetch the record for a `repo_hash` |
/// | [`upsert`](Store::upsert) | Insert, or overwrite the record with the same `repo_hash` |
/// | [`history`](Store::history) | List records, newest first |
/// | [`latest`](Store::latest) | Most recently analyzed record for a scope |
#[async_trait]
pub trait Store: Send + Sync {
    async fn lookup(&self, repo_hash: &str) -> Result<Option<CacheRecord>>;

    /// Write a record. An existing record with the same `repo_hash` keeps its
    /// `id` and `created_at`; everything else is replaced.
    async fn upsert(&self, record: &NewRecord) -> Result<CacheRecord>;

    /// Records matching `filter`, ordered by `created_at` descending.
    async fn history(&self, filter: &HistoryFilter) -> Result<Vec<CacheRecord>>;

    /// The most recently analyzed record for `repo_url` + `subfolder`,
    /// optionally restricted to one ref.
    async fn latest(
        &self,
        repo_url: &str,
        subfolder: Option<&str>,
        git_ref: Option<&str>,
    ) -> Result<Option<CacheRecord>>;
}
