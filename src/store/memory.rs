//! In-memory [`Store`] implementation for tests and throwaway runs.
//!
//! Records live in a `HashMap` keyed by `repo_hash` behind a single
//! `std::sync::RwLock`, so an upsert is atomic with respect to lookups.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::models::{CacheRecord, NewRecord};

use super::{HistoryFilter, Store};

#[derive(Default)]
struct Inner {
    records: HashMap<String, CacheRecord>,
    next_id: i64,
}

/// Volatile store; contents are lost when dropped.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl Store for InMemoryStore {
    async fn lookup(&self, repo_hash: &str) -> Result<Option<CacheRecord>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.records.get(repo_hash).cloned())
    }

    async fn upsert(&self, record: &NewRecord) -> Result<CacheRecord> {
        let mut inner = self.inner.write().map_err(poisoned)?;

        let existing = inner
            .records
            .get(&record.repo_hash)
            .map(|r| (r.id, r.created_at));
        let (id, created_at) = match existing {
            Some(kept) => kept,
            None => {
                inner.next_id += 1;
                (inner.next_id, Utc::now())
            }
        };

        let stored = CacheRecord {
            id,
            repo_hash: record.repo_hash.clone(),
            repo_url: record.repo_url.clone(),
            git_ref: record.git_ref.clone(),
            subfolder: record.subfolder.clone(),
            model: record.model.clone(),
            created_at,
            analyzed_at: record.analyzed_at,
            metadata: record.metadata.clone(),
            result: record.result.clone(),
        };
        inner
            .records
            .insert(record.repo_hash.clone(), stored.clone());
        Ok(stored)
    }

    async fn history(&self, filter: &HistoryFilter) -> Result<Vec<CacheRecord>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let mut out: Vec<CacheRecord> = inner
            .records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    async fn latest(
        &self,
        repo_url: &str,
        subfolder: Option<&str>,
        git_ref: Option<&str>,
    ) -> Result<Option<CacheRecord>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .records
            .values()
            .filter(|r| r.repo_url == repo_url && r.subfolder.as_deref() == subfolder)
            .filter(|r| git_ref.map_or(true, |g| r.git_ref == g))
            .max_by(|a, b| a.analyzed_at.cmp(&b.analyzed_at).then(a.id.cmp(&b.id)))
            .cloned())
    }
}
