//! The analysis pipeline.
//!
//! [`RepositoryAnalyzer`] wires a [`ContentSource`], a [`LanguageModel`] and
//! a [`Store`] together and runs one request through these stages:
//!
//! ```text
//! validating → loading → prioritizing → cache check ─┬─ hit ─────────────→ done
//!                                                     └─ prompting → calling backend
//!                                                          → parsing → persisting → done
//! ```
//!
//! The cache key is derived from file contents, so the cache check follows
//! loading; a hit skips everything from prompting on. Errors before
//! persisting abort the request and nothing is written. A model response that
//! cannot be parsed is still persisted, with a warning attached.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{AnalysisConfig, Config};
use crate::error::{AnalysisError, PipelineError, Stage};
use crate::identity::compute_identity;
use crate::llm::{create_model, LanguageModel};
use crate::loader::{load_scope, validate_scope, ContentSource, ExclusionRules};
use crate::models::{
    normalize_subfolder, AnalysisResult, CacheRecord, NewRecord, RepositoryMetadata, Scope,
};
use crate::parse::{parse_response, PartialParseWarning};
use crate::prioritize::{prioritize, Limits};
use crate::prompt::build_prompt;
use crate::sources::RepositorySource;
use crate::sqlite_store::SqliteStore;
use crate::store::{HistoryFilter, Store};
use crate::{db, migrate};

/// The outcome of [`RepositoryAnalyzer::analyze_repository`].
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub record_id: i64,
    pub repo_hash: String,
    pub model: String,
    /// True when the result was served from the store without a model call.
    pub from_cache: bool,
    pub metadata: RepositoryMetadata,
    pub result: AnalysisResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<PartialParseWarning>,
}

impl Analysis {
    fn from_record(record: CacheRecord, from_cache: bool, warning: Option<PartialParseWarning>) -> Self {
        Self {
            record_id: record.id,
            repo_hash: record.repo_hash,
            model: record.model,
            from_cache,
            metadata: record.metadata,
            result: record.result,
            warning,
        }
    }
}

pub struct RepositoryAnalyzer {
    source: Arc<dyn ContentSource>,
    model: Arc<dyn LanguageModel>,
    store: Arc<dyn Store>,
    options: AnalysisConfig,
    exclusions: ExclusionRules,
}

impl RepositoryAnalyzer {
    pub fn new(
        source: Arc<dyn ContentSource>,
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn Store>,
        options: AnalysisConfig,
    ) -> Result<Self> {
        let exclusions = ExclusionRules::new(&options.exclude_globs)?;
        Ok(Self {
            source,
            model,
            store,
            options,
            exclusions,
        })
    }

    /// Build an analyzer from configuration: SQLite store (schema applied),
    /// git/filesystem content source, and the configured model backend.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;

        Self::new(
            Arc::new(RepositorySource::from_config(config)),
            create_model(&config.llm)?,
            Arc::new(SqliteStore::new(pool)),
            config.analysis.clone(),
        )
    }

    /// Analyze `repo_url` at `git_ref`, optionally restricted to `subfolder`.
    ///
    /// With `force_refresh = false` an unchanged scope is answered from the
    /// store. With `force_refresh = true` the model is always called and the
    /// stored record for the same identity is overwritten.
    pub async fn analyze_repository(
        &self,
        repo_url: &str,
        git_ref: &str,
        subfolder: Option<&str>,
        force_refresh: bool,
    ) -> Result<Analysis, PipelineError> {
        let scope = Scope::new(repo_url, git_ref, subfolder);
        let at = |stage: Stage| {
            let scope = scope.clone();
            move |err: AnalysisError| PipelineError::new(scope, stage, err)
        };

        // Validating
        check_scope(&scope).map_err(at(Stage::Validating))?;
        info!(scope = %scope, force_refresh, "analyzing");
        let started = Instant::now();

        let revision = self
            .source
            .resolve(&scope.repo_url, &scope.git_ref)
            .await
            .map_err(at(Stage::Validating))?;
        let listing = self
            .source
            .list_files(&scope.repo_url, &revision)
            .await
            .map_err(at(Stage::Validating))?;
        validate_scope(&scope, &listing).map_err(at(Stage::Validating))?;

        // Loading
        let loaded = load_scope(
            self.source.as_ref(),
            &scope,
            &revision,
            &listing,
            &self.exclusions,
            self.options.max_file_bytes,
        )
        .await
        .map_err(at(Stage::Loading))?;
        debug!(
            decoded = loaded.files.len(),
            skipped = loaded.skipped,
            excluded = loaded.excluded,
            "loaded scope"
        );

        // Prioritizing
        let ranked = prioritize(
            &loaded.files,
            scope.subfolder.as_deref(),
            Limits {
                max_files: self.options.max_files,
                max_chars_per_file: self.options.max_chars_per_file,
            },
        );
        if ranked.entries.is_empty() {
            return Err(at(Stage::Prioritizing)(AnalysisError::NoAnalyzableFiles(
                scope.to_string(),
            )));
        }
        let load_duration_ms = started.elapsed().as_millis() as u64;

        // Cache check
        let repo_hash = compute_identity(&scope, &ranked.digests, &ranked.entries);
        if !force_refresh {
            let cached = self
                .store
                .lookup(&repo_hash)
                .await
                .map_err(|e| at(Stage::CacheCheck)(AnalysisError::Storage(e)))?;
            if let Some(record) = cached {
                info!(scope = %scope, record_id = record.id, "cache hit");
                let warning = parse_response(&record.result.raw_response).warning();
                return Ok(Analysis::from_record(record, true, warning));
            }
        }

        // Prompting
        self.model.ready().map_err(at(Stage::Prompting))?;
        let mut type_distribution = ranked.type_distribution;
        if loaded.skipped > 0 {
            type_distribution.insert("skipped".to_string(), loaded.skipped);
        }
        let mut metadata = RepositoryMetadata {
            repo_url: scope.repo_url.clone(),
            git_ref: scope.git_ref.clone(),
            subfolder: scope.subfolder.clone(),
            repo_hash: repo_hash.clone(),
            file_count: ranked.eligible,
            analyzed_files: 0,
            skipped_files: loaded.skipped,
            total_lines: ranked.total_lines,
            type_distribution,
            load_duration_ms,
            analyzed_at: Utc::now(),
        };
        let prompt = build_prompt(&metadata, &ranked.entries, self.options.prompt_char_budget);
        if prompt.included_files == 0 {
            return Err(at(Stage::Prompting)(AnalysisError::NoAnalyzableFiles(
                format!("{} (no file fits the prompt budget)", scope),
            )));
        }
        metadata.analyzed_files = prompt.included_files;
        debug!(
            included = prompt.included_files,
            omitted = prompt.omitted_files,
            chars = prompt.content_chars,
            "built prompt"
        );

        // Calling backend
        info!(model = self.model.model_name(), files = prompt.included_files, "requesting analysis");
        let raw = self
            .model
            .complete(&prompt)
            .await
            .map_err(at(Stage::CallingBackend))?;

        // Parsing
        let (result, warning) = parse_response(&raw).into_parts();
        if let Some(w) = &warning {
            warn!(scope = %scope, warning = %w, "model response only partially parsed");
        }

        // Persisting
        metadata.analyzed_at = Utc::now();
        let record = self
            .store
            .upsert(&NewRecord {
                repo_hash,
                repo_url: scope.repo_url.clone(),
                git_ref: scope.git_ref.clone(),
                subfolder: scope.subfolder.clone(),
                model: self.model.model_name().to_string(),
                analyzed_at: metadata.analyzed_at,
                metadata,
                result,
            })
            .await
            .map_err(|e| at(Stage::Persisting)(AnalysisError::Storage(e)))?;

        info!(scope = %scope, record_id = record.id, "analysis stored");
        Ok(Analysis::from_record(record, false, warning))
    }

    /// Pretty JSON of the most recent analysis for this exact scope, any ref.
    pub async fn export_analysis(
        &self,
        repo_url: &str,
        subfolder: Option<&str>,
    ) -> Result<String, AnalysisError> {
        self.export_analysis_at(repo_url, None, subfolder).await
    }

    /// Like [`export_analysis`](Self::export_analysis), optionally pinned to one ref.
    pub async fn export_analysis_at(
        &self,
        repo_url: &str,
        git_ref: Option<&str>,
        subfolder: Option<&str>,
    ) -> Result<String, AnalysisError> {
        let subfolder = subfolder.and_then(normalize_subfolder);
        let record = self
            .store
            .latest(repo_url.trim(), subfolder.as_deref(), git_ref)
            .await
            .map_err(AnalysisError::Storage)?
            .ok_or_else(|| {
                let mut what = repo_url.trim().to_string();
                if let Some(r) = git_ref {
                    what.push('@');
                    what.push_str(r);
                }
                if let Some(sub) = &subfolder {
                    what.push_str(&format!(" ({})", sub));
                }
                AnalysisError::NotFound(what)
            })?;

        Ok(serde_json::to_string_pretty(&record)?)
    }

    /// Stored analyses, newest first, optionally filtered.
    pub async fn history(
        &self,
        repo_url: Option<&str>,
        subfolder: Option<&str>,
    ) -> Result<Vec<CacheRecord>, AnalysisError> {
        let filter = HistoryFilter {
            repo_url: repo_url.map(|u| u.trim().to_string()),
            subfolder: subfolder.and_then(normalize_subfolder),
        };
        self.store
            .history(&filter)
            .await
            .map_err(AnalysisError::Storage)
    }
}

fn check_scope(scope: &Scope) -> Result<(), AnalysisError> {
    if scope.repo_url.is_empty() {
        return Err(AnalysisError::InvalidScope(
            "repo_url must not be empty".to_string(),
        ));
    }
    if scope.git_ref.is_empty() {
        return Err(AnalysisError::InvalidScope("ref must not be empty".to_string()));
    }
    if let Some(sub) = &scope.subfolder {
        if sub.split('/').any(|part| part == "..") {
            return Err(AnalysisError::InvalidScope(format!(
                "subfolder '{}' escapes the repository root",
                sub
            )));
        }
    }
    Ok(())
}
