//! Error taxonomy for the analysis pipeline.
//!
//! [`AnalysisError`] names what went wrong; [`PipelineError`] wraps it with
//! the scope and the [`Stage`] the request had reached, so callers can tell
//! "nothing was attempted" apart from "the backend was contacted".

use std::fmt;

use thiserror::Error;

use crate::models::Scope;

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The requested subfolder is not a directory in the resolved tree.
    #[error("subfolder '{subfolder}' does not exist in {repo_url}@{git_ref}")]
    ScopeNotFound {
        repo_url: String,
        git_ref: String,
        subfolder: String,
    },

    #[error("invalid scope: {0}")]
    InvalidScope(String),

    /// The content provider could not be reached or refused the fetch.
    #[error("content source unavailable for {repo_url}@{git_ref}: {reason}")]
    SourceUnavailable {
        repo_url: String,
        git_ref: String,
        reason: String,
    },

    #[error("no analyzable files found in {0}")]
    NoAnalyzableFiles(String),

    /// The model backend rejected (or was never given) credentials.
    #[error("model backend rejected credentials: {0}")]
    Authentication(String),

    /// The model backend failed and the retry budget is spent.
    #[error("model backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("no analysis found for {0}")]
    NotFound(String),

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Pipeline states, in execution order. Parsing never fails, so it has no
/// variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Validating,
    Loading,
    Prioritizing,
    CacheCheck,
    Prompting,
    CallingBackend,
    Persisting,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validating => "validating",
            Stage::Loading => "loading",
            Stage::Prioritizing => "prioritizing",
            Stage::CacheCheck => "cache check",
            Stage::Prompting => "prompting",
            Stage::CallingBackend => "calling backend",
            Stage::Persisting => "persisting",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A terminal pipeline failure with the scope and stage it occurred in.
#[derive(Debug, Error)]
#[error("analysis of {scope} failed while {stage}: {source}")]
pub struct PipelineError {
    pub scope: Scope,
    pub stage: Stage,
    #[source]
    pub source: AnalysisError,
}

impl PipelineError {
    pub fn new(scope: Scope, stage: Stage, source: AnalysisError) -> Self {
        Self {
            scope,
            stage,
            source,
        }
    }

    /// Whether a request had been issued to the model backend. Missing
    /// credentials and a disabled backend are caught while prompting, before
    /// any request is sent.
    pub fn backend_contacted(&self) -> bool {
        self.stage >= Stage::CallingBackend
    }

    pub fn kind(&self) -> &AnalysisError {
        &self.source
    }
}
