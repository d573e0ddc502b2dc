//! Core data models used throughout the analyzer.
//!
//! These types represent the scope being analyzed, the files selected for the
//! prompt, the structured result parsed from the model response, and the
//! record persisted in the analysis store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The `(repo_url, git_ref, subfolder)` triple identifying what is analyzed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub repo_url: String,
    pub git_ref: String,
    pub subfolder: Option<String>,
}

impl Scope {
    /// Build a scope, normalizing the subfolder (see [`normalize_subfolder`]).
    pub fn new(repo_url: &str, git_ref: &str, subfolder: Option<&str>) -> Self {
        Self {
            repo_url: repo_url.trim().to_string(),
            git_ref: git_ref.trim().to_string(),
            subfolder: subfolder.and_then(normalize_subfolder),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repo_url, self.git_ref)?;
        if let Some(sub) = &self.subfolder {
            write!(f, " ({})", sub)?;
        }
        Ok(())
    }
}

/// Normalize a user-supplied subfolder to a forward-slash relative path.
///
/// Returns `None` when the input denotes the repository root (`""`, `"."`,
/// `"/"`, `"./"`).
pub fn normalize_subfolder(raw: &str) -> Option<String> {
    let cleaned = raw.trim().replace('\\', "/");
    let parts: Vec<&str> = cleaned
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// A file path reported by a content source, before any bytes are read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedFile {
    /// Path relative to the repository root, forward-slash separated.
    pub path: String,
    pub size: u64,
}

/// A file whose bytes were decoded to text by the loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFile {
    /// Path relative to the repository root, forward-slash separated.
    pub path: String,
    pub text: String,
    pub byte_size: u64,
}

/// One unit of content sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the repository root, forward-slash separated.
    pub path: String,
    /// Text truncated to at most `max_chars_per_file` characters.
    pub content: String,
    /// Priority tier, 1 (most informative) through 7.
    pub priority: u8,
    pub byte_size: u64,
    pub is_truncated: bool,
    /// SHA-256 of the full decoded text, before truncation.
    pub content_hash: String,
}

/// Identity and shape of an analyzed scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    pub repo_url: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub subfolder: Option<String>,
    pub repo_hash: String,
    /// Eligible files in scope (after exclusion and tiering).
    pub file_count: usize,
    /// Files whose content made it into the prompt.
    pub analyzed_files: usize,
    /// Undecodable files dropped by the loader.
    pub skipped_files: usize,
    pub total_lines: usize,
    pub type_distribution: BTreeMap<String, usize>,
    pub load_duration_ms: u64,
    pub analyzed_at: DateTime<Utc>,
}

/// A named component reported by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyComponent {
    pub name: String,
    pub purpose: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Structured output parsed from a model response.
///
/// Every field except `raw_response` may be empty when the response could
/// only be partially parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: String,
    #[serde(default)]
    pub objectives: Vec<String>,
    pub architecture: String,
    pub key_components: Vec<KeyComponent>,
    pub tech_stack: Vec<String>,
    pub complexity_score: Option<u8>,
    pub recommendations: Vec<String>,
    pub raw_response: String,
}

impl AnalysisResult {
    /// A result carrying only the verbatim backend output.
    pub fn raw_only(raw_response: &str) -> Self {
        Self {
            raw_response: raw_response.to_string(),
            ..Self::default()
        }
    }
}

/// A persisted analysis, keyed uniquely by `repo_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub id: i64,
    pub repo_hash: String,
    pub repo_url: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub subfolder: Option<String>,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub analyzed_at: DateTime<Utc>,
    pub metadata: RepositoryMetadata,
    pub result: AnalysisResult,
}

/// The fields of a [`CacheRecord`] the caller supplies; the store assigns
/// `id` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub repo_hash: String,
    pub repo_url: String,
    pub git_ref: String,
    pub subfolder: Option<String>,
    pub model: String,
    pub analyzed_at: DateTime<Utc>,
    pub metadata: RepositoryMetadata,
    pub result: AnalysisResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_subfolder_root_forms() {
        assert_eq!(normalize_subfolder(""), None);
        assert_eq!(normalize_subfolder("."), None);
        assert_eq!(normalize_subfolder("/"), None);
        assert_eq!(normalize_subfolder("./"), None);
    }

    #[test]
    fn test_normalize_subfolder_cleans_separators() {
        assert_eq!(
            normalize_subfolder("./src//frontend/"),
            Some("src/frontend".to_string())
        );
        assert_eq!(
            normalize_subfolder("src\\backend"),
            Some("src/backend".to_string())
        );
    }

    #[test]
    fn test_scope_display() {
        let scope = Scope::new("https://github.com/o/r", "main", Some("src/"));
        assert_eq!(scope.to_string(), "https://github.com/o/r@main (src)");
        let root = Scope::new("https://github.com/o/r", "main", None);
        assert_eq!(root.to_string(), "https://github.com/o/r@main");
    }
}
