//! Content loading: scope validation, exclusion, and text decoding.
//!
//! A [`ContentSource`] resolves `(repo_url, git_ref)` to a file listing and
//! serves raw bytes. This module validates the requested subfolder against
//! that listing, drops build/vendor/binary paths before anything is read,
//! and decodes the remaining files to text.
//!
//! # Decoding
//!
//! Each file goes through a fallback chain:
//! 1. UTF-8 (a leading BOM is stripped)
//! 2. UTF-16, only when a UTF-16 BOM is present
//! 3. Latin-1, only when the bytes look textual
//!
//! Files that fail all three are skipped and counted, never surfaced as errors.

use anyhow::Result;
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;

use crate::error::AnalysisError;
use crate::models::{DecodedFile, ListedFile, Scope};

/// A provider of repository trees.
///
/// Paths are relative to the repository root and use forward slashes.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Short identifier for logs (e.g. `"git"`).
    fn name(&self) -> &str;

    /// Pin `git_ref` to the revision that listing and reads should use, so
    /// one analysis never mixes two snapshots of a moving ref. Sources
    /// without history return the ref unchanged.
    async fn resolve(&self, _repo_url: &str, git_ref: &str) -> Result<String, AnalysisError> {
        Ok(git_ref.to_string())
    }

    /// List every file in the tree of `repo_url` at `git_ref`.
    async fn list_files(
        &self,
        repo_url: &str,
        git_ref: &str,
    ) -> Result<Vec<ListedFile>, AnalysisError>;

    /// Read the raw bytes of one listed file.
    async fn read_file(
        &self,
        repo_url: &str,
        git_ref: &str,
        path: &str,
    ) -> Result<Vec<u8>, AnalysisError>;
}

/// Directories whose contents never reach the prioritizer.
const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "dist",
    "build",
    "target",
    ".next",
    ".cache",
    "__pycache__",
    ".venv",
    "venv",
    "env",
    "vendor",
];

const EXCLUDED_FILES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "cargo.lock",
    "poetry.lock",
    "gemfile.lock",
    "composer.lock",
    "go.sum",
];

const EXCLUDED_EXTENSIONS: &[&str] = &[
    "lock", "png", "jpg", "jpeg", "gif", "bmp", "ico", "svg", "webp", "pdf", "exe", "dll", "so",
    "dylib", "bin", "o", "a", "class", "jar", "pyc", "wasm", "zip", "tar", "gz", "tgz", "bz2",
    "xz", "7z", "rar", "mp3", "mp4", "mov", "avi", "mkv", "wav", "woff", "woff2", "ttf", "eot",
    "otf",
];

/// Path filters applied before any file is read.
#[derive(Debug, Clone)]
pub struct ExclusionRules {
    user_globs: GlobSet,
}

impl ExclusionRules {
    /// Built-in rules plus the configured `exclude_globs`.
    pub fn new(exclude_globs: &[String]) -> Result<Self> {
        Ok(Self {
            user_globs: build_globset(exclude_globs)?,
        })
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        let lower = path.to_lowercase();
        let mut parts: Vec<&str> = lower.split('/').collect();
        let file_name = parts.pop().unwrap_or_default();

        if parts.iter().any(|dir| EXCLUDED_DIRS.contains(dir)) {
            return true;
        }
        if EXCLUDED_FILES.contains(&file_name) {
            return true;
        }
        if file_name.ends_with(".min.js") || file_name.ends_with(".min.css") {
            return true;
        }
        if let Some((_, ext)) = file_name.rsplit_once('.') {
            if EXCLUDED_EXTENSIONS.contains(&ext) {
                return true;
            }
        }

        self.user_globs.is_match(path)
    }
}

impl Default for ExclusionRules {
    fn default() -> Self {
        Self {
            user_globs: GlobSet::empty(),
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Whether `path` lies beneath `subfolder` (or anywhere, for the root scope).
pub fn in_scope(path: &str, subfolder: Option<&str>) -> bool {
    match subfolder {
        None => true,
        Some(sub) => path
            .strip_prefix(sub)
            .is_some_and(|rest| rest.starts_with('/')),
    }
}

/// Path relative to the scope root.
pub fn scope_relative<'a>(path: &'a str, subfolder: Option<&str>) -> &'a str {
    match subfolder {
        Some(sub) => path
            .strip_prefix(sub)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(path),
        None => path,
    }
}

/// Fail with `ScopeNotFound` unless the subfolder is a directory in `listing`.
pub fn validate_scope(scope: &Scope, listing: &[ListedFile]) -> Result<(), AnalysisError> {
    let Some(sub) = scope.subfolder.as_deref() else {
        return Ok(());
    };

    if listing.iter().any(|f| in_scope(&f.path, Some(sub))) {
        return Ok(());
    }

    Err(AnalysisError::ScopeNotFound {
        repo_url: scope.repo_url.clone(),
        git_ref: scope.git_ref.clone(),
        subfolder: sub.to_string(),
    })
}

/// Files decoded for one scope, plus what was dropped on the way.
#[derive(Debug, Clone, Default)]
pub struct LoadedScope {
    pub files: Vec<DecodedFile>,
    /// Files that failed every decoding attempt.
    pub skipped: usize,
    /// In-scope files dropped by exclusion rules or the size limit.
    pub excluded: usize,
}

/// Read and decode every in-scope, non-excluded file of `listing`.
///
/// Files come back sorted by path so downstream stages see a stable order.
pub async fn load_scope(
    source: &dyn ContentSource,
    scope: &Scope,
    revision: &str,
    listing: &[ListedFile],
    rules: &ExclusionRules,
    max_file_bytes: u64,
) -> Result<LoadedScope, AnalysisError> {
    let subfolder = scope.subfolder.as_deref();
    let mut loaded = LoadedScope::default();

    for listed in listing {
        if !in_scope(&listed.path, subfolder) {
            continue;
        }
        if rules.is_excluded(&listed.path) || listed.size > max_file_bytes {
            loaded.excluded += 1;
            continue;
        }

        let bytes = source
            .read_file(&scope.repo_url, revision, &listed.path)
            .await?;

        match decode_text(&bytes) {
            Some(text) => loaded.files.push(DecodedFile {
                path: listed.path.clone(),
                text,
                byte_size: bytes.len() as u64,
            }),
            None => {
                debug!(path = %listed.path, "skipping undecodable file");
                loaded.skipped += 1;
            }
        }
    }

    loaded.files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(loaded)
}

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Decode bytes as text, or `None` when they look binary.
pub fn decode_text(bytes: &[u8]) -> Option<String> {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    if let Ok(text) = std::str::from_utf8(body) {
        return if text.contains('\0') {
            None
        } else {
            Some(text.to_string())
        };
    }

    if let Some(text) = decode_utf16_with_bom(bytes) {
        return Some(text);
    }

    if looks_textual(bytes) {
        // Latin-1 maps every byte to the code point of the same value.
        return Some(bytes.iter().map(|&b| b as char).collect());
    }

    None
}

fn decode_utf16_with_bom(bytes: &[u8]) -> Option<String> {
    let little_endian = match bytes {
        [0xFF, 0xFE, ..] => true,
        [0xFE, 0xFF, ..] => false,
        _ => return None,
    };
    let body = &bytes[2..];
    if body.len() % 2 != 0 {
        return None;
    }

    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| {
            if little_endian {
                u16::from_le_bytes([pair[0], pair[1]])
            } else {
                u16::from_be_bytes([pair[0], pair[1]])
            }
        })
        .collect();

    String::from_utf16(&units)
        .ok()
        .filter(|text| !text.contains('\0'))
}

/// No NUL bytes and at most 30% control characters.
fn looks_textual(bytes: &[u8]) -> bool {
    if bytes.contains(&0) {
        return false;
    }
    let control = bytes
        .iter()
        .filter(|&&b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0C))
        .count();
    control * 10 <= bytes.len() * 3
}
