use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::AnalysisError;
use crate::loader::ContentSource;
use crate::models::ListedFile;

/// Reads a repository straight from a local directory.
///
/// `repo_url` is a filesystem path or a `file://` URL. The ref is recorded in
/// metadata but not resolved: whatever is on disk is analyzed.
pub struct FilesystemSource;

/// The local directory a `repo_url` points at, if it names one.
pub fn local_root(repo_url: &str) -> Option<PathBuf> {
    let raw = repo_url.strip_prefix("file://").unwrap_or(repo_url);
    let path = Path::new(raw);
    if path.is_dir() {
        Some(path.to_path_buf())
    } else {
        None
    }
}

fn unavailable(repo_url: &str, git_ref: &str, reason: String) -> AnalysisError {
    AnalysisError::SourceUnavailable {
        repo_url: repo_url.to_string(),
        git_ref: git_ref.to_string(),
        reason,
    }
}

#[async_trait]
impl ContentSource for FilesystemSource {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn list_files(
        &self,
        repo_url: &str,
        git_ref: &str,
    ) -> Result<Vec<ListedFile>, AnalysisError> {
        let root = local_root(repo_url).ok_or_else(|| {
            unavailable(repo_url, git_ref, "directory does not exist".to_string())
        })?;
        walk_tree(&root).map_err(|e| unavailable(repo_url, git_ref, format!("{:#}", e)))
    }

    async fn read_file(
        &self,
        repo_url: &str,
        git_ref: &str,
        path: &str,
    ) -> Result<Vec<u8>, AnalysisError> {
        let root = local_root(repo_url).ok_or_else(|| {
            unavailable(repo_url, git_ref, "directory does not exist".to_string())
        })?;
        let full = root.join(path);
        tokio::fs::read(&full).await.map_err(|e| {
            unavailable(
                repo_url,
                git_ref,
                format!("failed to read {}: {}", full.display(), e),
            )
        })
    }
}

/// List every regular file under `root` (excluding `.git`) with its size.
pub(crate) fn walk_tree(root: &Path) -> Result<Vec<ListedFile>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || e.file_name() != ".git");

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);

        files.push(ListedFile {
            path: rel_str,
            size,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}
