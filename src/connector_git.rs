use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::AnalysisError;
use crate::loader::ContentSource;
use crate::models::ListedFile;

/// Fetches repositories with the `git` CLI into a local object cache.
///
/// Workflow:
/// 1. [`resolve`](ContentSource::resolve) picks a bare repository keyed by a
///    short hash of the url, runs `git init --bare` on first use, then
///    `git fetch --depth 1 origin <ref>` and pins `FETCH_HEAD` to its
///    commit SHA.
/// 2. [`list_files`](ContentSource::list_files) runs `git ls-tree` on that SHA.
/// 3. [`read_file`](ContentSource::read_file) runs `git cat-file blob <sha>:<path>`.
///
/// No working tree is checked out, so a later fetch of the same ref never
/// changes what an in-flight analysis reads. Fetches into one repository are
/// serialized; different repositories proceed independently.
pub struct GitSource {
    cache_root: PathBuf,
    locks: std::sync::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl GitSource {
    pub fn new(cache_root: PathBuf) -> Self {
        Self {
            cache_root,
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn repo_dir(&self, repo_url: &str) -> PathBuf {
        self.cache_root.join(short_hash(repo_url))
    }

    fn lock_for(&self, dir: &Path) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| anyhow::anyhow!("git lock table poisoned"))?;
        Ok(locks.entry(dir.to_path_buf()).or_default().clone())
    }

    async fn fetch(&self, repo_url: &str, git_ref: &str) -> Result<String> {
        let dir = self.repo_dir(repo_url);
        let lock = self.lock_for(&dir)?;
        let _guard = lock.lock().await;

        if !dir.join("HEAD").exists() {
            std::fs::create_dir_all(&dir).with_context(|| {
                format!("Failed to create git cache directory: {}", dir.display())
            })?;
            run_git(&dir, &["init", "--bare", "--quiet"]).await?;
            run_git(&dir, &["remote", "add", "origin", repo_url]).await?;
        }

        info!(repo = repo_url, git_ref, dir = %dir.display(), "fetching repository");
        run_git(&dir, &["fetch", "--quiet", "--depth", "1", "origin", git_ref]).await?;
        let sha = run_git(&dir, &["rev-parse", "FETCH_HEAD^{commit}"]).await?;
        let sha = String::from_utf8_lossy(&sha).trim().to_string();
        debug!(repo = repo_url, git_ref, commit = %sha, "resolved ref");
        Ok(sha)
    }

    /// `git_ref` as a commit SHA, fetching unless it already is one.
    async fn pinned(&self, repo_url: &str, git_ref: &str) -> Result<String> {
        if is_commit_sha(git_ref) && self.repo_dir(repo_url).join("HEAD").exists() {
            Ok(git_ref.to_string())
        } else {
            self.fetch(repo_url, git_ref).await
        }
    }

    fn unavailable(repo_url: &str, git_ref: &str, err: anyhow::Error) -> AnalysisError {
        AnalysisError::SourceUnavailable {
            repo_url: repo_url.to_string(),
            git_ref: git_ref.to_string(),
            reason: format!("{:#}", err),
        }
    }
}

#[async_trait]
impl ContentSource for GitSource {
    fn name(&self) -> &str {
        "git"
    }

    async fn resolve(&self, repo_url: &str, git_ref: &str) -> Result<String, AnalysisError> {
        self.fetch(repo_url, git_ref)
            .await
            .map_err(|e| Self::unavailable(repo_url, git_ref, e))
    }

    async fn list_files(
        &self,
        repo_url: &str,
        git_ref: &str,
    ) -> Result<Vec<ListedFile>, AnalysisError> {
        let listed = async {
            let sha = self.pinned(repo_url, git_ref).await?;
            let out = run_git(
                &self.repo_dir(repo_url),
                &["ls-tree", "-r", "-l", "-z", "--full-tree", &sha],
            )
            .await?;
            Ok::<_, anyhow::Error>(parse_ls_tree(&out))
        };
        let files = listed
            .await
            .map_err(|e| Self::unavailable(repo_url, git_ref, e))?;
        debug!(count = files.len(), "listed tree");
        Ok(files)
    }

    async fn read_file(
        &self,
        repo_url: &str,
        git_ref: &str,
        path: &str,
    ) -> Result<Vec<u8>, AnalysisError> {
        let read = async {
            let sha = self.pinned(repo_url, git_ref).await?;
            let object = format!("{}:{}", sha, path);
            run_git(&self.repo_dir(repo_url), &["cat-file", "blob", &object]).await
        };
        read.await
            .map_err(|e| Self::unavailable(repo_url, git_ref, e.context(format!("reading {}", path))))
    }
}

/// Run `git` in `dir` and return its stdout.
async fn run_git(dir: &Path, args: &[&str]) -> Result<Vec<u8>> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .await
        .with_context(|| format!("Failed to execute 'git {}'. Is git installed?", args[0]))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {}", args[0], stderr.trim());
    }

    Ok(output.stdout)
}

/// Regular files from `git ls-tree -r -l -z` output.
///
/// Each record is `<mode> <type> <object> <size>\t<path>`. Submodules and
/// symlinks are skipped.
fn parse_ls_tree(out: &[u8]) -> Vec<ListedFile> {
    let mut files: Vec<ListedFile> = out
        .split(|b| *b == 0)
        .filter_map(|record| {
            let record = String::from_utf8_lossy(record);
            let (meta, path) = record.split_once('\t')?;
            let fields: Vec<&str> = meta.split_whitespace().collect();
            match fields.as_slice() {
                [mode, "blob", _, size] if *mode != "120000" => Some(ListedFile {
                    path: path.to_string(),
                    size: size.parse().unwrap_or(0),
                }),
                _ => None,
            }
        })
        .collect();

    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

fn is_commit_sha(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())[..12].to_string()
}
