//! Content source selection.
//!
//! [`RepositorySource`] routes each request by its `repo_url`: local
//! directories and `file://` URLs go to [`FilesystemSource`], everything
//! else to [`GitSource`].

use async_trait::async_trait;

use crate::config::Config;
use crate::connector_fs::{local_root, FilesystemSource};
use crate::connector_git::GitSource;
use crate::error::AnalysisError;
use crate::loader::ContentSource;
use crate::models::ListedFile;

pub struct RepositorySource {
    git: GitSource,
    fs: FilesystemSource,
}

impl RepositorySource {
    pub fn from_config(config: &Config) -> Self {
        Self {
            git: GitSource::new(config.git_cache_dir()),
            fs: FilesystemSource,
        }
    }

    fn route(&self, repo_url: &str) -> &dyn ContentSource {
        if local_root(repo_url).is_some() {
            &self.fs
        } else {
            &self.git
        }
    }
}

#[async_trait]
impl ContentSource for RepositorySource {
    fn name(&self) -> &str {
        "repository"
    }

    async fn resolve(&self, repo_url: &str, git_ref: &str) -> Result<String, AnalysisError> {
        self.route(repo_url).resolve(repo_url, git_ref).await
    }

    async fn list_files(
        &self,
        repo_url: &str,
        git_ref: &str,
    ) -> Result<Vec<ListedFile>, AnalysisError> {
        self.route(repo_url).list_files(repo_url, git_ref).await
    }

    async fn read_file(
        &self,
        repo_url: &str,
        git_ref: &str,
        path: &str,
    ) -> Result<Vec<u8>, AnalysisError> {
        self.route(repo_url).read_file(repo_url, git_ref, path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_routes_local_paths_to_filesystem() {
        let tmp = TempDir::new().unwrap();
        let source = RepositorySource::from_config(&Config::default());
        let local = tmp.path().display().to_string();
        assert_eq!(source.route(&local).name(), "filesystem");
        assert_eq!(
            source.route("https://github.com/rust-lang/log").name(),
            "git"
        );
    }
}
