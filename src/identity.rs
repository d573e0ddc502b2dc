//! Content-derived cache identity.
//!
//! The `repo_hash` of an analysis is a SHA-256 over:
//! - the scope (`repo_url`, ref, subfolder)
//! - the path and full-text digest of every eligible file, selected or not
//! - the path and digest of the (possibly truncated) text of each file
//!   selected for the prompt
//!
//! Adding, removing or editing any eligible file changes the hash, and so
//! does a file budget that changes what the model would be shown.
//!
//! Each field is fed to the hasher length-prefixed so that no two distinct
//! inputs can concatenate to the same byte stream. Files are hashed in path
//! order; the order a source lists them in does not matter.

use sha2::{Digest, Sha256};

use crate::models::{FileEntry, Scope};

/// SHA-256 hex digest of a file's full text.
pub fn content_digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Path and full-text digest of one eligible file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileDigest {
    pub path: String,
    pub digest: String,
}

/// Compute the cache identity of `scope` from its eligible files and the
/// entries selected for the prompt.
pub fn compute_identity(scope: &Scope, eligible: &[FileDigest], selected: &[FileEntry]) -> String {
    let mut hasher = Sha256::new();

    feed(&mut hasher, scope.repo_url.as_bytes());
    feed(&mut hasher, scope.git_ref.as_bytes());
    match &scope.subfolder {
        Some(sub) => {
            hasher.update([1u8]);
            feed(&mut hasher, sub.as_bytes());
        }
        None => hasher.update([0u8]),
    }

    let mut all: Vec<(&str, &str)> = eligible
        .iter()
        .map(|f| (f.path.as_str(), f.digest.as_str()))
        .collect();
    all.sort();
    feed_files(&mut hasher, &all);

    let sent: Vec<(&str, String)> = selected
        .iter()
        .map(|e| (e.path.as_str(), content_digest(&e.content)))
        .collect();
    let mut sent: Vec<(&str, &str)> = sent.iter().map(|(p, d)| (*p, d.as_str())).collect();
    sent.sort();
    feed_files(&mut hasher, &sent);

    format!("{:x}", hasher.finalize())
}

fn feed_files(hasher: &mut Sha256, files: &[(&str, &str)]) {
    hasher.update((files.len() as u64).to_le_bytes());
    for (path, digest) in files {
        feed(hasher, path.as_bytes());
        feed(hasher, digest.as_bytes());
    }
}

fn feed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
