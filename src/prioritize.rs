//! File ranking, filtering, and truncation.
//!
//! Every decoded file is assigned a tier from 1 (most informative) to 7 by
//! filename/extension pattern; files matching no tier are dropped. The
//! survivors are ordered by `(tier, depth, path)` and the first `max_files`
//! are kept, each truncated to `max_chars_per_file` characters.
//!
//! | Tier | Matches |
//! |------|---------|
//! | 1 | README at the scope root |
//! | 2 | Package/build manifests at depth ≤ 1 |
//! | 3 | CONTRIBUTING, LICENSE, CHANGELOG, API docs, nested READMEs, `docs/` text |
//! | 4 | Configuration (`*config*.json`, `*.config.js`, settings files) |
//! | 5 | Entry points (`main.*`, `index.*`, `app.*`, …) in a source language |
//! | 6 | Other source files |
//! | 7 | Other text (markdown, YAML, JSON, TOML, …) |
//!
//! Depth is measured from the scope root. When a subfolder is being analyzed,
//! tier 5 and 6 files sitting directly in it move up one tier.

use std::collections::BTreeMap;

use crate::identity::{content_digest, FileDigest};
use crate::loader::scope_relative;
use crate::models::{DecodedFile, FileEntry};

const README_NAMES: &[&str] = &["readme.md", "readme.txt", "readme.rst", "readme"];

const MANIFEST_NAMES: &[&str] = &[
    "package.json",
    "requirements.txt",
    "pyproject.toml",
    "cargo.toml",
    "go.mod",
    "pom.xml",
    "build.gradle",
    "build.gradle.kts",
    "composer.json",
    "gemfile",
    "setup.py",
    "setup.cfg",
];

const SECONDARY_DOC_NAMES: &[&str] = &["api.md", "docs.md", "getting-started.md"];

const SECONDARY_DOC_STEMS: &[&str] = &["contributing", "changelog", "license"];

const DOC_EXTENSIONS: &[&str] = &["md", "txt", "rst"];

const SETTINGS_NAMES: &[&str] = &["settings.json", "settings.py", ".env.example"];

const ENTRY_STEMS: &[&str] = &[
    "main", "index", "app", "server", "lib", "mod", "__init__", "__main__",
];

const SOURCE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "jsx", "tsx", "mjs", "cjs", "java", "go", "rs", "cpp", "cc", "c", "h",
    "hpp", "cs", "php", "rb", "swift", "kt", "kts", "dart", "scala", "sh", "vue", "svelte",
];

const TEXT_EXTENSIONS: &[&str] = &[
    "md", "txt", "rst", "yml", "yaml", "json", "xml", "toml", "ini", "cfg",
];

/// Budgets applied by [`prioritize`].
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_files: usize,
    pub max_chars_per_file: usize,
}

/// Prioritizer output: the selected entries plus totals over all eligible files.
#[derive(Debug, Clone, Default)]
pub struct Prioritized {
    pub entries: Vec<FileEntry>,
    /// Files that matched a tier, before the `max_files` cut.
    pub eligible: usize,
    /// Full-text digest of every eligible file, selected or not.
    pub digests: Vec<FileDigest>,
    pub total_lines: usize,
    /// Extension (with leading dot, or `no_extension`) → eligible file count.
    pub type_distribution: BTreeMap<String, usize>,
}

/// Assign a tier to a path relative to the scope root, or `None` to exclude it.
pub fn classify(scope_path: &str, scoped: bool) -> Option<u8> {
    let lower = scope_path.to_lowercase();
    let parts: Vec<&str> = lower.split('/').collect();
    let depth = parts.len() - 1;
    let file_name = parts[depth];
    let dirs = &parts[..depth];
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, ext),
        _ => (file_name, ""),
    };

    if README_NAMES.contains(&file_name) && depth == 0 {
        return Some(1);
    }

    if MANIFEST_NAMES.contains(&file_name) && depth <= 1 {
        return Some(2);
    }

    let is_secondary_doc = SECONDARY_DOC_NAMES.contains(&file_name)
        || SECONDARY_DOC_STEMS.contains(&stem)
        || stem.starts_with("license-")
        || README_NAMES.contains(&file_name)
        || (DOC_EXTENSIONS.contains(&ext) && dirs.iter().any(|d| *d == "docs" || *d == "doc"));
    if is_secondary_doc {
        return Some(3);
    }

    let is_config = (file_name.contains("config") && ext == "json")
        || file_name.ends_with(".config.js")
        || file_name.ends_with(".config.ts")
        || file_name.ends_with(".config.mjs")
        || SETTINGS_NAMES.contains(&file_name);
    if is_config {
        return Some(4);
    }

    let tier = if SOURCE_EXTENSIONS.contains(&ext) {
        if ENTRY_STEMS.contains(&stem) {
            5
        } else {
            6
        }
    } else if TEXT_EXTENSIONS.contains(&ext) {
        return Some(7);
    } else {
        return None;
    };

    // Source files directly at a subfolder root are what the scope is about.
    if scoped && depth == 0 {
        Some(tier - 1)
    } else {
        Some(tier)
    }
}

/// Rank, filter, and truncate decoded files for one scope.
pub fn prioritize(files: &[DecodedFile], subfolder: Option<&str>, limits: Limits) -> Prioritized {
    let scoped = subfolder.is_some();
    let mut out = Prioritized::default();
    let mut ranked: Vec<(u8, usize, &DecodedFile, String)> = Vec::new();

    for file in files {
        let relative = scope_relative(&file.path, subfolder);
        let Some(tier) = classify(relative, scoped) else {
            continue;
        };

        out.eligible += 1;
        out.total_lines += file.text.lines().count();
        *out.type_distribution
            .entry(extension_label(&file.path))
            .or_insert(0) += 1;

        let digest = content_digest(&file.text);
        out.digests.push(FileDigest {
            path: file.path.clone(),
            digest: digest.clone(),
        });

        let depth = relative.matches('/').count();
        ranked.push((tier, depth, file, digest));
    }

    ranked.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then(a.1.cmp(&b.1))
            .then_with(|| a.2.path.cmp(&b.2.path))
    });

    out.entries = ranked
        .into_iter()
        .take(limits.max_files)
        .map(|(tier, _, file, digest)| {
            let (content, is_truncated) = truncate_chars(&file.text, limits.max_chars_per_file);
            FileEntry {
                path: file.path.clone(),
                content,
                priority: tier,
                byte_size: file.byte_size,
                is_truncated,
                content_hash: digest,
            }
        })
        .collect();

    out
}

/// Keep at most `max_chars` characters; the flag reports whether anything was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (text[..byte_idx].to_string(), true),
        None => (text.to_string(), false),
    }
}

fn extension_label(path: &str) -> String {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            format!(".{}", ext.to_lowercase())
        }
        _ => "no_extension".to_string(),
    }
}
