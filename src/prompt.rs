//! Prompt construction.
//!
//! Turns scope metadata and the prioritized file entries into a single
//! bounded request: a system instruction fixing the JSON response schema, and
//! a user message with repository context, a file listing, and file contents
//! in priority order. Contents stop at the first file that would push the
//! cumulative size past the character budget.

use std::fmt::Write;

use crate::models::{FileEntry, RepositoryMetadata};

/// A request ready to hand to a [`LanguageModel`](crate::llm::LanguageModel).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub included_files: usize,
    pub omitted_files: usize,
    /// Characters of file content embedded in `user`.
    pub content_chars: usize,
}

const RESPONSE_SCHEMA: &str = r#"{
  "summary": "2-3 sentences on what this code does",
  "objectives": ["main objective", "..."],
  "architecture": "architecture pattern, layers, and how the main directories relate",
  "key_components": [
    {"name": "ComponentName", "type": "class|function|module|service", "purpose": "what it does", "location": "path"}
  ],
  "tech_stack": ["language, framework or tool", "..."],
  "complexity_score": 5,
  "recommendations": ["concrete improvement", "..."]
}"#;

fn system_instruction(scoped: bool) -> String {
    let mut out = String::from(
        "You are an expert software architect reviewing a codebase. \
         Base every statement on the files provided; do not invent components.\n\n",
    );
    if scoped {
        out.push_str(
            "You are analyzing one module within a larger repository. Describe what \
             this module does, how it is structured, and how it likely fits into the \
             surrounding repository.\n\n",
        );
    }
    out.push_str(
        "Respond with a single JSON object and nothing else, using exactly this schema:\n",
    );
    out.push_str(RESPONSE_SCHEMA);
    out.push_str(
        "\n\n`complexity_score` is an integer from 1 (trivial) to 10 (very complex). \
         Use empty arrays for list fields you cannot fill.",
    );
    out
}

/// Build the request for one analysis.
///
/// `char_budget` bounds the total file content; entries after the first one
/// that would exceed it are listed as omitted.
pub fn build_prompt(
    metadata: &RepositoryMetadata,
    entries: &[FileEntry],
    char_budget: usize,
) -> Prompt {
    let mut included: Vec<&FileEntry> = Vec::new();
    let mut content_chars = 0usize;
    for entry in entries {
        let len = entry.content.chars().count();
        if content_chars + len > char_budget {
            break;
        }
        content_chars += len;
        included.push(entry);
    }

    let scope_label = match &metadata.subfolder {
        Some(sub) => format!("subfolder '{}'", sub),
        None => "entire repository".to_string(),
    };

    let mut user = String::new();
    let _ = writeln!(user, "Analyze the {} described below.\n", scope_label);
    let _ = writeln!(user, "REPOSITORY");
    let _ = writeln!(user, "- URL: {}", metadata.repo_url);
    let _ = writeln!(user, "- Ref: {}", metadata.git_ref);
    if let Some(sub) = &metadata.subfolder {
        let _ = writeln!(user, "- Subfolder: {}", sub);
    }
    let _ = writeln!(user, "- Files in scope: {}", metadata.file_count);
    let _ = writeln!(user, "- Files included below: {}", included.len());
    let _ = writeln!(user, "- Total lines: {}", metadata.total_lines);
    if !metadata.type_distribution.is_empty() {
        let types: Vec<String> = metadata
            .type_distribution
            .iter()
            .map(|(ext, n)| format!("{} ({})", ext, n))
            .collect();
        let _ = writeln!(user, "- File types: {}", types.join(", "));
    }

    let _ = writeln!(user, "\nFILES");
    for entry in &included {
        let _ = writeln!(
            user,
            "- {} ({} bytes{})",
            entry.path,
            entry.byte_size,
            if entry.is_truncated { ", truncated" } else { "" }
        );
    }

    let _ = writeln!(user, "\nCONTENTS");
    for entry in &included {
        let _ = writeln!(user, "\n=== FILE: {} ===\n{}", entry.path, entry.content);
    }

    Prompt {
        system: system_instruction(metadata.subfolder.is_some()),
        user,
        included_files: included.len(),
        omitted_files: entries.len() - included.len(),
        content_chars,
    }
}
