//! `repa analyze`: run the pipeline for one scope and print the result.
//!
//! Output is a human-readable report by default, or the full [`Analysis`]
//! as JSON with `--json`. `--output` writes the JSON to a file instead.

use anyhow::Result;
use std::fmt::Write;
use std::path::Path;

use crate::analyzer::{Analysis, RepositoryAnalyzer};
use crate::config::Config;
use crate::export::write_output;

/// Options for [`run_analyze`], mirroring the CLI flags.
#[derive(Debug, Clone)]
pub struct AnalyzeRequest<'a> {
    pub repo_url: &'a str,
    pub git_ref: &'a str,
    pub subfolder: Option<&'a str>,
    pub force_refresh: bool,
    pub json: bool,
    pub output: Option<&'a Path>,
}

pub async fn run_analyze(config: &Config, request: AnalyzeRequest<'_>) -> Result<()> {
    let analyzer = RepositoryAnalyzer::open(config).await?;
    let analysis = analyzer
        .analyze_repository(
            request.repo_url,
            request.git_ref,
            request.subfolder,
            request.force_refresh,
        )
        .await?;

    if request.json || request.output.is_some() {
        let json = serde_json::to_string_pretty(&analysis)?;
        write_output(&json, request.output)?;
        if let Some(path) = request.output {
            eprintln!("Wrote analysis to {}", path.display());
        }
    } else {
        print!("{}", render_report(&analysis));
    }
    Ok(())
}

/// Plain-text rendering of an analysis for the terminal.
pub fn render_report(analysis: &Analysis) -> String {
    let meta = &analysis.metadata;
    let result = &analysis.result;
    let mut out = String::new();

    let _ = write!(out, "{} @ {}", meta.repo_url, meta.git_ref);
    if let Some(sub) = &meta.subfolder {
        let _ = write!(out, " [{}]", sub);
    }
    let _ = writeln!(
        out,
        "\n  {} of {} files analyzed, {} lines, model {}{}",
        meta.analyzed_files,
        meta.file_count,
        meta.total_lines,
        analysis.model,
        if analysis.from_cache { " (cached)" } else { "" }
    );

    if let Some(warning) = &analysis.warning {
        let _ = writeln!(out, "  warning: {}", warning);
    }

    if !result.summary.is_empty() {
        let _ = writeln!(out, "\nSummary\n  {}", result.summary);
    }
    if !result.architecture.is_empty() {
        let _ = writeln!(out, "\nArchitecture\n  {}", result.architecture);
    }
    push_list(&mut out, "Objectives", &result.objectives);

    if !result.key_components.is_empty() {
        let _ = writeln!(out, "\nKey components");
        for c in &result.key_components {
            let _ = write!(out, "  - {}", c.name);
            if let Some(loc) = &c.location {
                let _ = write!(out, " ({})", loc);
            }
            if !c.purpose.is_empty() {
                let _ = write!(out, ": {}", c.purpose);
            }
            out.push('\n');
        }
    }

    if !result.tech_stack.is_empty() {
        let _ = writeln!(out, "\nTech stack\n  {}", result.tech_stack.join(", "));
    }
    if let Some(score) = result.complexity_score {
        let _ = writeln!(out, "\nComplexity: {}/10", score);
    }
    push_list(&mut out, "Recommendations", &result.recommendations);

    if analysis.warning.is_some() && result.summary.is_empty() {
        let _ = writeln!(out, "\nRaw response\n{}", result.raw_response);
    }

    out
}

fn push_list(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n{}", title);
    for item in items {
        let _ = writeln!(out, "  - {}", item);
    }
}
