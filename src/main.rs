use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use repo_analyst::analyze_cmd::{self, AnalyzeRequest};
use repo_analyst::{config, export, history, migrate, stats};

/// repa — prioritized, cached LLM summaries of source repositories.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. When the file does not exist, built-in defaults are used.
#[derive(Parser)]
#[command(
    name = "repa",
    about = "Prioritized, cached LLM summaries of source repositories and their subfolders",
    version,
    long_about = "repa loads a repository (or one subfolder of it), ranks its files by how much \
    they reveal about the project, asks a language model for a structured analysis, and caches \
    the answer keyed by a hash of the analyzed content."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/repa.toml")]
    config: PathBuf,

    /// Override the database path from the config file.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Log debug output to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and schema. Safe to run repeatedly.
    Init,

    /// Analyze a repository, or one subfolder of it.
    ///
    /// `repo_url` is a git remote URL, a local directory, or a `file://` URL.
    /// Unchanged content is answered from the cache unless `--force` is given.
    Analyze {
        repo_url: String,

        /// Branch, tag, or commit to analyze.
        #[arg(long = "ref", default_value = "main")]
        git_ref: String,

        /// Restrict the analysis to this directory (relative to the repo root).
        #[arg(long)]
        subfolder: Option<String>,

        /// Ignore any cached result and call the model again.
        #[arg(long)]
        force: bool,

        #[arg(long)]
        max_files: Option<usize>,

        /// Maximum characters kept from each file.
        #[arg(long)]
        max_chars: Option<usize>,

        #[arg(long)]
        model: Option<String>,

        /// Write the JSON result to this file.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Print the full result as JSON instead of a report.
        #[arg(long)]
        json: bool,
    },

    /// List stored analyses, newest first.
    History {
        /// Only analyses of this repository.
        repo_url: Option<String>,

        #[arg(long)]
        subfolder: Option<String>,
    },

    /// Print (or write) the latest stored analysis of one scope as JSON.
    Export {
        repo_url: String,

        /// Only consider analyses of this ref.
        #[arg(long = "ref")]
        git_ref: Option<String>,

        #[arg(long)]
        subfolder: Option<String>,

        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show database statistics.
    Stats,
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut cfg = config::load_or_default(&cli.config)?;
    if let Some(path) = cli.db_path {
        cfg.db.path = path;
    }

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized at {}.", cfg.db.path.display());
        }
        Commands::Analyze {
            repo_url,
            git_ref,
            subfolder,
            force,
            max_files,
            max_chars,
            model,
            output,
            json,
        } => {
            if let Some(n) = max_files {
                cfg.analysis.max_files = n;
            }
            if let Some(n) = max_chars {
                cfg.analysis.max_chars_per_file = n;
                cfg.analysis.prompt_char_budget = cfg.analysis.prompt_char_budget.max(n);
            }
            if let Some(m) = model {
                cfg.llm.model = m;
            }
            cfg.validate()?;

            analyze_cmd::run_analyze(
                &cfg,
                AnalyzeRequest {
                    repo_url: &repo_url,
                    git_ref: &git_ref,
                    subfolder: subfolder.as_deref(),
                    force_refresh: force,
                    json,
                    output: output.as_deref(),
                },
            )
            .await?;
        }
        Commands::History {
            repo_url,
            subfolder,
        } => {
            history::run_history(&cfg, repo_url.as_deref(), subfolder.as_deref()).await?;
        }
        Commands::Export {
            repo_url,
            git_ref,
            subfolder,
            output,
        } => {
            export::run_export(
                &cfg,
                &repo_url,
                git_ref.as_deref(),
                subfolder.as_deref(),
                output.as_deref(),
            )
            .await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
