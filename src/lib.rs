//! # repo-analyst
//!
//! Prioritized, cached LLM summaries of source repositories and their
//! subfolders.
//!
//! Given a repository URL, a ref, and optionally a subfolder, the analyzer
//! loads the tree, ranks files by how much they reveal about the project,
//! sends the most informative ones to a language model, parses the structured
//! answer, and stores it keyed by a hash of the inputs. Asking again about
//! unchanged content is answered from the store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────┐   ┌──────────┐
//! │  Git / FS   │──▶│ Load + Rank  │──▶│  Prompt +  │──▶│  SQLite   │
//! │  sources    │   │  + Identity  │   │  LLM call  │   │  cache    │
//! └─────────────┘   └──────────────┘   └────────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! repa init
//! repa analyze https://github.com/rust-lang/log --ref master
//! repa analyze https://github.com/o/monorepo --subfolder services/api
//! repa history
//! repa export https://github.com/rust-lang/log --output log.json
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`analyzer`] | The pipeline: analyze, export, history |
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy and pipeline stages |
//! | [`loader`] | Content source trait, exclusions, text decoding |
//! | [`connector_git`] | Git source pinned to a fetched commit |
//! | [`connector_fs`] | Local directory source |
//! | [`sources`] | Source routing by URL |
//! | [`prioritize`] | File tiering, selection, truncation |
//! | [`identity`] | Content-derived cache key |
//! | [`store`] | Storage trait and in-memory store |
//! | [`sqlite_store`] | SQLite store |
//! | [`prompt`] | Prompt construction |
//! | [`llm`] | Model backends with retry/backoff |
//! | [`parse`] | Response parsing with graceful degradation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod analyze_cmd;
pub mod analyzer;
pub mod config;
pub mod connector_fs;
pub mod connector_git;
pub mod db;
pub mod error;
pub mod export;
pub mod history;
pub mod identity;
pub mod llm;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod parse;
pub mod prioritize;
pub mod prompt;
pub mod sources;
pub mod sqlite_store;
pub mod stats;
pub mod store;

pub use analyzer::{Analysis, RepositoryAnalyzer};
pub use error::{AnalysisError, PipelineError, Stage};
