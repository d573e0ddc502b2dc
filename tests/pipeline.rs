//! End-to-end pipeline behavior with in-test content sources and models.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use repo_analyst::config::{AnalysisConfig, Config, LlmConfig};
use repo_analyst::llm::{DisabledModel, LanguageModel, OpenAiModel};
use repo_analyst::loader::ContentSource;
use repo_analyst::models::ListedFile;
use repo_analyst::prompt::Prompt;
use repo_analyst::sqlite_store::SqliteStore;
use repo_analyst::store::memory::InMemoryStore;
use repo_analyst::store::Store;
use repo_analyst::{db, migrate};
use repo_analyst::{AnalysisError, RepositoryAnalyzer, Stage};

const REPO: &str = "https://github.com/acme/shop";

const GOOD_RESPONSE: &str = r#"{
  "summary": "An online shop backend.",
  "objectives": ["Sell things"],
  "architecture": "Layered service",
  "key_components": [{"name": "orders", "purpose": "order handling", "location": "src/orders"}],
  "tech_stack": ["Python", "Flask"],
  "complexity_score": 5,
  "recommendations": ["Add tests"]
}"#;

/// A repository held in memory. Counts reads so tests can assert laziness.
struct FakeRepo {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    reads: AtomicUsize,
    lists: AtomicUsize,
}

impl FakeRepo {
    fn new(files: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            files: Mutex::new(
                files
                    .iter()
                    .map(|(p, c)| (p.to_string(), c.as_bytes().to_vec()))
                    .collect(),
            ),
            reads: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
        })
    }

    fn write(&self, path: &str, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.as_bytes().to_vec());
    }
}

#[async_trait]
impl ContentSource for FakeRepo {
    fn name(&self) -> &str {
        "fake"
    }

    async fn list_files(&self, _repo_url: &str, _git_ref: &str) -> Result<Vec<ListedFile>, AnalysisError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        // Reverse order: the pipeline must not depend on listing order.
        Ok(self
            .files
            .lock()
            .unwrap()
            .iter()
            .rev()
            .map(|(path, bytes)| ListedFile {
                path: path.clone(),
                size: bytes.len() as u64,
            })
            .collect())
    }

    async fn read_file(&self, repo_url: &str, git_ref: &str, path: &str) -> Result<Vec<u8>, AnalysisError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| AnalysisError::SourceUnavailable {
                repo_url: repo_url.to_string(),
                git_ref: git_ref.to_string(),
                reason: format!("no such file: {}", path),
            })
    }
}

/// Replays scripted responses; the last one repeats.
struct ScriptedModel {
    responses: Mutex<Vec<Result<String, AnalysisError>>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedModel {
    fn replying(text: &str) -> Arc<Self> {
        Self::script(vec![Ok(text.to_string())])
    }

    fn script(responses: Vec<Result<String, AnalysisError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn clone_outcome(outcome: &Result<String, AnalysisError>) -> Result<String, AnalysisError> {
    match outcome {
        Ok(text) => Ok(text.clone()),
        Err(AnalysisError::Authentication(m)) => Err(AnalysisError::Authentication(m.clone())),
        Err(other) => Err(AnalysisError::BackendUnavailable(other.to_string())),
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());
        let mut responses = self.responses.lock().unwrap();
        if responses.len() > 1 {
            responses.remove(0)
        } else {
            clone_outcome(&responses[0])
        }
    }
}

fn shop_repo() -> Arc<FakeRepo> {
    FakeRepo::new(&[
        ("README.md", "# Shop\n\nSells things.\n"),
        ("requirements.txt", "flask\n"),
        ("src/app.py", "from flask import Flask\napp = Flask(__name__)\n"),
        ("src/orders/models.py", "class Order: pass\n"),
        ("src/orders/views.py", "def list_orders(): pass\n"),
        ("node_modules/x/index.js", "module.exports = 1\n"),
        ("static/logo.png", "\u{0}\u{1}"),
    ])
}

fn analyzer(
    repo: Arc<FakeRepo>,
    model: Arc<ScriptedModel>,
    store: Arc<dyn Store>,
) -> RepositoryAnalyzer {
    RepositoryAnalyzer::new(repo, model, store, AnalysisConfig::default()).unwrap()
}

async fn sqlite_store(tmp: &TempDir) -> Arc<SqliteStore> {
    let mut config = Config::default();
    config.db.path = tmp.path().join("analyses.sqlite");
    let pool = db::connect(&config).await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    Arc::new(SqliteStore::new(pool))
}

#[tokio::test]
async fn test_second_call_is_served_from_cache() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    let model = ScriptedModel::replying(GOOD_RESPONSE);
    let a = analyzer(shop_repo(), model.clone(), store.clone());

    let first = a.analyze_repository(REPO, "main", None, false).await.unwrap();
    let second = a.analyze_repository(REPO, "main", None, false).await.unwrap();

    assert_eq!(model.calls(), 1);
    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(first.result, second.result);
    assert_eq!(first.record_id, second.record_id);
    assert_eq!(first.result.summary, "An online shop backend.");
    assert!(first.warning.is_none());

    let history = a.history(Some(REPO), None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].repo_hash, first.repo_hash);
}

#[tokio::test]
async fn test_metadata_describes_the_scope() {
    let model = ScriptedModel::replying(GOOD_RESPONSE);
    let a = analyzer(shop_repo(), model.clone(), Arc::new(InMemoryStore::new()));

    let analysis = a.analyze_repository(REPO, "main", None, false).await.unwrap();
    let meta = &analysis.metadata;
    assert_eq!(meta.file_count, 5);
    assert_eq!(meta.analyzed_files, 5);
    assert_eq!(meta.skipped_files, 0);
    assert_eq!(meta.type_distribution.get(".py"), Some(&3));
    assert_eq!(meta.repo_hash, analysis.repo_hash);
    assert_eq!(analysis.model, "scripted");

    let prompts = model.prompts.lock().unwrap();
    let user = &prompts[0].user;
    assert!(user.find("=== FILE: README.md ===").unwrap() < user.find("=== FILE: src/app.py ===").unwrap());
    assert!(!user.contains("node_modules"));
    assert!(!user.contains("logo.png"));
}

#[tokio::test]
async fn test_force_refresh_calls_backend_and_keeps_one_record() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    let model = ScriptedModel::script(vec![
        Ok(GOOD_RESPONSE.to_string()),
        Ok(GOOD_RESPONSE.replace("An online shop backend.", "A refreshed summary.")),
    ]);
    let a = analyzer(shop_repo(), model.clone(), store.clone());

    let first = a.analyze_repository(REPO, "main", None, false).await.unwrap();
    let refreshed = a.analyze_repository(REPO, "main", None, true).await.unwrap();

    assert_eq!(model.calls(), 2);
    assert!(!refreshed.from_cache);
    assert_eq!(refreshed.record_id, first.record_id);
    assert_eq!(refreshed.result.summary, "A refreshed summary.");

    let stored = store.lookup(&first.repo_hash).await.unwrap().unwrap();
    assert_eq!(stored.result.summary, "A refreshed summary.");
    assert_eq!(a.history(None, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_content_change_produces_new_identity() {
    let repo = shop_repo();
    let model = ScriptedModel::replying(GOOD_RESPONSE);
    let a = analyzer(repo.clone(), model.clone(), Arc::new(InMemoryStore::new()));

    let before = a.analyze_repository(REPO, "main", None, false).await.unwrap();
    repo.write("src/orders/models.py", "class Order:\n    total = 0\n");
    let after = a.analyze_repository(REPO, "main", None, false).await.unwrap();

    assert_ne!(before.repo_hash, after.repo_hash);
    assert_eq!(model.calls(), 2);
    assert_eq!(a.history(Some(REPO), None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_missing_subfolder_fails_before_reading_or_calling() {
    let repo = shop_repo();
    let model = ScriptedModel::replying(GOOD_RESPONSE);
    let a = analyzer(repo.clone(), model.clone(), Arc::new(InMemoryStore::new()));

    let err = a
        .analyze_repository(REPO, "main", Some("src/frontend"), false)
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Validating);
    assert!(!err.backend_contacted());
    assert!(matches!(err.kind(), AnalysisError::ScopeNotFound { .. }));
    assert_eq!(repo.reads.load(Ordering::SeqCst), 0);
    assert_eq!(model.calls(), 0);
    assert!(a.history(None, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_subfolder_scope_is_analyzed_and_stored_separately() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    let model = ScriptedModel::replying(GOOD_RESPONSE);
    let a = analyzer(shop_repo(), model.clone(), store);

    let root = a.analyze_repository(REPO, "main", None, false).await.unwrap();
    let sub = a
        .analyze_repository(REPO, "main", Some("./src/orders/"), false)
        .await
        .unwrap();

    assert_ne!(root.repo_hash, sub.repo_hash);
    assert_eq!(sub.metadata.subfolder.as_deref(), Some("src/orders"));
    assert_eq!(sub.metadata.file_count, 2);
    assert_eq!(model.calls(), 2);

    let prompts = model.prompts.lock().unwrap();
    assert!(prompts[1].system.contains("larger repository"));
    assert!(!prompts[1].user.contains("README.md"));

    let scoped = a.history(Some(REPO), Some("src/orders")).await.unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].id, sub.record_id);
}

#[tokio::test]
async fn test_unparseable_response_is_persisted_with_warning() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    let raw = "Sorry, I could not produce an analysis for this one.";
    let model = ScriptedModel::replying(raw);
    let a = analyzer(shop_repo(), model, store.clone());

    let analysis = a.analyze_repository(REPO, "main", None, false).await.unwrap();
    assert!(analysis.warning.is_some());
    assert_eq!(analysis.result.raw_response, raw);
    assert!(analysis.result.summary.is_empty());

    let stored = store.lookup(&analysis.repo_hash).await.unwrap().unwrap();
    assert_eq!(stored.result.raw_response, raw);

    // Cache hits surface the same warning.
    let again = a.analyze_repository(REPO, "main", None, false).await.unwrap();
    assert!(again.from_cache);
    assert!(again.warning.is_some());
}

#[tokio::test]
async fn test_backend_failure_writes_nothing() {
    let model = ScriptedModel::script(vec![Err(AnalysisError::Authentication(
        "invalid api key".into(),
    ))]);
    let a = analyzer(shop_repo(), model.clone(), Arc::new(InMemoryStore::new()));

    let err = a.analyze_repository(REPO, "main", None, false).await.unwrap_err();
    assert_eq!(err.stage, Stage::CallingBackend);
    assert!(err.backend_contacted());
    assert!(matches!(err.kind(), AnalysisError::Authentication(_)));
    assert_eq!(model.calls(), 1);
    assert!(a.history(None, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_scope_is_rejected_before_backend() {
    let repo = FakeRepo::new(&[
        ("assets/logo.png", "png"),
        ("Makefile", "all:\n"),
        ("vendor/lib/a.go", "package a"),
    ]);
    let model = ScriptedModel::replying(GOOD_RESPONSE);
    let a = analyzer(repo, model.clone(), Arc::new(InMemoryStore::new()));

    let err = a.analyze_repository(REPO, "main", None, false).await.unwrap_err();
    assert_eq!(err.stage, Stage::Prioritizing);
    assert!(matches!(err.kind(), AnalysisError::NoAnalyzableFiles(_)));
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn test_empty_repo_url_is_invalid() {
    let repo = shop_repo();
    let a = analyzer(
        repo.clone(),
        ScriptedModel::replying(GOOD_RESPONSE),
        Arc::new(InMemoryStore::new()),
    );
    let err = a.analyze_repository("  ", "main", None, false).await.unwrap_err();
    assert!(matches!(err.kind(), AnalysisError::InvalidScope(_)));
    assert_eq!(repo.lists.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_export_returns_latest_for_exact_scope() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    let a = analyzer(shop_repo(), ScriptedModel::replying(GOOD_RESPONSE), store);

    let err = a.export_analysis(REPO, None).await.unwrap_err();
    assert!(matches!(err, AnalysisError::NotFound(_)));

    a.analyze_repository(REPO, "main", Some("src"), false).await.unwrap();
    assert!(matches!(
        a.export_analysis(REPO, None).await,
        Err(AnalysisError::NotFound(_))
    ));

    let json = a.export_analysis(REPO, Some("src")).await.unwrap();
    let doc: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(doc["subfolder"], "src");
    assert_eq!(doc["ref"], "main");
    assert_eq!(doc["result"]["summary"], "An online shop backend.");
    assert_eq!(doc["metadata"]["repo_url"], REPO);

    assert!(a.export_analysis_at(REPO, Some("dev"), Some("src")).await.is_err());
    assert!(a.export_analysis_at(REPO, Some("main"), Some("src")).await.is_ok());
}

#[tokio::test]
async fn test_small_file_budget_limits_selection() {
    let mut files: Vec<(String, String)> = (0..40)
        .map(|i| (format!("pkg/mod{}/file{}.py", i % 4, i), format!("x = {}\n", i)))
        .collect();
    files.push(("README.md".into(), "# Big\n".repeat(100)));
    files.push(("package.json".into(), "{}".into()));
    let refs: Vec<(&str, &str)> = files.iter().map(|(p, c)| (p.as_str(), c.as_str())).collect();

    let options = AnalysisConfig {
        max_files: 3,
        max_chars_per_file: 50,
        prompt_char_budget: 1000,
        ..AnalysisConfig::default()
    };
    let model = ScriptedModel::replying(GOOD_RESPONSE);
    let a = RepositoryAnalyzer::new(
        FakeRepo::new(&refs),
        model.clone(),
        Arc::new(InMemoryStore::new()),
        options,
    )
    .unwrap();

    let analysis = a.analyze_repository(REPO, "main", None, false).await.unwrap();
    assert_eq!(analysis.metadata.analyzed_files, 3);
    assert_eq!(analysis.metadata.file_count, 42);

    let prompts = model.prompts.lock().unwrap();
    assert_eq!(prompts[0].included_files, 3);
    assert!(prompts[0].user.contains("=== FILE: README.md ==="));
    assert!(prompts[0].user.contains("=== FILE: package.json ==="));
    assert!(prompts[0].content_chars <= 150);
}

#[tokio::test]
async fn test_eligible_file_below_the_cut_changes_identity() {
    let repo = FakeRepo::new(&[("README.md", "# Shop\n"), ("package.json", "{}")]);
    let options = AnalysisConfig {
        max_files: 1,
        ..AnalysisConfig::default()
    };
    let model = ScriptedModel::replying(GOOD_RESPONSE);
    let a = RepositoryAnalyzer::new(repo.clone(), model.clone(), Arc::new(InMemoryStore::new()), options)
        .unwrap();

    let before = a.analyze_repository(REPO, "main", None, false).await.unwrap();
    assert_eq!(before.metadata.file_count, 2);

    repo.write("src/new.py", "x = 1\n");
    let after = a.analyze_repository(REPO, "main", None, false).await.unwrap();

    assert!(!after.from_cache);
    assert_ne!(before.repo_hash, after.repo_hash);
    assert_eq!(after.metadata.file_count, 3);
    assert_eq!(after.metadata.analyzed_files, 1);
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn test_removed_eligible_file_changes_identity() {
    let repo = shop_repo();
    let options = AnalysisConfig {
        max_files: 2,
        ..AnalysisConfig::default()
    };
    let model = ScriptedModel::replying(GOOD_RESPONSE);
    let a = RepositoryAnalyzer::new(repo.clone(), model.clone(), Arc::new(InMemoryStore::new()), options)
        .unwrap();

    let before = a.analyze_repository(REPO, "main", None, false).await.unwrap();
    repo.files.lock().unwrap().remove("src/orders/views.py");
    let after = a.analyze_repository(REPO, "main", None, false).await.unwrap();

    assert!(!after.from_cache);
    assert_ne!(before.repo_hash, after.repo_hash);
    assert_eq!(before.metadata.file_count, 5);
    assert_eq!(after.metadata.file_count, 4);
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn test_char_limit_change_misses_the_cache() {
    let repo = FakeRepo::new(&[
        ("README.md", "# Shop\n\nSells things to people who want things.\n"),
        ("src/app.py", "app = object()\n"),
    ]);
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let model = ScriptedModel::replying(GOOD_RESPONSE);
    let with_limit = |max_chars_per_file: usize| {
        RepositoryAnalyzer::new(
            repo.clone(),
            model.clone(),
            store.clone(),
            AnalysisConfig {
                max_chars_per_file,
                prompt_char_budget: 10_000,
                ..AnalysisConfig::default()
            },
        )
        .unwrap()
    };

    let wide = with_limit(1000)
        .analyze_repository(REPO, "main", None, false)
        .await
        .unwrap();
    let narrow = with_limit(10)
        .analyze_repository(REPO, "main", None, false)
        .await
        .unwrap();

    assert!(!narrow.from_cache);
    assert_ne!(wide.repo_hash, narrow.repo_hash);
    assert_eq!(model.calls(), 2);

    // No file is long enough for the limit to matter: same request, same record.
    let wider = with_limit(5000)
        .analyze_repository(REPO, "main", None, false)
        .await
        .unwrap();
    assert!(wider.from_cache);
    assert_eq!(wider.repo_hash, wide.repo_hash);
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn test_missing_api_key_fails_before_any_request() {
    let model = Arc::new(OpenAiModel::new(&LlmConfig::default(), None).unwrap());
    let a = RepositoryAnalyzer::new(
        shop_repo(),
        model,
        Arc::new(InMemoryStore::new()),
        AnalysisConfig::default(),
    )
    .unwrap();

    let err = a.analyze_repository(REPO, "main", None, false).await.unwrap_err();
    assert_eq!(err.stage, Stage::Prompting);
    assert!(!err.backend_contacted());
    assert!(matches!(err.kind(), AnalysisError::Authentication(_)));
    assert!(a.history(None, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_disabled_backend_is_never_contacted() {
    let a = RepositoryAnalyzer::new(
        shop_repo(),
        Arc::new(DisabledModel),
        Arc::new(InMemoryStore::new()),
        AnalysisConfig::default(),
    )
    .unwrap();

    let err = a.analyze_repository(REPO, "main", None, false).await.unwrap_err();
    assert_eq!(err.stage, Stage::Prompting);
    assert!(!err.backend_contacted());
    assert!(matches!(err.kind(), AnalysisError::BackendUnavailable(_)));
}
