/// End-to-end tests: index -> retrieve -> poll through the library API with in-memory fakes
/// for the embedding provider and git, plus a few CLI runs of the compiled binary.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use code_graph_rag::config::CodeGraphConfig;
use code_graph_rag::embed::EmbeddingProvider;
use code_graph_rag::error::{EmbedError, GitError, StoreError};
use code_graph_rag::git::GitRemote;
use code_graph_rag::graph::edge::{CodeEdge, RelType};
use code_graph_rag::graph::node::{CodeNode, DeclarationKind, NodeId, Project, ProjectId};
use code_graph_rag::pipeline::{Indexer, PollOutcome};
use code_graph_rag::retrieval::{RetrievalRequest, Retriever};
use code_graph_rag::store::{GraphStore, MemoryStore, StoreStats};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Known texts map to fixed vectors; everything else to `fallback`.
struct Vocabulary {
    vectors: HashMap<&'static str, Vec<f32>>,
    fallback: Vec<f32>,
}

impl Vocabulary {
    fn new() -> Self {
        let vectors = HashMap::from([
            ("UserService", vec![1.0, 0.0, 0.0]),
            ("user service", vec![1.0, 0.0, 0.0]),
            ("findUser", vec![0.0, 1.0, 0.0]),
        ]);
        Self {
            vectors,
            fallback: vec![0.0, 0.0, 1.0],
        }
    }
}

impl EmbeddingProvider for Vocabulary {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts
            .iter()
            .map(|t| {
                self.vectors
                    .get(t.as_str())
                    .unwrap_or(&self.fallback)
                    .clone()
            })
            .collect())
    }

    fn name(&self) -> &str {
        "vocabulary"
    }
}

#[derive(Default)]
struct ScriptedGit {
    head: Mutex<String>,
    changed: Mutex<Vec<PathBuf>>,
    diffs: AtomicUsize,
}

impl ScriptedGit {
    fn at(head: &str) -> Self {
        let git = Self::default();
        *git.head.lock().unwrap() = head.to_owned();
        git
    }

    fn push(&self, head: &str, changed: &[&str]) {
        *self.head.lock().unwrap() = head.to_owned();
        *self.changed.lock().unwrap() = changed.iter().map(PathBuf::from).collect();
    }
}

impl GitRemote for ScriptedGit {
    async fn clone_repo(&self, _url: &str, _dest: &Path) -> Result<String, GitError> {
        Ok(self.head.lock().unwrap().clone())
    }

    async fn fetch_head(&self, _repo: &Path) -> Result<String, GitError> {
        Ok(self.head.lock().unwrap().clone())
    }

    async fn diff_files(&self, _repo: &Path, _from: &str, _to: &str) -> Result<Vec<PathBuf>, GitError> {
        self.diffs.fetch_add(1, Ordering::SeqCst);
        Ok(self.changed.lock().unwrap().clone())
    }

    async fn checkout(&self, _repo: &Path, _commit: &str) -> Result<(), GitError> {
        Ok(())
    }
}

/// Delegates to a [`MemoryStore`] and counts every mutating call.
#[derive(Default)]
struct CountingStore {
    inner: MemoryStore,
    writes: AtomicUsize,
}

impl CountingStore {
    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn wrote(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

impl GraphStore for CountingStore {
    fn upsert_nodes(&self, nodes: &[CodeNode]) -> Result<(), StoreError> {
        self.wrote();
        self.inner.upsert_nodes(nodes)
    }

    fn set_embeddings(
        &self,
        project: ProjectId,
        vectors: &[(NodeId, Vec<f32>)],
    ) -> Result<usize, StoreError> {
        self.wrote();
        self.inner.set_embeddings(project, vectors)
    }

    fn upsert_edges(&self, edges: &[CodeEdge]) -> Result<usize, StoreError> {
        self.wrote();
        self.inner.upsert_edges(edges)
    }

    fn delete_file_nodes(&self, project: ProjectId, path: &Path) -> Result<usize, StoreError> {
        self.wrote();
        self.inner.delete_file_nodes(project, path)
    }

    fn delete_nodes(&self, ids: &[NodeId]) -> Result<usize, StoreError> {
        self.wrote();
        self.inner.delete_nodes(ids)
    }

    fn delete_project(&self, project: ProjectId) -> Result<usize, StoreError> {
        self.wrote();
        self.inner.delete_project(project)
    }

    fn node(&self, id: NodeId) -> Result<Option<CodeNode>, StoreError> {
        self.inner.node(id)
    }

    fn edges_touching(&self, id: NodeId) -> Result<Vec<CodeEdge>, StoreError> {
        self.inner.edges_touching(id)
    }

    fn project_nodes(&self, project: ProjectId) -> Result<Vec<CodeNode>, StoreError> {
        self.inner.project_nodes(project)
    }

    fn save_project(&self, project: &Project) -> Result<(), StoreError> {
        self.wrote();
        self.inner.save_project(project)
    }

    fn project(&self, id: ProjectId) -> Result<Option<Project>, StoreError> {
        self.inner.project(id)
    }

    fn project_by_name(&self, name: &str) -> Result<Option<Project>, StoreError> {
        self.inner.project_by_name(name)
    }

    fn projects(&self) -> Result<Vec<Project>, StoreError> {
        self.inner.projects()
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        self.inner.stats()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn write(dir: &Path, name: &str, contents: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

/// A two-file TypeScript project: a service class and a module that uses and extends it.
fn fixture(dir: &Path) -> PathBuf {
    let repo = dir.join("repo");
    write(
        &repo,
        "src/user.ts",
        "export class UserService {\n  findUser(id: string) {\n    return id;\n  }\n}\n",
    );
    write(
        &repo,
        "src/app.ts",
        "import { UserService } from './user';\n\
         const service = new UserService();\n\
         export class AdminService extends UserService {}\n",
    );
    repo
}

fn test_config(dir: &Path) -> CodeGraphConfig {
    let mut config = CodeGraphConfig::default();
    config.indexing.batch_size = 3;
    config.indexing.backoff_ms = 1;
    config.git.clone_dir = dir.join("clones");
    config
}

struct Harness {
    store: Arc<CountingStore>,
    embedder: Arc<Vocabulary>,
    indexer: Indexer<CountingStore, ScriptedGit>,
    config: CodeGraphConfig,
}

fn harness(dir: &Path, head: &str) -> Harness {
    let store = Arc::new(CountingStore::default());
    let embedder = Arc::new(Vocabulary::new());
    let config = test_config(dir);
    let indexer = Indexer::new(
        Arc::clone(&store),
        Arc::clone(&embedder),
        ScriptedGit::at(head),
        config.clone(),
    );
    Harness {
        store,
        embedder,
        indexer,
        config,
    }
}

fn node_names(store: &CountingStore, project: ProjectId) -> Vec<String> {
    let mut names: Vec<String> = store
        .project_nodes(project)
        .unwrap()
        .into_iter()
        .map(|n| n.identifier_name)
        .collect();
    names.sort();
    names
}

// ---------------------------------------------------------------------------
// Library: index -> retrieve -> poll
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_index_then_retrieve() {
    let dir = tempfile::tempdir().unwrap();
    let repo = fixture(dir.path());
    let h = harness(dir.path(), "c1");
    let project = Project::new("demo").with_local_path(&repo);

    let report = h.indexer.index_folder(&project, &repo).await.unwrap();
    h.indexer.flush().await;
    assert_eq!(report.files_parsed, 2);
    assert!(h.indexer.dead_letters().is_empty());

    let stats = h.store.stats().unwrap();
    assert_eq!(stats.nodes, report.nodes);
    assert_eq!(stats.embedded_nodes, report.nodes);
    assert_eq!(stats.edges, report.edges);

    let retriever = Retriever::new(
        Arc::clone(&h.store),
        Arc::clone(&h.embedder),
        h.config.retrieval.clone(),
    );
    let response = retriever
        .retrieve(
            "user service",
            project.id,
            RetrievalRequest {
                top_n: 1,
                min_similarity: 0.5,
                depth: 1,
            },
        )
        .await
        .unwrap();

    assert_eq!(response.results.len(), 1);
    let hit = &response.results[0].payload;
    assert_eq!(hit.title, "UserService");
    assert_eq!(hit.declaration_kind, DeclarationKind::Class);
    assert_eq!(hit.file_path, Path::new("src/user.ts"));

    let usages = hit.context.usages.as_ref().unwrap();
    assert!(usages.iter().any(|u| u.code_snippet == "const service = new UserService();"));
    assert!(usages.iter().any(|u| u.subclass_node_id.is_some()));

    let mut rels: Vec<RelType> = hit.neighbours.iter().map(|n| n.rel_type).collect();
    rels.sort_by_key(|r| r.to_string());
    assert_eq!(rels, vec![RelType::Method, RelType::Subclass]);
    assert!(hit.neighbours.iter().all(|n| n.node.context.usages.is_none()));
}

#[tokio::test]
async fn test_poll_at_same_head_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let repo = fixture(dir.path());
    let h = harness(dir.path(), "c1");
    let mut project = Project::new("demo").with_local_path(&repo);
    project.last_processed_commit = Some("c1".to_owned());
    h.indexer.index_folder(&project, &repo).await.unwrap();
    h.indexer.flush().await;

    let writes = h.store.writes();
    let before = h.store.stats().unwrap();
    let outcome = h.indexer.poll_for_changes(project.id).await.unwrap();
    h.indexer.flush().await;

    assert!(matches!(outcome, PollOutcome::UpToDate { .. }));
    assert_eq!(h.indexer.git().diffs.load(Ordering::SeqCst), 0);
    assert_eq!(h.store.writes(), writes);
    assert_eq!(h.store.stats().unwrap(), before);
}

#[tokio::test]
async fn test_poll_reindexes_changed_and_deleted_files() {
    let dir = tempfile::tempdir().unwrap();
    let repo = fixture(dir.path());
    let h = harness(dir.path(), "c1");
    let mut project = Project::new("demo").with_local_path(&repo);
    project.last_processed_commit = Some("c1".to_owned());
    h.indexer.index_folder(&project, &repo).await.unwrap();
    h.indexer.flush().await;
    assert!(node_names(&h.store, project.id).contains(&"AdminService".to_owned()));

    write(
        &repo,
        "src/user.ts",
        "export class UserService {\n  findUser(id: string) {}\n  removeUser(id: string) {}\n}\n",
    );
    fs::remove_file(repo.join("src/app.ts")).unwrap();
    h.indexer.git().push("c2", &["src/user.ts", "src/app.ts"]);

    let outcome = h.indexer.poll_for_changes(project.id).await.unwrap();
    h.indexer.flush().await;

    let PollOutcome::Reindexed {
        changed_files,
        report,
        ..
    } = outcome
    else {
        panic!("expected a re-index");
    };
    assert_eq!(changed_files, 2);
    assert_eq!(report.files_parsed, 1);
    assert!(h.indexer.dead_letters().is_empty());

    assert_eq!(
        node_names(&h.store, project.id),
        vec!["UserService", "findUser", "id", "id", "removeUser"]
    );
    let stored = h.store.project(project.id).unwrap().unwrap();
    assert_eq!(stored.last_processed_commit.as_deref(), Some("c2"));

    let stats = h.store.stats().unwrap();
    assert_eq!(stats.embedded_nodes, stats.nodes);
    assert_eq!(stats.edges, 4);
}

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_code-graph-rag"))
}

/// Working directory with a config that points embeddings at a closed port and never retries.
fn cli_workdir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "code-graph-rag.toml",
        "store_path = \"state/graph.bin\"\n\
         [indexing]\nmax_attempts = 1\nbackoff_ms = 1\n\
         [embedding]\nbase_url = \"http://127.0.0.1:9\"\n",
    );
    dir
}

/// Run a code-graph-rag command in `cwd` and assert it exits successfully. Returns stdout.
fn run_success(cwd: &Path, args: &[&str]) -> String {
    let out = Command::new(binary())
        .current_dir(cwd)
        .args(args)
        .output()
        .expect("failed to invoke code-graph-rag binary");
    let stdout = String::from_utf8_lossy(&out.stdout).to_string();
    let stderr = String::from_utf8_lossy(&out.stderr).to_string();
    assert!(
        out.status.success(),
        "command {:?} failed with status {:?}\nstdout: {}\nstderr: {}",
        args,
        out.status,
        stdout,
        stderr
    );
    stdout
}

/// Run a code-graph-rag command in `cwd` and assert it fails. Returns stderr.
fn run_failure(cwd: &Path, args: &[&str]) -> String {
    let out = Command::new(binary())
        .current_dir(cwd)
        .args(args)
        .output()
        .expect("failed to invoke code-graph-rag binary");
    assert!(
        !out.status.success(),
        "command {:?} expected to fail but exited successfully",
        args
    );
    String::from_utf8_lossy(&out.stderr).to_string()
}

#[test]
fn test_cli_stats_on_empty_store() {
    let cwd = cli_workdir();
    let stdout = run_success(cwd.path(), &["stats", "--json"]);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("stats --json is not JSON");
    assert_eq!(parsed["projects"], serde_json::json!([]));
    assert_eq!(parsed["stats"]["nodes"], 0);
}

#[test]
fn test_cli_index_persists_snapshot_without_embeddings() {
    let cwd = cli_workdir();
    let repo = fixture(cwd.path());
    let repo_arg = repo.to_str().unwrap();

    let stdout = run_success(cwd.path(), &["index", "--json", "--name", "demo", repo_arg]);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("index --json is not JSON");
    assert_eq!(parsed["project"]["name"], "demo");
    assert_eq!(parsed["report"]["files_parsed"], 2);
    assert!(cwd.path().join("state/graph.bin").exists());

    let stats: serde_json::Value =
        serde_json::from_str(&run_success(cwd.path(), &["stats", "--json"])).unwrap();
    assert_eq!(stats["projects"][0]["name"], "demo");
    assert!(stats["stats"]["nodes"].as_u64().unwrap() > 0);
    assert!(stats["stats"]["edges"].as_u64().unwrap() > 0);
    // The provider is unreachable, so nothing was embedded.
    assert_eq!(stats["stats"]["embedded_nodes"], 0);
}

#[test]
fn test_cli_query_unknown_project_fails() {
    let cwd = cli_workdir();
    let stderr = run_failure(cwd.path(), &["query", "nope", "anything"]);
    assert!(stderr.contains("no project named"), "stderr: {stderr}");
}
