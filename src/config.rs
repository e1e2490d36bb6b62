use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE: &str = "code-graph-rag.toml";

/// Configuration loaded from `code-graph-rag.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CodeGraphConfig {
    /// Additional path patterns to exclude from indexing (beyond .gitignore and node_modules).
    pub exclude: Option<Vec<String>>,
    /// Where the CLI keeps its graph snapshot.
    pub store_path: PathBuf,
    pub indexing: IndexingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub git: GitConfig,
}

impl Default for CodeGraphConfig {
    fn default() -> Self {
        Self {
            exclude: None,
            store_path: PathBuf::from(".code-graph-rag/graph.bin"),
            indexing: IndexingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            git: GitConfig::default(),
        }
    }
}

/// Which text of a node is sent to the embedding provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbedInput {
    #[default]
    Identifier,
    Snippet,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Nodes (and edges) per persisted/queued batch.
    pub batch_size: usize,
    /// Concurrent queue workers.
    pub workers: usize,
    /// Delivery attempts per task before it is dead-lettered.
    pub max_attempts: u32,
    /// Base delay of the exponential retry backoff.
    pub backoff_ms: u64,
    /// Per-attempt timeout.
    pub task_timeout_secs: u64,
    /// Capacity of the task channel.
    pub queue_capacity: usize,
    pub embed_input: EmbedInput,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            workers: 4,
            max_attempts: 3,
            backoff_ms: 500,
            task_timeout_secs: 300,
            queue_capacity: 256,
            embed_input: EmbedInput::Identifier,
        }
    }
}

impl IndexingConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// Whether seeds of one request share a visited set during subgraph expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VisitedScope {
    /// One set for the whole request: a node reached by an earlier seed is omitted from later ones.
    #[default]
    Request,
    /// A fresh set per seed: each seed gets its complete neighbourhood.
    Seed,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_n: usize,
    pub min_similarity: f32,
    pub depth: usize,
    /// Upper bound applied to any requested depth.
    pub max_depth: usize,
    /// Hard cap on nodes expanded per request.
    pub max_visited: usize,
    pub visited_scope: VisitedScope,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_n: 5,
            min_similarity: 0.0,
            depth: 1,
            max_depth: 4,
            max_visited: 512,
            visited_scope: VisitedScope::Request,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_owned(),
            model: "nomic-embed-text".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Remote branch polled for new commits.
    pub branch: String,
    /// Directory that receives clones.
    pub clone_dir: PathBuf,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            branch: "main".to_owned(),
            clone_dir: PathBuf::from(".code-graph-rag/repos"),
        }
    }
}

impl CodeGraphConfig {
    /// Load configuration from `code-graph-rag.toml` in the given directory.
    ///
    /// Returns a default configuration if the file does not exist or cannot be parsed.
    pub fn load(dir: &Path) -> Self {
        let config_path = dir.join(CONFIG_FILE);

        if !config_path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => Self::from_toml(&contents).unwrap_or_else(|err| {
                tracing::warn!(path = %config_path.display(), "failed to parse config: {err}. Using defaults.");
                Self::default()
            }),
            Err(err) => {
                tracing::warn!(path = %config_path.display(), "failed to read config: {err}. Using defaults.");
                Self::default()
            }
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}
