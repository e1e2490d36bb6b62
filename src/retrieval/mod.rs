//! Retrieval engine: semantic top-N search over a project's nodes, each hit expanded into
//! its neighbourhood.

pub mod expand;
pub mod topn;

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::config::{EmbedInput, RetrievalConfig};
use crate::embed::EmbeddingProvider;
use crate::error::{EmbedError, RetrievalError};
use crate::graph::node::{CodeNode, ProjectId};
use crate::store::GraphStore;

pub use expand::{Expansion, Neighbour, NodeContext, NodePayload};
pub use topn::{cosine_similarity, select_top_n};

/// Nodes embedded per provider call while backfilling missing vectors.
const BACKFILL_BATCH: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResponse {
    pub elapsed_ms: u64,
    pub results: Vec<RetrievedNode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievedNode {
    pub similarity: f32,
    #[serde(flatten)]
    pub payload: NodePayload,
}

/// Parameters of one [`Retriever::retrieve`] call.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalRequest {
    pub top_n: usize,
    pub min_similarity: f32,
    pub depth: usize,
}

impl From<&RetrievalConfig> for RetrievalRequest {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            top_n: config.top_n,
            min_similarity: config.min_similarity,
            depth: config.depth,
        }
    }
}

pub struct Retriever<S, E> {
    store: Arc<S>,
    embedder: Arc<E>,
    config: RetrievalConfig,
    embed_input: EmbedInput,
}

impl<S, E> Retriever<S, E>
where
    S: GraphStore,
    E: EmbeddingProvider,
{
    pub fn new(store: Arc<S>, embedder: Arc<E>, config: RetrievalConfig) -> Self {
        Self {
            store,
            embedder,
            config,
            embed_input: EmbedInput::default(),
        }
    }

    /// Text used when backfilling vectors; must match what the indexing pipeline embeds.
    pub fn with_embed_input(mut self, embed_input: EmbedInput) -> Self {
        self.embed_input = embed_input;
        self
    }

    /// Find the nodes of `project` most similar to `query` and expand each one.
    ///
    /// `depth` is clamped to the configured maximum. Nodes still waiting for their embedding
    /// are embedded on the spot and the vectors persisted.
    pub async fn retrieve(
        &self,
        query: &str,
        project: ProjectId,
        request: RetrievalRequest,
    ) -> Result<RetrievalResponse, RetrievalError> {
        let started = Instant::now();
        if self.store.project(project)?.is_none() {
            return Err(RetrievalError::ProjectNotFound(project));
        }

        let query_vector = self.embedder.embed(query).await?;
        let candidates = self.candidates(project).await?;

        let scored = candidates.into_iter().filter_map(|node| {
            let embedding = node.embedding.as_deref()?;
            if embedding.len() != query_vector.len() {
                tracing::warn!(
                    node = %node.id,
                    expected = query_vector.len(),
                    got = embedding.len(),
                    "skipping node with mismatched embedding dimensions"
                );
                return None;
            }
            Some((cosine_similarity(&query_vector, embedding), node))
        });
        let seeds: Vec<(f32, CodeNode)> = select_top_n(scored, request.top_n)
            .into_iter()
            .filter(|(similarity, _)| *similarity >= request.min_similarity)
            .collect();

        let depth = request.depth.min(self.config.max_depth);
        let mut expansion = Expansion::new(
            self.store.as_ref(),
            self.config.visited_scope,
            self.config.max_visited,
        );
        let mut results = Vec::with_capacity(seeds.len());
        for (similarity, seed) in seeds {
            if let Some(payload) = expansion.expand_seed(seed, depth)? {
                results.push(RetrievedNode {
                    similarity,
                    payload,
                });
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(
            %project,
            results = results.len(),
            expanded = expansion.expanded(),
            elapsed_ms,
            "retrieval finished"
        );
        Ok(RetrievalResponse {
            elapsed_ms,
            results,
        })
    }

    /// All of the project's nodes, with missing embeddings filled in.
    async fn candidates(&self, project: ProjectId) -> Result<Vec<CodeNode>, RetrievalError> {
        let mut nodes = self.store.project_nodes(project)?;
        let missing: Vec<usize> = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.is_embedded())
            .map(|(i, _)| i)
            .collect();
        if missing.is_empty() {
            return Ok(nodes);
        }

        tracing::debug!(%project, count = missing.len(), "backfilling embeddings");
        for batch in missing.chunks(BACKFILL_BATCH) {
            let texts: Vec<String> = batch
                .iter()
                .map(|&i| match self.embed_input {
                    EmbedInput::Identifier => nodes[i].identifier_name.clone(),
                    EmbedInput::Snippet => nodes[i].code_snippet.clone(),
                })
                .collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(EmbedError::CountMismatch {
                    expected: batch.len(),
                    got: vectors.len(),
                }
                .into());
            }
            let pairs: Vec<_> = batch
                .iter()
                .map(|&i| nodes[i].id)
                .zip(vectors)
                .collect();
            self.store.set_embeddings(project, &pairs)?;
            for (&i, (_, vector)) in batch.iter().zip(pairs) {
                nodes[i].embedding = Some(vector);
            }
        }
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::embed::fake::FixedEmbedder;
    use crate::graph::edge::{CodeEdge, RelType};
    use crate::graph::node::{DeclarationKind, Project, UsagePoint};
    use crate::store::MemoryStore;

    fn request(top_n: usize, min_similarity: f32, depth: usize) -> RetrievalRequest {
        RetrievalRequest {
            top_n,
            min_similarity,
            depth,
        }
    }

    fn stored(store: &MemoryStore, project: &Project, name: &str, vector: Option<Vec<f32>>) -> CodeNode {
        let mut node = CodeNode::new(name, DeclarationKind::Class, "src/a.ts", format!("class {name} {{}}"));
        node.project_id = Some(project.id);
        node.embedding = vector;
        node.usages.push(UsagePoint {
            file_path: "src/b.ts".into(),
            code_snippet: format!("new {name}();"),
            subclass_node_id: None,
        });
        store.upsert_nodes(std::slice::from_ref(&node)).unwrap();
        node
    }

    fn fixture() -> (Arc<MemoryStore>, Project) {
        let store = Arc::new(MemoryStore::new());
        let project = Project::new("demo");
        store.save_project(&project).unwrap();
        (store, project)
    }

    #[tokio::test]
    async fn test_top_hit_with_two_edges() {
        let (store, project) = fixture();
        let foo = stored(&store, &project, "Foo", Some(vec![1.0, 0.0]));
        let left = stored(&store, &project, "Left", Some(vec![0.0, 1.0]));
        let right = stored(&store, &project, "Right", Some(vec![0.0, 1.0]));
        store
            .upsert_edges(&[
                CodeEdge::new(foo.id, left.id, RelType::Method),
                CodeEdge::new(right.id, foo.id, RelType::Subclass),
            ])
            .unwrap();

        let embedder = Arc::new(FixedEmbedder::new(vec![0.0, 1.0]).with("foo", vec![1.0, 0.0]));
        let retriever = Retriever::new(Arc::clone(&store), embedder, RetrievalConfig::default());
        let response = retriever
            .retrieve("foo", project.id, request(1, 0.5, 1))
            .await
            .unwrap();

        assert_eq!(response.results.len(), 1);
        let hit = &response.results[0];
        assert_eq!(hit.payload.title, "Foo");
        assert!((hit.similarity - 1.0).abs() < 1e-6);
        assert_eq!(hit.payload.context.usages.as_ref().map(Vec::len), Some(1));
        assert_eq!(hit.payload.neighbours.len(), 2);
        assert!(
            hit.payload
                .neighbours
                .iter()
                .all(|n| n.node.context.usages.is_none() && n.node.neighbours.is_empty())
        );
    }

    #[tokio::test]
    async fn test_min_similarity_and_ordering() {
        let (store, project) = fixture();
        stored(&store, &project, "Close", Some(vec![0.9, 0.1]));
        stored(&store, &project, "Exact", Some(vec![1.0, 0.0]));
        stored(&store, &project, "Opposite", Some(vec![-1.0, 0.0]));
        stored(&store, &project, "Wide", Some(vec![1.0, 0.0, 0.0]));

        let embedder = Arc::new(FixedEmbedder::new(vec![1.0, 0.0]));
        let retriever = Retriever::new(Arc::clone(&store), embedder, RetrievalConfig::default());
        let response = retriever
            .retrieve("anything", project.id, request(10, 0.0, 0))
            .await
            .unwrap();

        let titles: Vec<&str> = response
            .results
            .iter()
            .map(|r| r.payload.title.as_str())
            .collect();
        assert_eq!(titles, vec!["Exact", "Close"]);
    }

    #[tokio::test]
    async fn test_missing_embeddings_are_backfilled() {
        let (store, project) = fixture();
        let pending = stored(&store, &project, "Pending", None);

        let embedder = Arc::new(FixedEmbedder::new(vec![1.0, 0.0]));
        let retriever = Retriever::new(Arc::clone(&store), Arc::clone(&embedder), RetrievalConfig::default());
        let response = retriever
            .retrieve("pending", project.id, request(5, 0.0, 1))
            .await
            .unwrap();

        assert_eq!(response.results.len(), 1);
        assert!(store.node(pending.id).unwrap().unwrap().is_embedded());
        // One call for the query, one for the backfill batch.
        assert_eq!(embedder.batches.load(Ordering::SeqCst), 2);
    }

    /// Answers every batch with a single vector.
    struct SingleVector;

    impl EmbeddingProvider for SingleVector {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Ok(vec![vec![1.0, 0.0]; texts.len().min(1)])
        }

        fn name(&self) -> &str {
            "single"
        }
    }

    #[tokio::test]
    async fn test_short_backfill_reply_is_an_error() {
        let (store, project) = fixture();
        let first = stored(&store, &project, "First", None);
        let second = stored(&store, &project, "Second", None);

        let retriever = Retriever::new(Arc::clone(&store), Arc::new(SingleVector), RetrievalConfig::default());
        let err = retriever
            .retrieve("first", project.id, request(5, 0.0, 0))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RetrievalError::Embed(EmbedError::CountMismatch { expected: 2, got: 1 })
        ));
        assert!(!store.node(first.id).unwrap().unwrap().is_embedded());
        assert!(!store.node(second.id).unwrap().unwrap().is_embedded());
    }

    #[tokio::test]
    async fn test_empty_project_and_unknown_project() {
        let (store, project) = fixture();
        let retriever = Retriever::new(
            Arc::clone(&store),
            Arc::new(FixedEmbedder::new(vec![1.0])),
            RetrievalConfig::default(),
        );
        let response = retriever
            .retrieve("x", project.id, request(5, 0.0, 1))
            .await
            .unwrap();
        assert!(response.results.is_empty());

        let unknown = uuid::Uuid::new_v4();
        let err = retriever
            .retrieve("x", unknown, request(5, 0.0, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::ProjectNotFound(id) if id == unknown));
    }

    #[tokio::test]
    async fn test_depth_is_clamped() {
        let (store, project) = fixture();
        let a = stored(&store, &project, "A", Some(vec![1.0]));
        let b = stored(&store, &project, "B", Some(vec![1.0]));
        let c = stored(&store, &project, "C", Some(vec![1.0]));
        store
            .upsert_edges(&[
                CodeEdge::new(a.id, b.id, RelType::Method),
                CodeEdge::new(b.id, c.id, RelType::Parameter),
            ])
            .unwrap();

        let config = RetrievalConfig {
            max_depth: 1,
            ..RetrievalConfig::default()
        };
        let retriever = Retriever::new(Arc::clone(&store), Arc::new(FixedEmbedder::new(vec![1.0])), config);
        let response = retriever
            .retrieve("a", project.id, request(1, 0.0, 50))
            .await
            .unwrap();

        let top = &response.results[0].payload;
        assert_eq!(top.title, "A");
        assert_eq!(top.walk().len(), 2);
    }
}
