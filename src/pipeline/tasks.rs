use std::sync::Arc;

use crate::embed::EmbeddingProvider;
use crate::error::{EmbedError, TaskError};
use crate::queue::{IndexTask, TaskHandler};
use crate::store::GraphStore;

/// Executes the queued indexing stages against a store and an embedding provider.
///
/// Both stages are upserts, so replaying a task that already succeeded changes nothing
/// beyond rewriting an equivalent vector.
pub struct IndexTasks<S, E> {
    store: Arc<S>,
    embedder: Arc<E>,
}

impl<S, E> IndexTasks<S, E> {
    pub fn new(store: Arc<S>, embedder: Arc<E>) -> Self {
        Self { store, embedder }
    }
}

impl<S, E> TaskHandler for IndexTasks<S, E>
where
    S: GraphStore + 'static,
    E: EmbeddingProvider + 'static,
{
    async fn handle(&self, task: &IndexTask) -> Result<(), TaskError> {
        match task {
            IndexTask::EmbedNodes { project, nodes } => {
                let texts: Vec<String> = nodes.iter().map(|(_, text)| text.clone()).collect();
                let vectors = self.embedder.embed_batch(&texts).await?;
                if vectors.len() != nodes.len() {
                    return Err(EmbedError::CountMismatch {
                        expected: nodes.len(),
                        got: vectors.len(),
                    }
                    .into());
                }
                let pairs: Vec<_> = nodes
                    .iter()
                    .map(|(id, _)| *id)
                    .zip(vectors)
                    .collect();
                let updated = self.store.set_embeddings(*project, &pairs)?;
                if updated < pairs.len() {
                    tracing::debug!(
                        project = %project,
                        missing = pairs.len() - updated,
                        "embedded nodes were deleted before the vectors arrived"
                    );
                }
                Ok(())
            }
            IndexTask::SaveEdges { edges } => {
                let inserted = self.store.upsert_edges(edges)?;
                tracing::trace!(batch = edges.len(), inserted, "edges saved");
                Ok(())
            }
        }
    }
}
