pub mod memory;
pub mod snapshot;

use std::path::Path;

use serde::Serialize;

use crate::error::StoreError;
use crate::graph::edge::CodeEdge;
use crate::graph::node::{CodeNode, NodeId, Project, ProjectId};

pub use memory::MemoryStore;

/// Persistence contract for the declaration graph.
///
/// Every write is an upsert, so redelivered batches leave the store unchanged.
pub trait GraphStore: Send + Sync {
    /// Insert nodes, replacing any stored node with the same id.
    fn upsert_nodes(&self, nodes: &[CodeNode]) -> Result<(), StoreError>;

    /// Attach vectors to nodes by id and assign them to `project`.
    /// Ids that are no longer stored are skipped. Returns the number of nodes updated.
    fn set_embeddings(
        &self,
        project: ProjectId,
        vectors: &[(NodeId, Vec<f32>)],
    ) -> Result<usize, StoreError>;

    /// Insert edges keyed by `(source_id, target_id, rel_type)`; existing keys are left alone.
    ///
    /// The batch is rejected as a whole with [`StoreError::MissingEndpoint`] if any edge
    /// references a node that is not stored. Returns the number of new edges.
    fn upsert_edges(&self, edges: &[CodeEdge]) -> Result<usize, StoreError>;

    /// Delete the project's nodes declared in `path`, or anywhere below it when `path` is a
    /// directory, together with every edge touching them. Returns the number of nodes removed.
    fn delete_file_nodes(&self, project: ProjectId, path: &Path) -> Result<usize, StoreError>;

    /// Delete nodes by id together with every edge touching them. Unknown ids are skipped.
    /// Returns the number of nodes removed.
    fn delete_nodes(&self, ids: &[NodeId]) -> Result<usize, StoreError>;

    /// Delete the project record and all of its nodes. Returns the number of nodes removed.
    fn delete_project(&self, project: ProjectId) -> Result<usize, StoreError>;

    fn node(&self, id: NodeId) -> Result<Option<CodeNode>, StoreError>;

    /// Every edge with `id` as source or target.
    fn edges_touching(&self, id: NodeId) -> Result<Vec<CodeEdge>, StoreError>;

    /// All nodes owned by `project`, embedded or not.
    fn project_nodes(&self, project: ProjectId) -> Result<Vec<CodeNode>, StoreError>;

    /// Insert or replace a project record.
    fn save_project(&self, project: &Project) -> Result<(), StoreError>;

    fn project(&self, id: ProjectId) -> Result<Option<Project>, StoreError>;

    fn project_by_name(&self, name: &str) -> Result<Option<Project>, StoreError>;

    fn projects(&self) -> Result<Vec<Project>, StoreError>;

    fn stats(&self) -> Result<StoreStats, StoreError>;
}

/// Store-wide counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub projects: usize,
    pub nodes: usize,
    pub embedded_nodes: usize,
    pub edges: usize,
}
