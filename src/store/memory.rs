use std::collections::HashMap;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;

use super::{GraphStore, StoreStats};
use crate::error::StoreError;
use crate::graph::edge::{CodeEdge, RelType};
use crate::graph::node::{CodeNode, NodeId, Project, ProjectId};

#[derive(Default)]
struct Inner {
    /// Node arena. Removing a node drops every edge touching it.
    graph: StableGraph<CodeNode, RelType>,
    /// Maps node ids to their arena index for O(1) lookup.
    index: HashMap<NodeId, NodeIndex>,
    projects: HashMap<ProjectId, Project>,
}

impl Inner {
    fn nodes(&self) -> impl Iterator<Item = &CodeNode> + '_ {
        self.graph.node_indices().map(|i| &self.graph[i])
    }

    fn edge_at(&self, source: NodeIndex, target: NodeIndex, rel_type: RelType) -> CodeEdge {
        CodeEdge::new(self.graph[source].id, self.graph[target].id, rel_type)
    }

    fn remove_where(&mut self, pred: impl Fn(&CodeNode) -> bool) -> usize {
        let doomed: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&i| pred(&self.graph[i]))
            .collect();
        for idx in &doomed {
            if let Some(node) = self.graph.remove_node(*idx) {
                self.index.remove(&node.id);
            }
        }
        doomed.len()
    }
}

/// In-process [`GraphStore`] over a petgraph `StableGraph`.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    /// Copy out every project, node and edge.
    pub fn export(&self) -> Result<(Vec<Project>, Vec<CodeNode>, Vec<CodeEdge>), StoreError> {
        let inner = self.read()?;
        let projects = inner.projects.values().cloned().collect();
        let nodes = inner.nodes().cloned().collect();
        let edges = inner
            .graph
            .edge_indices()
            .filter_map(|e| {
                let (source, target) = inner.graph.edge_endpoints(e)?;
                Some(inner.edge_at(source, target, inner.graph[e]))
            })
            .collect();
        Ok((projects, nodes, edges))
    }

    /// Rebuild a store from exported parts.
    pub fn from_parts(
        projects: Vec<Project>,
        nodes: Vec<CodeNode>,
        edges: Vec<CodeEdge>,
    ) -> Result<Self, StoreError> {
        let store = Self::new();
        for project in &projects {
            store.save_project(project)?;
        }
        store.upsert_nodes(&nodes)?;
        store.upsert_edges(&edges)?;
        Ok(store)
    }
}

impl GraphStore for MemoryStore {
    fn upsert_nodes(&self, nodes: &[CodeNode]) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        for node in nodes {
            match inner.index.get(&node.id).copied() {
                Some(idx) => inner.graph[idx] = node.clone(),
                None => {
                    let idx = inner.graph.add_node(node.clone());
                    inner.index.insert(node.id, idx);
                }
            }
        }
        Ok(())
    }

    fn set_embeddings(
        &self,
        project: ProjectId,
        vectors: &[(NodeId, Vec<f32>)],
    ) -> Result<usize, StoreError> {
        let mut inner = self.write()?;
        let mut updated = 0;
        for (id, vector) in vectors {
            let Some(idx) = inner.index.get(id).copied() else {
                tracing::debug!(%id, "embedding for a node that is no longer stored");
                continue;
            };
            let node = &mut inner.graph[idx];
            node.embedding = Some(vector.clone());
            node.project_id = Some(project);
            updated += 1;
        }
        Ok(updated)
    }

    fn upsert_edges(&self, edges: &[CodeEdge]) -> Result<usize, StoreError> {
        let mut inner = self.write()?;

        let mut resolved = Vec::with_capacity(edges.len());
        for edge in edges {
            let source = inner.index.get(&edge.source_id).copied();
            let target = inner.index.get(&edge.target_id).copied();
            match (source, target) {
                (Some(s), Some(t)) => resolved.push((s, t, edge.rel_type)),
                _ => {
                    return Err(StoreError::MissingEndpoint {
                        source_id: edge.source_id,
                        target_id: edge.target_id,
                        rel_type: edge.rel_type,
                    });
                }
            }
        }

        let mut inserted = 0;
        for (source, target, rel_type) in resolved {
            let exists = inner
                .graph
                .edges_directed(source, Direction::Outgoing)
                .any(|e| e.target() == target && *e.weight() == rel_type);
            if !exists {
                inner.graph.add_edge(source, target, rel_type);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn delete_file_nodes(&self, project: ProjectId, path: &Path) -> Result<usize, StoreError> {
        let mut inner = self.write()?;
        let removed = inner.remove_where(|n| {
            n.project_id == Some(project) && n.file_path.starts_with(path)
        });
        Ok(removed)
    }

    fn delete_nodes(&self, ids: &[NodeId]) -> Result<usize, StoreError> {
        let mut inner = self.write()?;
        let mut removed = 0;
        for id in ids {
            if let Some(idx) = inner.index.remove(id) {
                inner.graph.remove_node(idx);
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn delete_project(&self, project: ProjectId) -> Result<usize, StoreError> {
        let mut inner = self.write()?;
        inner.projects.remove(&project);
        Ok(inner.remove_where(|n| n.project_id == Some(project)))
    }

    fn node(&self, id: NodeId) -> Result<Option<CodeNode>, StoreError> {
        let inner = self.read()?;
        Ok(inner.index.get(&id).map(|&idx| inner.graph[idx].clone()))
    }

    fn edges_touching(&self, id: NodeId) -> Result<Vec<CodeEdge>, StoreError> {
        let inner = self.read()?;
        let Some(&idx) = inner.index.get(&id) else {
            return Ok(Vec::new());
        };
        let outgoing = inner.graph.edges_directed(idx, Direction::Outgoing);
        let incoming = inner.graph.edges_directed(idx, Direction::Incoming);
        Ok(outgoing
            .chain(incoming)
            .map(|e| inner.edge_at(e.source(), e.target(), *e.weight()))
            .collect())
    }

    fn project_nodes(&self, project: ProjectId) -> Result<Vec<CodeNode>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .nodes()
            .filter(|n| n.project_id == Some(project))
            .cloned()
            .collect())
    }

    fn save_project(&self, project: &Project) -> Result<(), StoreError> {
        self.write()?.projects.insert(project.id, project.clone());
        Ok(())
    }

    fn project(&self, id: ProjectId) -> Result<Option<Project>, StoreError> {
        Ok(self.read()?.projects.get(&id).cloned())
    }

    fn project_by_name(&self, name: &str) -> Result<Option<Project>, StoreError> {
        Ok(self
            .read()?
            .projects
            .values()
            .find(|p| p.name == name)
            .cloned())
    }

    fn projects(&self) -> Result<Vec<Project>, StoreError> {
        let mut projects: Vec<Project> = self.read()?.projects.values().cloned().collect();
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let inner = self.read()?;
        Ok(StoreStats {
            projects: inner.projects.len(),
            nodes: inner.graph.node_count(),
            embedded_nodes: inner.nodes().filter(|n| n.is_embedded()).count(),
            edges: inner.graph.edge_count(),
        })
    }
}
