use std::collections::HashSet;
use std::path::PathBuf;

use serde::Serialize;

use crate::config::VisitedScope;
use crate::error::RetrievalError;
use crate::graph::edge::RelType;
use crate::graph::node::{CodeNode, DeclarationKind, NodeId, UsagePoint};
use crate::parser::imports::ImportRecord;
use crate::store::GraphStore;

/// A node as returned to the caller, with its expanded neighbourhood.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodePayload {
    pub id: NodeId,
    pub title: String,
    pub file_path: PathBuf,
    pub declaration_kind: DeclarationKind,
    pub context: NodeContext,
    pub neighbours: Vec<Neighbour>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeContext {
    pub code_snippet: String,
    pub dependencies: Vec<ImportRecord>,
    /// `None` on neighbours, where usages are stripped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usages: Option<Vec<UsagePoint>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbour {
    pub rel_type: RelType,
    pub node: NodePayload,
}

impl NodePayload {
    fn from_node(node: CodeNode, keep_usages: bool) -> Self {
        Self {
            id: node.id,
            title: node.identifier_name,
            file_path: node.file_path,
            declaration_kind: node.declaration_kind,
            context: NodeContext {
                code_snippet: node.code_snippet,
                dependencies: node.dependencies,
                usages: keep_usages.then_some(node.usages),
            },
            neighbours: Vec::new(),
        }
    }

    /// This payload and every payload nested below it.
    pub fn walk(&self) -> Vec<&NodePayload> {
        let mut out = vec![self];
        for neighbour in &self.neighbours {
            out.extend(neighbour.node.walk());
        }
        out
    }
}

/// Depth-bounded traversal state for one retrieval request.
pub struct Expansion<'a, S: ?Sized> {
    store: &'a S,
    scope: VisitedScope,
    visited: HashSet<NodeId>,
    expanded: usize,
    max_visited: usize,
}

impl<'a, S: GraphStore + ?Sized> Expansion<'a, S> {
    pub fn new(store: &'a S, scope: VisitedScope, max_visited: usize) -> Self {
        Self {
            store,
            scope,
            visited: HashSet::new(),
            expanded: 0,
            max_visited,
        }
    }

    /// Expand a seed. Returns `None` when the seed was already reached from an earlier seed
    /// of the same request or the request's node cap is exhausted.
    pub fn expand_seed(
        &mut self,
        seed: CodeNode,
        depth: usize,
    ) -> Result<Option<NodePayload>, RetrievalError> {
        if self.scope == VisitedScope::Seed {
            self.visited.clear();
        }
        if !self.claim(seed.id) {
            return Ok(None);
        }
        self.expand(seed, depth, true).map(Some)
    }

    /// Number of nodes expanded so far in this request.
    pub fn expanded(&self) -> usize {
        self.expanded
    }

    fn claim(&mut self, id: NodeId) -> bool {
        if self.visited.contains(&id) {
            return false;
        }
        if self.expanded >= self.max_visited {
            tracing::warn!(cap = self.max_visited, "expansion node cap reached");
            return false;
        }
        self.visited.insert(id);
        self.expanded += 1;
        true
    }

    fn expand(
        &mut self,
        node: CodeNode,
        depth: usize,
        keep_usages: bool,
    ) -> Result<NodePayload, RetrievalError> {
        let mut payload = NodePayload::from_node(node, keep_usages);
        if depth == 0 {
            return Ok(payload);
        }

        for edge in self.store.edges_touching(payload.id)? {
            let other = edge.other_endpoint(payload.id);
            if !self.claim(other) {
                continue;
            }
            let neighbour = self
                .store
                .node(other)?
                .ok_or(RetrievalError::MissingEndpoint {
                    from: payload.id,
                    missing: other,
                })?;
            let child = self.expand(neighbour, depth - 1, false)?;
            payload.neighbours.push(Neighbour {
                rel_type: edge.rel_type,
                node: child,
            });
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::error::StoreError;
    use crate::graph::edge::CodeEdge;
    use crate::graph::node::{Project, ProjectId};
    use crate::store::{MemoryStore, StoreStats};

    fn node(name: &str, kind: DeclarationKind) -> CodeNode {
        let mut n = CodeNode::new(name, kind, "a.ts", name);
        n.usages.push(UsagePoint {
            file_path: "b.ts".into(),
            code_snippet: format!("use({name});"),
            subclass_node_id: None,
        });
        n
    }

    /// `A -METHOD-> m -PARAMETER-> x`, plus `B -SUBCLASS-> A` and a cycle back `x -> A`.
    fn cyclic_store() -> (MemoryStore, CodeNode, CodeNode) {
        let store = MemoryStore::new();
        let a = node("A", DeclarationKind::Class);
        let m = node("m", DeclarationKind::Method);
        let x = node("x", DeclarationKind::Parameter);
        let b = node("B", DeclarationKind::Class);
        store
            .upsert_nodes(&[a.clone(), m.clone(), x.clone(), b.clone()])
            .unwrap();
        store
            .upsert_edges(&[
                CodeEdge::new(a.id, m.id, RelType::Method),
                CodeEdge::new(m.id, x.id, RelType::Parameter),
                CodeEdge::new(b.id, a.id, RelType::Subclass),
                CodeEdge::new(x.id, a.id, RelType::Property),
            ])
            .unwrap();
        (store, a, b)
    }

    #[test]
    fn test_depth_zero_has_no_neighbours() {
        let (store, a, _) = cyclic_store();
        let mut expansion = Expansion::new(&store, VisitedScope::Request, 100);
        let payload = expansion.expand_seed(a, 0).unwrap().unwrap();
        assert!(payload.neighbours.is_empty());
        assert_eq!(payload.context.usages.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_cycle_visits_each_node_once() {
        let (store, a, _) = cyclic_store();
        let mut expansion = Expansion::new(&store, VisitedScope::Request, 100);
        let payload = expansion.expand_seed(a, 10).unwrap().unwrap();

        let ids: Vec<NodeId> = payload.walk().iter().map(|p| p.id).collect();
        let unique: HashSet<NodeId> = ids.iter().copied().collect();
        assert_eq!(ids.len(), unique.len());
        assert_eq!(ids.len(), 4);
        assert_eq!(expansion.expanded(), 4);
        assert!(payload.walk()[1..].iter().all(|p| p.context.usages.is_none()));
    }

    #[test]
    fn test_shared_neighbour_is_claimed_by_first_seed() {
        let (store, a, b) = cyclic_store();
        let m_id = store.edges_touching(a.id).unwrap()[0].target_id;
        let m = store.node(m_id).unwrap().unwrap();

        let mut shared = Expansion::new(&store, VisitedScope::Request, 100);
        let first = shared.expand_seed(b.clone(), 1).unwrap().unwrap();
        assert_eq!(first.neighbours.len(), 1);
        let second = shared.expand_seed(m.clone(), 1).unwrap().unwrap();
        // A was claimed by B's expansion.
        assert!(second.neighbours.iter().all(|n| n.node.id != a.id));
        assert_eq!(second.neighbours.len(), 1);
        assert!(shared.expand_seed(a.clone(), 1).unwrap().is_none());

        let mut per_seed = Expansion::new(&store, VisitedScope::Seed, 100);
        per_seed.expand_seed(b, 1).unwrap().unwrap();
        let second = per_seed.expand_seed(m, 1).unwrap().unwrap();
        assert_eq!(second.neighbours.len(), 2);
    }

    #[test]
    fn test_node_cap_bounds_expansion() {
        let (store, a, _) = cyclic_store();
        let mut expansion = Expansion::new(&store, VisitedScope::Request, 2);
        let payload = expansion.expand_seed(a, 10).unwrap().unwrap();
        assert_eq!(payload.walk().len(), 2);
    }

    /// A store whose edges point at a node it cannot return.
    struct Dangling {
        inner: MemoryStore,
        hidden: NodeId,
    }

    impl GraphStore for Dangling {
        fn upsert_nodes(&self, nodes: &[CodeNode]) -> Result<(), StoreError> {
            self.inner.upsert_nodes(nodes)
        }
        fn set_embeddings(
            &self,
            project: ProjectId,
            vectors: &[(NodeId, Vec<f32>)],
        ) -> Result<usize, StoreError> {
            self.inner.set_embeddings(project, vectors)
        }
        fn upsert_edges(&self, edges: &[CodeEdge]) -> Result<usize, StoreError> {
            self.inner.upsert_edges(edges)
        }
        fn delete_file_nodes(&self, project: ProjectId, path: &Path) -> Result<usize, StoreError> {
            self.inner.delete_file_nodes(project, path)
        }
        fn delete_nodes(&self, ids: &[NodeId]) -> Result<usize, StoreError> {
            self.inner.delete_nodes(ids)
        }
        fn delete_project(&self, project: ProjectId) -> Result<usize, StoreError> {
            self.inner.delete_project(project)
        }
        fn node(&self, id: NodeId) -> Result<Option<CodeNode>, StoreError> {
            if id == self.hidden {
                return Ok(None);
            }
            self.inner.node(id)
        }
        fn edges_touching(&self, id: NodeId) -> Result<Vec<CodeEdge>, StoreError> {
            self.inner.edges_touching(id)
        }
        fn project_nodes(&self, project: ProjectId) -> Result<Vec<CodeNode>, StoreError> {
            self.inner.project_nodes(project)
        }
        fn save_project(&self, project: &Project) -> Result<(), StoreError> {
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

    #[test]
    fn test_missing_neighbour_is_an_error() {
        let (inner, a, b) = cyclic_store();
        let store = Dangling { inner, hidden: b.id };
        let mut expansion = Expansion::new(&store, VisitedScope::Request, 100);
        let err = expansion.expand_seed(a.clone(), 1).unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::MissingEndpoint { from, missing } if from == a.id && missing == b.id
        ));
    }
}
