use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::parser::imports::ImportRecord;

/// Stable identifier of a [`CodeNode`]. Assigned once at construction and never reused.
pub type NodeId = Uuid;

/// Identifier of a [`Project`].
pub type ProjectId = Uuid;

/// The syntactic kind of declaration a node was built from.
///
/// Always derived from the nearest enclosing declaration of the name, never from the raw
/// token kind: the `x` in `m(x) {}` is a `Parameter`, the `m` is a `Method`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeclarationKind {
    Class,
    Interface,
    Enum,
    EnumMember,
    Function,
    Method,
    Property,
    Parameter,
    Variable,
    TypeAlias,
}

impl DeclarationKind {
    /// Lower-case label used in CLI output.
    pub fn label(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Enum => "enum",
            Self::EnumMember => "enum-member",
            Self::Function => "function",
            Self::Method => "method",
            Self::Property => "property",
            Self::Parameter => "parameter",
            Self::Variable => "variable",
            Self::TypeAlias => "type-alias",
        }
    }
}

impl fmt::Display for DeclarationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A place in another file where an exported declaration is referenced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsagePoint {
    /// File containing the reference, relative to the indexed root.
    pub file_path: PathBuf,
    /// Text of the statement enclosing the reference (or the subclass declaration).
    pub code_snippet: String,
    /// Set when the usage is a class extending the declaration.
    pub subclass_node_id: Option<NodeId>,
}

/// One declaration occurrence in the indexed tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeNode {
    pub id: NodeId,
    /// Source text of the declared name.
    pub identifier_name: String,
    pub declaration_kind: DeclarationKind,
    /// Declaring file, relative to the indexed root.
    pub file_path: PathBuf,
    /// Full source text of the enclosing declaration.
    pub code_snippet: String,
    /// Imports referenced inside this declaration's subtree.
    pub dependencies: Vec<ImportRecord>,
    /// Cross-file references. Only ever populated for exported declarations.
    pub usages: Vec<UsagePoint>,
    /// `None` until the embedding task has run for this node.
    pub embedding: Option<Vec<f32>>,
    /// `None` while the node is not yet attached to a project.
    pub project_id: Option<ProjectId>,
}

impl CodeNode {
    /// Create a node with a fresh id and no dependencies, usages, embedding or project.
    pub fn new(
        identifier_name: impl Into<String>,
        declaration_kind: DeclarationKind,
        file_path: impl Into<PathBuf>,
        code_snippet: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            identifier_name: identifier_name.into(),
            declaration_kind,
            file_path: file_path.into(),
            code_snippet: code_snippet.into(),
            dependencies: Vec::new(),
            usages: Vec::new(),
            embedding: None,
            project_id: None,
        }
    }

    /// True once a vector has been attached; only such nodes take part in similarity search.
    pub fn is_embedded(&self) -> bool {
        self.embedding.as_ref().is_some_and(|v| !v.is_empty())
    }
}

/// A cloned repository whose declarations are indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub repo_url: Option<String>,
    /// Working copy on disk. `None` once the clone has been cleaned up.
    pub local_path: Option<PathBuf>,
    /// Commit the stored graph reflects.
    pub last_processed_commit: Option<String>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            repo_url: None,
            local_path: None,
            last_processed_commit: None,
        }
    }

    pub fn with_local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    pub fn with_repo_url(mut self, url: impl Into<String>) -> Self {
        self.repo_url = Some(url.into());
        self
    }
}
