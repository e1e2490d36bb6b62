use std::fmt;

use serde::{Deserialize, Serialize};

use super::node::NodeId;

/// The kind of directed relation between two declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelType {
    /// Function/Method -> Parameter.
    Parameter,
    /// Class/Interface -> Method.
    Method,
    /// Class/Interface -> Property.
    Property,
    /// Enum -> EnumMember.
    EnumMember,
    /// Class -> a class in another file that extends it.
    Subclass,
}

impl fmt::Display for RelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Parameter => "PARAMETER",
            Self::Method => "METHOD",
            Self::Property => "PROPERTY",
            Self::EnumMember => "ENUM_MEMBER",
            Self::Subclass => "SUBCLASS",
        })
    }
}

/// A directed, typed relation. The triple `(source_id, target_id, rel_type)` is the
/// edge's identity: persisting the same triple twice yields one edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeEdge {
    pub rel_type: RelType,
    pub source_id: NodeId,
    pub target_id: NodeId,
}

impl CodeEdge {
    pub fn new(source_id: NodeId, target_id: NodeId, rel_type: RelType) -> Self {
        Self {
            rel_type,
            source_id,
            target_id,
        }
    }

    /// The endpoint opposite `id`. For a self-loop this is `id` itself.
    pub fn other_endpoint(&self, id: NodeId) -> NodeId {
        if self.source_id == id {
            self.target_id
        } else {
            self.source_id
        }
    }

    pub fn touches(&self, id: NodeId) -> bool {
        self.source_id == id || self.target_id == id
    }
}
