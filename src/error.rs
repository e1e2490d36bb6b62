//! Error types, one enum per concern.

use std::path::PathBuf;

use crate::graph::edge::RelType;
use crate::graph::node::{NodeId, ProjectId};

/// A single file could not be turned into a syntax tree.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported file extension: {0}")]
    UnsupportedExtension(PathBuf),

    #[error("tree-sitter produced no tree for {0}")]
    Parse(PathBuf),
}

/// Persistence failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An edge references a node that is not stored. Signals a consistency bug.
    #[error("edge {source_id} -[{rel_type}]-> {target_id} references a missing node")]
    MissingEndpoint {
        source_id: NodeId,
        target_id: NodeId,
        rel_type: RelType,
    },

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot error: {0}")]
    Snapshot(String),
}

/// The embedding provider failed or answered with something unusable.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),

    #[error("embedding request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("malformed embedding response: {0}")]
    Malformed(String),

    #[error("expected {expected} embeddings, provider returned {got}")]
    CountMismatch { expected: usize, got: usize },

    #[error("cannot embed empty text")]
    EmptyInput,
}

/// The git collaborator failed.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("`git {args}` failed: {stderr}")]
    Command { args: String, stderr: String },

    #[error("IO error running git: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of one queued task.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error("task timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl TaskError {
    /// Whether redelivering the task can succeed. Consistency violations never heal on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(StoreError::MissingEndpoint { .. }) => false,
            Self::Embed(EmbedError::EmptyInput) => false,
            _ => true,
        }
    }
}

/// Failures of the indexing pipeline entry points.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("project {0} not found")]
    ProjectNotFound(ProjectId),

    #[error("project {0} has no working copy to index")]
    NoWorkingCopy(ProjectId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("work queue is closed")]
    QueueClosed,

    #[error("extraction task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Failures of [`crate::retrieval::Retriever::retrieve`].
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("project {0} not found")]
    ProjectNotFound(ProjectId),

    /// An edge pointed at a node id the store does not know.
    #[error("edge from {from} references missing node {missing}")]
    MissingEndpoint { from: NodeId, missing: NodeId },

    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
