use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::MemoryStore;
use crate::error::StoreError;
use crate::graph::edge::CodeEdge;
use crate::graph::node::{CodeNode, Project};

/// Current snapshot format version. Bump when any persisted struct layout changes.
pub const SNAPSHOT_VERSION: u32 = 1;

/// On-disk form of a [`MemoryStore`].
#[derive(Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub projects: Vec<Project>,
    pub nodes: Vec<CodeNode>,
    pub edges: Vec<CodeEdge>,
}

/// Save the store to `path` atomically using bincode serialization.
///
/// Writes to a temp file in the same directory, then renames over the target.
/// Creates the parent directory if it doesn't exist.
pub fn save_snapshot(path: &Path, store: &MemoryStore) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let (projects, nodes, edges) = store.export()?;
    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        projects,
        nodes,
        edges,
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    bincode::serde::encode_into_std_write(&snapshot, &mut tmp, bincode::config::standard())
        .map_err(|e| StoreError::Snapshot(e.to_string()))?;
    tmp.as_file().flush()?;
    tmp.persist(path).map_err(|e| e.error)?;

    tracing::debug!(
        path = %path.display(),
        nodes = snapshot.nodes.len(),
        edges = snapshot.edges.len(),
        "snapshot saved"
    );
    Ok(())
}

/// Load a store from `path`. Returns `None` if the file is missing, was written by another
/// format version, or does not decode.
pub fn load_snapshot(path: &Path) -> Option<MemoryStore> {
    let bytes = std::fs::read(path).ok()?;
    let decoded =
        bincode::serde::decode_from_slice::<Snapshot, _>(&bytes, bincode::config::standard());
    let snapshot = match decoded {
        Ok((snapshot, _)) if snapshot.version == SNAPSHOT_VERSION => snapshot,
        Ok((snapshot, _)) => {
            tracing::warn!(
                path = %path.display(),
                found = snapshot.version,
                expected = SNAPSHOT_VERSION,
                "ignoring snapshot from another version"
            );
            return None;
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), "ignoring corrupt snapshot: {err}");
            return None;
        }
    };

    match MemoryStore::from_parts(snapshot.projects, snapshot.nodes, snapshot.edges) {
        Ok(store) => Some(store),
        Err(err) => {
            tracing::warn!(path = %path.display(), "ignoring inconsistent snapshot: {err}");
            None
        }
    }
}
