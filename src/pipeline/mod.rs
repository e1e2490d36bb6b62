//! Indexing pipeline: full index, incremental re-index, polling and cloning.
//!
//! Extraction runs on the blocking pool. Node batches are persisted before their embedding
//! task is queued, so every queued task refers to stored ids; edge batches are queued after
//! all node batches of the same run.

pub mod tasks;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;
use tempfile::TempDir;
use tokio::sync::OwnedMutexGuard;

use crate::config::{CodeGraphConfig, EmbedInput};
use crate::embed::EmbeddingProvider;
use crate::error::IndexError;
use crate::extract::{ExtractionReport, extract_folder, extract_paths};
use crate::git::GitRemote;
use crate::graph::node::{CodeNode, NodeId, Project, ProjectId};
use crate::queue::{DeadLetter, IndexTask, QueueConfig, QueueStats, WorkQueue};
use crate::store::GraphStore;

pub use tasks::IndexTasks;

/// What one indexing run did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub files_parsed: usize,
    pub files_skipped: usize,
    pub nodes_removed: usize,
    /// Unchanged files re-extracted because their stored usages pointed into a changed file.
    pub dependents: usize,
    pub nodes: usize,
    pub edges: usize,
    pub node_batches: usize,
    pub edge_batches: usize,
    pub elapsed_ms: u64,
}

impl IndexReport {
    fn from_extraction(extracted: &ExtractionReport) -> Self {
        Self {
            files_parsed: extracted.files_parsed,
            files_skipped: extracted.files_skipped,
            ..Self::default()
        }
    }
}

/// Result of [`Indexer::poll_for_changes`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollOutcome {
    /// The remote head is the commit already indexed. Nothing was touched.
    UpToDate { head: String },
    Reindexed {
        from: Option<String>,
        to: String,
        changed_files: usize,
        report: IndexReport,
    },
}

/// Where [`Indexer::clone_project`] keeps the working copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CloneMode {
    /// Under `git.clone_dir`, recorded as the project's `local_path`.
    #[default]
    Persistent,
    /// In a temporary directory removed once indexing is done. Later polls clone again.
    Transient,
}

/// Serializes indexing runs per project. Different projects proceed independently.
#[derive(Default)]
struct ProjectLocks {
    locks: Mutex<HashMap<ProjectId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProjectLocks {
    async fn acquire(&self, project: ProjectId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(project).or_default())
        };
        lock.lock_owned().await
    }
}

struct Affected {
    /// Changed paths first, then dependent files.
    paths: Vec<PathBuf>,
    subclass_copies: Vec<NodeId>,
}

fn scratch_dir() -> Result<TempDir, IndexError> {
    Ok(tempfile::Builder::new().prefix("code-graph-rag-").tempdir()?)
}

pub struct Indexer<S, G> {
    store: Arc<S>,
    git: G,
    config: Arc<CodeGraphConfig>,
    queue: WorkQueue,
    locks: ProjectLocks,
}

impl<S, G> Indexer<S, G>
where
    S: GraphStore + 'static,
    G: GitRemote,
{
    /// Create the pipeline and start its queue workers on the current tokio runtime.
    pub fn new<E>(store: Arc<S>, embedder: Arc<E>, git: G, config: CodeGraphConfig) -> Self
    where
        E: EmbeddingProvider + 'static,
    {
        let handler = Arc::new(IndexTasks::new(Arc::clone(&store), embedder));
        let queue = WorkQueue::start(handler, QueueConfig::from(&config.indexing));
        Self {
            store,
            git,
            config: Arc::new(config),
            queue,
            locks: ProjectLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn git(&self) -> &G {
        &self.git
    }

    /// Replace the project's stored graph with a fresh extraction of `root`.
    pub async fn index_folder(
        &self,
        project: &Project,
        root: &Path,
    ) -> Result<IndexReport, IndexError> {
        let _guard = self.locks.acquire(project.id).await;
        self.index_folder_locked(project, root).await
    }

    /// Drop the nodes declared in each changed path and re-extract the paths that still exist.
    ///
    /// Paths are relative to the project's working copy.
    pub async fn reindex_changed_files(
        &self,
        project: &Project,
        changed: &[PathBuf],
    ) -> Result<IndexReport, IndexError> {
        let _guard = self.locks.acquire(project.id).await;
        let root = project
            .local_path
            .clone()
            .ok_or(IndexError::NoWorkingCopy(project.id))?;
        self.reindex_locked(project, &root, changed).await
    }

    /// Fetch the remote head and bring the project's graph up to it.
    ///
    /// When the head is the commit already indexed this performs no store writes at all.
    /// A project whose working copy is gone is polled through a temporary clone of its
    /// `repo_url`, removed again before returning.
    pub async fn poll_for_changes(&self, project_id: ProjectId) -> Result<PollOutcome, IndexError> {
        let _guard = self.locks.acquire(project_id).await;

        let mut project = self
            .store
            .project(project_id)?
            .ok_or(IndexError::ProjectNotFound(project_id))?;
        // Held until the end of the poll; dropping it removes a temporary clone.
        let (repo, _scratch) = self.working_copy(&project).await?;

        let head = self.git.fetch_head(&repo).await?;
        if project.last_processed_commit.as_deref() == Some(head.as_str()) {
            tracing::debug!(project = %project.name, %head, "already up to date");
            return Ok(PollOutcome::UpToDate { head });
        }

        let (changed_files, report) = match project.last_processed_commit.clone() {
            Some(from) => {
                let changed = self.git.diff_files(&repo, &from, &head).await?;
                self.git.checkout(&repo, &head).await?;
                let report = self.reindex_locked(&project, &repo, &changed).await?;
                (changed.len(), report)
            }
            None => {
                self.git.checkout(&repo, &head).await?;
                let report = self.index_folder_locked(&project, &repo).await?;
                (report.files_parsed + report.files_skipped, report)
            }
        };

        let from = project.last_processed_commit.replace(head.clone());
        self.store.save_project(&project)?;
        tracing::info!(
            project = %project.name,
            from = from.as_deref().unwrap_or("-"),
            to = %head,
            changed_files,
            "project advanced"
        );
        Ok(PollOutcome::Reindexed {
            from,
            to: head,
            changed_files,
            report,
        })
    }

    /// Clone `url` and index it as a new project.
    ///
    /// With [`CloneMode::Transient`] the working copy is deleted after extraction and the
    /// project is stored without a `local_path`.
    pub async fn clone_project(
        &self,
        name: &str,
        url: &str,
        mode: CloneMode,
    ) -> Result<(Project, IndexReport), IndexError> {
        let mut project = Project::new(name).with_repo_url(url);
        let scratch = match mode {
            CloneMode::Persistent => None,
            CloneMode::Transient => Some(scratch_dir()?),
        };
        let dest = match &scratch {
            Some(dir) => dir.path().join("repo"),
            None => self.config.git.clone_dir.join(project.id.to_string()),
        };
        let head = self.git.clone_repo(url, &dest).await?;
        if scratch.is_none() {
            project.local_path = Some(dest.clone());
        }
        project.last_processed_commit = Some(head);

        let _guard = self.locks.acquire(project.id).await;
        let report = self.index_folder_locked(&project, &dest).await?;
        Ok((project, report))
    }

    /// Wait for every queued embedding and edge task to settle.
    pub async fn flush(&self) {
        self.queue.flush().await;
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.queue.dead_letters()
    }

    /// Drain the queue and stop its workers.
    pub async fn shutdown(self) {
        self.queue.shutdown().await;
    }

    async fn index_folder_locked(
        &self,
        project: &Project,
        root: &Path,
    ) -> Result<IndexReport, IndexError> {
        let started = Instant::now();
        // Queued tasks from an earlier run may still reference the nodes about to be deleted.
        self.queue.flush().await;
        let nodes_removed = self.store.delete_project(project.id)?;
        self.store.save_project(project)?;

        let config = Arc::clone(&self.config);
        let root_owned = root.to_path_buf();
        let extracted =
            tokio::task::spawn_blocking(move || extract_folder(&root_owned, &config)).await?;

        let mut report = IndexReport::from_extraction(&extracted);
        report.nodes_removed = nodes_removed;
        self.ingest(project.id, extracted, &mut report).await?;
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            project = %project.name,
            root = %root.display(),
            files = report.files_parsed,
            nodes = report.nodes,
            edges = report.edges,
            elapsed_ms = report.elapsed_ms,
            "folder indexed"
        );
        Ok(report)
    }

    /// The project's working copy, or a fresh clone of its remote in a temporary directory
    /// when the copy was cleaned up. The [`TempDir`] removes that clone when dropped.
    async fn working_copy(&self, project: &Project) -> Result<(PathBuf, Option<TempDir>), IndexError> {
        if let Some(path) = project.local_path.as_ref().filter(|p| p.exists()) {
            return Ok((path.clone(), None));
        }
        let url = project
            .repo_url
            .as_deref()
            .ok_or(IndexError::NoWorkingCopy(project.id))?;
        let scratch = scratch_dir()?;
        let repo = scratch.path().join("repo");
        self.git.clone_repo(url, &repo).await?;
        tracing::info!(project = %project.name, url, "cloned temporary working copy");
        Ok((repo, Some(scratch)))
    }

    async fn reindex_locked(
        &self,
        project: &Project,
        root: &Path,
        changed: &[PathBuf],
    ) -> Result<IndexReport, IndexError> {
        let started = Instant::now();

        self.queue.flush().await;
        let affected = self.affected_by(project.id, changed)?;
        let mut nodes_removed = self.store.delete_nodes(&affected.subclass_copies)?;
        let mut targets = Vec::new();
        for path in &affected.paths {
            nodes_removed += self.store.delete_file_nodes(project.id, path)?;
            let absolute = root.join(path);
            if absolute.exists() {
                targets.push(absolute);
            } else {
                tracing::debug!(path = %path.display(), "removed upstream, not re-extracting");
            }
        }

        let config = Arc::clone(&self.config);
        let root_owned = root.to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || {
            extract_paths(&targets, &root_owned, &config)
        })
        .await?;

        let mut report = IndexReport::from_extraction(&extracted);
        report.nodes_removed = nodes_removed;
        report.dependents = affected.paths.len() - changed.len();
        self.ingest(project.id, extracted, &mut report).await?;
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            project = %project.name,
            changed = changed.len(),
            dependents = report.dependents,
            removed = report.nodes_removed,
            nodes = report.nodes,
            edges = report.edges,
            "changed files re-indexed"
        );
        Ok(report)
    }

    /// Widen a set of changed paths to everything whose stored form depends on them.
    ///
    /// Files holding declarations with usages inside a changed path are re-extracted too, so
    /// their usages and subclass edges are rebuilt. Subclass nodes built by the usage scan of
    /// a replaced declaration live under the subclass's path and are removed by id.
    fn affected_by(&self, project: ProjectId, changed: &[PathBuf]) -> Result<Affected, IndexError> {
        let nodes = self.store.project_nodes(project)?;
        let within = |paths: &[PathBuf], file: &Path| paths.iter().any(|p| file.starts_with(p));

        let mut paths = changed.to_vec();
        let mut seen: HashSet<PathBuf> = changed.iter().cloned().collect();
        for node in &nodes {
            if within(changed, &node.file_path) || seen.contains(&node.file_path) {
                continue;
            }
            if node.usages.iter().any(|u| within(changed, &u.file_path)) {
                seen.insert(node.file_path.clone());
                paths.push(node.file_path.clone());
            }
        }

        let subclass_copies = nodes
            .iter()
            .filter(|n| within(paths.as_slice(), &n.file_path))
            .flat_map(|n| n.usages.iter().filter_map(|u| u.subclass_node_id))
            .collect();
        Ok(Affected {
            paths,
            subclass_copies,
        })
    }

    /// Persist node batches and queue their embeddings, then queue the edge batches.
    async fn ingest(
        &self,
        project: ProjectId,
        extracted: ExtractionReport,
        report: &mut IndexReport,
    ) -> Result<(), IndexError> {
        let mut extraction = extracted.extraction;
        extraction.assign_project(project);
        let batch_size = self.config.indexing.batch_size.max(1);

        for batch in extraction.nodes.chunks(batch_size) {
            self.store.upsert_nodes(batch)?;
            let nodes = batch.iter().map(|n| (n.id, self.embed_text(n))).collect();
            self.queue
                .enqueue(IndexTask::EmbedNodes { project, nodes })
                .await?;
            report.node_batches += 1;
        }

        for batch in extraction.edges.chunks(batch_size) {
            self.queue
                .enqueue(IndexTask::SaveEdges {
                    edges: batch.to_vec(),
                })
                .await?;
            report.edge_batches += 1;
        }

        report.nodes += extraction.nodes.len();
        report.edges += extraction.edges.len();
        Ok(())
    }

    fn embed_text(&self, node: &CodeNode) -> String {
        match self.config.indexing.embed_input {
            EmbedInput::Identifier => node.identifier_name.clone(),
            EmbedInput::Snippet => node.code_snippet.clone(),
        }
    }
}
