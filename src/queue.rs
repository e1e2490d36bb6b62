//! In-process work queue for the asynchronous indexing stages.
//!
//! Delivery is at-least-once: a failed task is retried with exponential backoff until it
//! succeeds, fails with a non-retryable error, or runs out of attempts, at which point it is
//! dead-lettered. Handlers must therefore be idempotent.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

use crate::config::IndexingConfig;
use crate::error::{IndexError, TaskError};
use crate::graph::edge::CodeEdge;
use crate::graph::node::{NodeId, ProjectId};

/// A unit of queued work. Plain data, so redelivery is always possible.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexTask {
    /// Embed each text and attach the vector to the node with the paired id.
    EmbedNodes {
        project: ProjectId,
        nodes: Vec<(NodeId, String)>,
    },
    /// Upsert a batch of edges whose endpoints are already persisted.
    SaveEdges { edges: Vec<CodeEdge> },
}

impl IndexTask {
    pub fn label(&self) -> &'static str {
        match self {
            Self::EmbedNodes { .. } => "embed-nodes",
            Self::SaveEdges { .. } => "save-edges",
        }
    }

    /// Number of items in the batch.
    pub fn len(&self) -> usize {
        match self {
            Self::EmbedNodes { nodes, .. } => nodes.len(),
            Self::SaveEdges { edges } => edges.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Executes queued tasks. Must tolerate being called again with a task that already succeeded.
pub trait TaskHandler: Send + Sync + 'static {
    fn handle(&self, task: &IndexTask) -> impl Future<Output = Result<(), TaskError>> + Send;
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub workers: usize,
    pub capacity: usize,
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub backoff: Duration,
    pub task_timeout: Duration,
}

impl From<&IndexingConfig> for QueueConfig {
    fn from(config: &IndexingConfig) -> Self {
        Self {
            workers: config.workers,
            capacity: config.queue_capacity,
            max_attempts: config.max_attempts,
            backoff: config.backoff(),
            task_timeout: config.task_timeout(),
        }
    }
}

/// Counters since the queue started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub completed: usize,
    /// Failed attempts that were scheduled for another try.
    pub retried: usize,
    pub dead_lettered: usize,
}

/// A task that will not be attempted again.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub task: IndexTask,
    pub attempts: u32,
    pub error: String,
}

#[derive(Default)]
struct Shared {
    /// Enqueued tasks that have not yet completed or been dead-lettered.
    pending: AtomicUsize,
    idle: Notify,
    completed: AtomicUsize,
    retried: AtomicUsize,
    dead: Mutex<Vec<DeadLetter>>,
}

impl Shared {
    fn settle_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

pub struct WorkQueue {
    sender: mpsc::Sender<IndexTask>,
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkQueue {
    /// Spawn the worker tasks on the current tokio runtime.
    pub fn start<H: TaskHandler>(handler: Arc<H>, config: QueueConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let shared = Arc::new(Shared::default());

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    Arc::clone(&receiver),
                    Arc::clone(&handler),
                    Arc::clone(&shared),
                    config.clone(),
                ))
            })
            .collect();

        Self {
            sender,
            shared,
            workers,
        }
    }

    /// Queue a task, waiting for channel capacity if necessary.
    pub async fn enqueue(&self, task: IndexTask) -> Result<(), IndexError> {
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(task).await.is_err() {
            self.shared.settle_one();
            return Err(IndexError::QueueClosed);
        }
        Ok(())
    }

    /// Wait until every task enqueued so far has completed or been dead-lettered.
    pub async fn flush(&self) {
        loop {
            let idle = self.shared.idle.notified();
            if self.shared.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            completed: self.shared.completed.load(Ordering::SeqCst),
            retried: self.shared.retried.load(Ordering::SeqCst),
            dead_lettered: self
                .shared
                .dead
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared
            .dead
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Close the queue, let workers drain what is already queued, and wait for them.
    pub async fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            if let Err(err) = worker.await {
                tracing::error!("queue worker panicked: {err}");
            }
        }
    }
}

async fn worker_loop<H: TaskHandler>(
    worker: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<IndexTask>>>,
    handler: Arc<H>,
    shared: Arc<Shared>,
    config: QueueConfig,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(task) = next else {
            break;
        };
        deliver(&task, handler.as_ref(), &shared, &config).await;
        shared.settle_one();
    }
    tracing::trace!(worker, "queue worker stopped");
}

async fn deliver<H: TaskHandler>(task: &IndexTask, handler: &H, shared: &Shared, config: &QueueConfig) {
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(config.task_timeout, handler.handle(task)).await {
            Ok(result) => result,
            Err(_) => Err(TaskError::Timeout(config.task_timeout)),
        };

        match result {
            Ok(()) => {
                shared.completed.fetch_add(1, Ordering::SeqCst);
                tracing::trace!(task = task.label(), items = task.len(), attempt, "task completed");
                return;
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = config.backoff * 2u32.pow((attempt - 1).min(16));
                tracing::warn!(
                    task = task.label(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "task failed, retrying: {err}"
                );
                shared.retried.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                tracing::error!(task = task.label(), attempts = attempt, "task dead-lettered: {err}");
                shared
                    .dead
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(DeadLetter {
                        task: task.clone(),
                        attempts: attempt,
                        error: err.to_string(),
                    });
                return;
            }
        }
    }
}
