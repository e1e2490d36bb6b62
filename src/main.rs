mod cli;
mod output;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Commands};
use code_graph_rag::config::CodeGraphConfig;
use code_graph_rag::embed::OllamaEmbedder;
use code_graph_rag::git::GitCli;
use code_graph_rag::graph::node::Project;
use code_graph_rag::pipeline::{CloneMode, Indexer};
use code_graph_rag::retrieval::{RetrievalRequest, Retriever};
use code_graph_rag::store::snapshot::{load_snapshot, save_snapshot};
use code_graph_rag::store::{GraphStore, MemoryStore};

type CliIndexer = Indexer<MemoryStore, GitCli>;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries command output; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    let config = CodeGraphConfig::load(&cwd);
    let store = Arc::new(load_snapshot(&config.store_path).unwrap_or_default());
    let embedder = Arc::new(OllamaEmbedder::from_config(&config.embedding));

    match cli.command {
        Commands::Index { path, name, json } => {
            let root = path
                .canonicalize()
                .with_context(|| format!("cannot index {}", path.display()))?;
            let name = name.unwrap_or_else(|| dir_name(&root));
            let project = match store.project_by_name(&name)? {
                Some(existing) => existing.with_local_path(&root),
                None => Project::new(&name).with_local_path(&root),
            };

            let indexer = new_indexer(&store, &embedder, &config);
            let report = indexer
                .index_folder(&project, &root)
                .await
                .with_context(|| format!("indexing {} failed", root.display()))?;
            drain(indexer).await;
            output::print_index_report(&project, &report, json);
        }

        Commands::Clone {
            url,
            name,
            transient,
            json,
        } => {
            if store.project_by_name(&name)?.is_some() {
                anyhow::bail!("a project named {name:?} already exists");
            }
            let clone_mode = if transient {
                CloneMode::Transient
            } else {
                CloneMode::Persistent
            };
            let indexer = new_indexer(&store, &embedder, &config);
            let (project, report) = indexer
                .clone_project(&name, &url, clone_mode)
                .await
                .with_context(|| format!("cloning {url} failed"))?;
            drain(indexer).await;
            output::print_index_report(&project, &report, json);
        }

        Commands::Poll { project, json } => {
            let project = find_project(&store, &project)?;
            let indexer = new_indexer(&store, &embedder, &config);
            let outcome = indexer
                .poll_for_changes(project.id)
                .await
                .with_context(|| format!("polling {} failed", project.name))?;
            drain(indexer).await;
            output::print_poll(&project, &outcome, json);
        }

        Commands::Query {
            project,
            text,
            top_n,
            min_similarity,
            depth,
            json,
        } => {
            let project = find_project(&store, &project)?;
            let defaults = RetrievalRequest::from(&config.retrieval);
            let request = RetrievalRequest {
                top_n: top_n.unwrap_or(defaults.top_n),
                min_similarity: min_similarity.unwrap_or(defaults.min_similarity),
                depth: depth.unwrap_or(defaults.depth),
            };
            let retriever = Retriever::new(
                Arc::clone(&store),
                Arc::clone(&embedder),
                config.retrieval.clone(),
            )
            .with_embed_input(config.indexing.embed_input);
            let response = retriever
                .retrieve(&text, project.id, request)
                .await
                .context("query failed")?;
            output::print_retrieval(&response, json);
        }

        Commands::Stats { json } => {
            output::print_stats(&store.stats()?, &store.projects()?, json);
            return Ok(());
        }
    }

    save_snapshot(&config.store_path, &store)
        .with_context(|| format!("cannot save {}", config.store_path.display()))?;
    Ok(())
}

fn new_indexer(
    store: &Arc<MemoryStore>,
    embedder: &Arc<OllamaEmbedder>,
    config: &CodeGraphConfig,
) -> CliIndexer {
    Indexer::new(
        Arc::clone(store),
        Arc::clone(embedder),
        GitCli::new(&config.git.branch),
        config.clone(),
    )
}

/// Wait for the queued embedding and edge tasks, then stop the workers.
async fn drain(indexer: CliIndexer) {
    indexer.flush().await;
    let stats = indexer.queue_stats();
    for dead in indexer.dead_letters() {
        tracing::warn!(
            task = dead.task.label(),
            items = dead.task.len(),
            attempts = dead.attempts,
            "task gave up: {}",
            dead.error
        );
    }
    tracing::debug!(
        completed = stats.completed,
        retried = stats.retried,
        dead_lettered = stats.dead_lettered,
        "queue drained"
    );
    indexer.shutdown().await;
}

fn find_project(store: &MemoryStore, name: &str) -> Result<Project> {
    store
        .project_by_name(name)?
        .with_context(|| format!("no project named {name:?}; run `index` or `clone` first"))
}

fn dir_name(root: &Path) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_owned())
}
