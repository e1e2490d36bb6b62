use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Semantic code retrieval over a TypeScript/JavaScript declaration graph.
///
/// code-graph-rag extracts declarations and their relations into a graph, embeds them, and
/// answers natural-language queries with the best matching declarations plus their
/// neighbourhood.
#[derive(Parser, Debug)]
#[command(
    name = "code-graph-rag",
    version,
    about,
    long_about = None,
    propagate_version = true,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index a local project directory, replacing any graph stored under the same name.
    Index {
        /// Path to the project root to index.
        path: PathBuf,

        /// Project name (defaults to the directory name).
        #[arg(short, long)]
        name: Option<String>,

        /// Output results as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },

    /// Clone a git repository into the configured clone directory and index it.
    Clone {
        /// Repository URL.
        url: String,

        /// Project name.
        #[arg(short, long)]
        name: String,

        /// Delete the working copy once indexed; later polls fetch into a temporary clone.
        #[arg(long)]
        transient: bool,

        /// Output results as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },

    /// Fetch the tracked branch of a cloned project and re-index the files that changed.
    ///
    /// Does nothing when the remote head is the commit already indexed.
    Poll {
        /// Project name.
        project: String,

        /// Output results as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },

    /// Find the declarations most similar to a natural-language query.
    Query {
        /// Project name.
        project: String,

        /// Query text.
        text: String,

        /// Maximum number of results (defaults to `retrieval.top_n`).
        #[arg(long)]
        top_n: Option<usize>,

        /// Drop results scoring below this cosine similarity.
        #[arg(long)]
        min_similarity: Option<f32>,

        /// Neighbourhood depth to expand around each result.
        #[arg(long)]
        depth: Option<usize>,

        /// Output results as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },

    /// Store statistics and the list of known projects.
    Stats {
        /// Output results as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },
}
