use serde::Serialize;

use code_graph_rag::graph::node::Project;
use code_graph_rag::pipeline::{IndexReport, PollOutcome};
use code_graph_rag::retrieval::{NodePayload, RetrievalResponse};
use code_graph_rag::store::StoreStats;

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("error serialising output: {}", e),
    }
}

/// Print the outcome of a full or incremental indexing run.
///
/// If files were skipped, a warning line goes to **stderr** so that stdout stays clean for
/// JSON consumers.
pub fn print_index_report(project: &Project, report: &IndexReport, json: bool) {
    if json {
        #[derive(Serialize)]
        struct Out<'a> {
            project: &'a Project,
            report: &'a IndexReport,
        }
        print_json(&Out { project, report });
    } else {
        println!(
            "Indexed {} ({} files) in {:.2}s",
            project.name,
            report.files_parsed,
            report.elapsed_ms as f64 / 1000.0
        );
        println!(
            "  {} nodes in {} batches, {} edges in {} batches, {} nodes replaced",
            report.nodes,
            report.node_batches,
            report.edges,
            report.edge_batches,
            report.nodes_removed
        );
    }

    if report.files_skipped > 0 {
        eprintln!(
            "warning: {} file(s) skipped due to read or parse errors",
            report.files_skipped
        );
    }
}

pub fn print_poll(project: &Project, outcome: &PollOutcome, json: bool) {
    if json {
        print_json(outcome);
        return;
    }
    match outcome {
        PollOutcome::UpToDate { head } => {
            println!("{} is up to date at {}", project.name, short_sha(head));
        }
        PollOutcome::Reindexed {
            from,
            to,
            changed_files,
            report,
        } => {
            println!(
                "{}: {} -> {} ({} changed files)",
                project.name,
                from.as_deref().map(short_sha).unwrap_or("(none)"),
                short_sha(to),
                changed_files
            );
            println!(
                "  {} nodes removed, {} nodes and {} edges written",
                report.nodes_removed, report.nodes, report.edges
            );
            if report.dependents > 0 {
                println!("  {} dependent file(s) re-extracted", report.dependents);
            }
        }
    }
}

pub fn print_retrieval(response: &RetrievalResponse, json: bool) {
    if json {
        print_json(response);
        return;
    }
    if response.results.is_empty() {
        println!("no matches ({}ms)", response.elapsed_ms);
        return;
    }
    for result in &response.results {
        println!("{:.3}  {}", result.similarity, describe(&result.payload));
        let usages = result.payload.context.usages.as_deref().unwrap_or_default();
        if !usages.is_empty() {
            println!("       used in {} place(s)", usages.len());
        }
        print_neighbours(&result.payload, 1);
    }
    println!("({} results, {}ms)", response.results.len(), response.elapsed_ms);
}

fn print_neighbours(payload: &NodePayload, level: usize) {
    for neighbour in &payload.neighbours {
        println!(
            "{:indent$}{} {}",
            "",
            neighbour.rel_type,
            describe(&neighbour.node),
            indent = 7 + level * 2
        );
        print_neighbours(&neighbour.node, level + 1);
    }
}

fn describe(payload: &NodePayload) -> String {
    format!(
        "{} {} {}",
        payload.declaration_kind,
        payload.title,
        payload.file_path.display()
    )
}

pub fn print_stats(stats: &StoreStats, projects: &[Project], json: bool) {
    if json {
        #[derive(Serialize)]
        struct Out<'a> {
            stats: &'a StoreStats,
            projects: &'a [Project],
        }
        print_json(&Out { stats, projects });
        return;
    }
    println!(
        "{} projects, {} nodes ({} embedded), {} edges",
        stats.projects, stats.nodes, stats.embedded_nodes, stats.edges
    );
    for project in projects {
        println!(
            "  {}  {}  {}",
            project.name,
            project
                .last_processed_commit
                .as_deref()
                .map(short_sha)
                .unwrap_or("-"),
            project
                .local_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        );
    }
}

fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}
