use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::config::CodeGraphConfig;
use crate::graph::Extraction;
use crate::parser::declarations::extract_file;
use crate::parser::usages::{TreeUsageResolver, UsageFinder};
use crate::walker::walk_sources;

/// Merged extraction of a folder or file, with per-file outcome counts.
#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub extraction: Extraction,
    pub files_parsed: usize,
    /// Files that failed to read or parse and contributed nothing.
    pub files_skipped: usize,
}

/// Extract every source file under `root`.
pub fn extract_folder(root: &Path, config: &CodeGraphConfig) -> ExtractionReport {
    extract_path(root, root, config)
}

/// Extract the source files under `path` (a file or a directory inside `folder_root`).
pub fn extract_path(path: &Path, folder_root: &Path, config: &CodeGraphConfig) -> ExtractionReport {
    extract_paths(&[path.to_path_buf()], folder_root, config)
}

/// Extract the source files under each of `paths`, all inside `folder_root`.
///
/// Usage scans always cover the whole of `folder_root`, and stored paths are relative to it.
/// Files are parsed in parallel; a file that fails is logged and skipped.
pub fn extract_paths(
    paths: &[PathBuf],
    folder_root: &Path,
    config: &CodeGraphConfig,
) -> ExtractionReport {
    let mut targets: Vec<PathBuf> = paths
        .iter()
        .flat_map(|p| walk_sources(p, config))
        .collect();
    targets.sort();
    targets.dedup();
    if targets.is_empty() {
        return ExtractionReport::default();
    }

    let scanned = if paths.len() == 1 && paths[0] == folder_root {
        targets.clone()
    } else {
        walk_sources(folder_root, config)
    };
    let resolver = TreeUsageResolver::new(folder_root, scanned);
    let finder: &dyn UsageFinder = &resolver;

    let results: Vec<_> = targets
        .par_iter()
        .map(|file| (file, extract_file(file, folder_root, Some(finder))))
        .collect();

    let mut report = ExtractionReport::default();
    for (file, result) in results {
        match result {
            Ok(extraction) => {
                report.files_parsed += 1;
                report.extraction.merge(extraction);
            }
            Err(err) => {
                tracing::warn!(path = %file.display(), "skipping file: {err}");
                report.files_skipped += 1;
            }
        }
    }

    tracing::debug!(
        root = %folder_root.display(),
        parsed = report.files_parsed,
        skipped = report.files_skipped,
        nodes = report.extraction.nodes.len(),
        edges = report.extraction.edges.len(),
        "extraction finished"
    );
    report
}
