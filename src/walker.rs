use std::path::{Path, PathBuf};

use crate::config::CodeGraphConfig;

/// Source file extensions that are parsed for declarations.
pub const SOURCE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx"];

/// Returns true if `path` has one of the [`SOURCE_EXTENSIONS`].
pub fn is_source_file(path: &Path) -> bool {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    SOURCE_EXTENSIONS.contains(&ext)
}

/// Collect the source files under `root`.
///
/// Respects `.gitignore` rules, always excludes `node_modules`, and applies any
/// additional exclusions from `config.exclude`. If `root` is itself a source file,
/// it is returned on its own. Results are sorted so extraction order is stable.
pub fn walk_sources(root: &Path, config: &CodeGraphConfig) -> Vec<PathBuf> {
    if root.is_file() {
        return if is_source_file(root) {
            vec![root.to_path_buf()]
        } else {
            Vec::new()
        };
    }

    let walker = ignore::WalkBuilder::new(root)
        .standard_filters(true)
        // Read .gitignore files even when the directory is not inside a git repository.
        .require_git(false)
        .build();

    let mut files = Vec::new();
    for result in walker {
        let entry = match result {
            Ok(e) => e,
            Err(err) => {
                tracing::warn!("walk error: {err}");
                continue;
            }
        };

        let path = entry.path();

        if entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false) {
            continue;
        }

        if path_contains_node_modules(path) {
            continue;
        }

        if is_excluded_by_config(path, config) {
            continue;
        }

        if !is_source_file(path) {
            continue;
        }

        files.push(path.to_path_buf());
    }

    files.sort();
    files
}

/// Path of `file` relative to `root`, or `file` unchanged if it lies outside `root`.
pub fn relative_to(file: &Path, root: &Path) -> PathBuf {
    file.strip_prefix(root).unwrap_or(file).to_path_buf()
}

/// Returns true if any component of `path` is named `node_modules`.
fn path_contains_node_modules(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| s == "node_modules")
            .unwrap_or(false)
    })
}

/// Returns true if `path` matches any exclusion pattern from config.
fn is_excluded_by_config(path: &Path, config: &CodeGraphConfig) -> bool {
    let patterns = match &config.exclude {
        Some(p) => p,
        None => return false,
    };

    let path_str = path.to_string_lossy();

    for pattern in patterns {
        let Ok(matcher) = glob::Pattern::new(pattern) else {
            continue;
        };
        if matcher.matches(&path_str) {
            return true;
        }
        // Also check if any component matches the pattern directly.
        if path
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .any(|s| matcher.matches(s))
        {
            return true;
        }
    }

    false
}
