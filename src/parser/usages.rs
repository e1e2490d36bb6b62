use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tree_sitter::Node;

use crate::graph::node::{CodeNode, DeclarationKind, UsagePoint};
use crate::walker::relative_to;

use super::declarations::{FileScope, construct_node};
use super::imports::{ImportDecl, extract_imports, local_binding};
use super::{ParsedFile, find_ancestor, for_each_descendant, is_identifier_kind, node_text, parse_path};

/// Cross-file references to one exported declaration.
#[derive(Debug, Default)]
pub struct UsageScan {
    pub usages: Vec<UsagePoint>,
    /// Classes extending the declaration, built as full nodes.
    pub subclasses: Vec<CodeNode>,
}

/// Finds where an exported declaration is used outside its own file.
///
/// Called from parallel extraction workers, hence `Sync`.
pub trait UsageFinder: Sync {
    /// `declaring_file` is relative to the indexed root, like stored node paths.
    fn find_usages(&self, name: &str, kind: DeclarationKind, declaring_file: &Path) -> UsageScan;
}

/// [`UsageFinder`] that scans a fixed set of files under one root.
///
/// Each file's import list is parsed once and memoized; only files whose imports bind the
/// name are parsed again for the occurrence walk.
pub struct TreeUsageResolver {
    root: PathBuf,
    files: Vec<PathBuf>,
    /// `None` marks a file that failed to parse.
    imports: Mutex<HashMap<PathBuf, Option<Arc<Vec<ImportDecl>>>>>,
}

impl TreeUsageResolver {
    /// `files` are the paths to scan, as returned by [`crate::walker::walk_sources`] on `root`.
    pub fn new(root: impl Into<PathBuf>, files: Vec<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files,
            imports: Mutex::new(HashMap::new()),
        }
    }

    fn imports_of(&self, file: &Path) -> Option<Arc<Vec<ImportDecl>>> {
        if let Some(cached) = self
            .imports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(file)
        {
            return cached.clone();
        }

        let parsed = match parse_path(file) {
            Ok(parsed) => Some(Arc::new(extract_imports(&parsed))),
            Err(err) => {
                tracing::warn!(path = %file.display(), "skipping file in usage scan: {err}");
                None
            }
        };
        self.imports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(file.to_path_buf(), parsed.clone());
        parsed
    }

    fn scan_file(
        &self,
        file: &Path,
        rel_path: &Path,
        imports: &[ImportDecl],
        local: &str,
        find_subclasses: bool,
        scan: &mut UsageScan,
    ) {
        let parsed = match parse_path(file) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(path = %file.display(), "skipping file in usage scan: {err}");
                return;
            }
        };
        let scope = FileScope {
            file: &parsed,
            rel_path,
            imports,
        };

        // Heritage names belong to the subclass usage, not to a plain occurrence.
        let mut heritage_ids = HashSet::new();
        if find_subclasses {
            for (class, extended) in extending_classes(&parsed, local) {
                heritage_ids.insert(extended.id());
                let Some(name) = class.child_by_field_name("name") else {
                    continue;
                };
                // Subclasses do not run a usage scan of their own; their declaring file's
                // extraction produces the scanned node.
                let Some(built) = construct_node(name, &scope, None) else {
                    continue;
                };
                scan.usages.push(UsagePoint {
                    file_path: rel_path.to_path_buf(),
                    code_snippet: built.node.code_snippet.clone(),
                    subclass_node_id: Some(built.node.id),
                });
                scan.subclasses.push(built.node);
            }
        }

        let mut seen_statements = HashSet::new();
        for_each_descendant(parsed.root(), |n| {
            if !is_identifier_kind(n.kind())
                || heritage_ids.contains(&n.id())
                || parsed.text(n) != local
                || find_ancestor(n, |a| a.kind() == "import_statement").is_some()
            {
                return;
            }
            let Some(statement) = find_ancestor(n, is_statement) else {
                return;
            };
            if seen_statements.insert(statement.id()) {
                scan.usages.push(UsagePoint {
                    file_path: rel_path.to_path_buf(),
                    code_snippet: parsed.text(statement).to_owned(),
                    subclass_node_id: None,
                });
            }
        });
    }
}

impl UsageFinder for TreeUsageResolver {
    fn find_usages(&self, name: &str, kind: DeclarationKind, declaring_file: &Path) -> UsageScan {
        let mut scan = UsageScan::default();
        for file in &self.files {
            let rel_path = relative_to(file, &self.root);
            if rel_path == declaring_file {
                continue;
            }
            let Some(imports) = self.imports_of(file) else {
                continue;
            };
            let Some(local) = local_binding(&imports, name) else {
                continue;
            };
            self.scan_file(
                file,
                &rel_path,
                &imports,
                local,
                kind == DeclarationKind::Class,
                &mut scan,
            );
        }
        tracing::trace!(name, usages = scan.usages.len(), "usage scan finished");
        scan
    }
}

/// The statement an occurrence is reported with.
fn is_statement(node: Node<'_>) -> bool {
    node.kind().ends_with("_statement")
        || node
            .parent()
            .is_some_and(|p| matches!(p.kind(), "program" | "statement_block" | "class_body"))
}

/// Classes in `file` whose `extends` clause names `local`, with the heritage name node.
fn extending_classes<'t>(file: &'t ParsedFile, local: &str) -> Vec<(Node<'t>, Node<'t>)> {
    let mut found = Vec::new();
    for_each_descendant(file.root(), |n| {
        if matches!(n.kind(), "class_declaration" | "abstract_class_declaration")
            && let Some(extended) = extended_name(n)
            && is_identifier_kind(extended.kind())
            && node_text(extended, &file.source) == local
        {
            found.push((n, extended));
        }
    });
    found
}

/// The expression after `extends`. TypeScript wraps it in `extends_clause`; JavaScript puts it
/// directly under `class_heritage`.
fn extended_name(class: Node<'_>) -> Option<Node<'_>> {
    let mut cursor = class.walk();
    let heritage = class
        .named_children(&mut cursor)
        .find(|c| c.kind() == "class_heritage")?;

    let mut cursor = heritage.walk();
    for child in heritage.named_children(&mut cursor) {
        match child.kind() {
            "extends_clause" => return child.child_by_field_name("value"),
            "implements_clause" => {}
            _ => return Some(child),
        }
    }
    None
}
