use std::collections::HashSet;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Query, QueryCursor, StreamingIterator};

use super::languages::LangKind;
use super::{ParsedFile, for_each_descendant, is_identifier_kind, node_text};

/// One import statement as attached to a node's `dependencies`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRecord {
    /// The module specifier, e.g. `"./user.service"` or `"@nestjs/common"`.
    pub module_name: String,
    /// Local names introduced by the statement.
    pub bound_names: Vec<String>,
    /// Full text of the import statement.
    pub source_text: String,
}

/// A single imported name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpecifier {
    /// The local name used in this file.
    pub name: String,
    /// The exported name when renamed with `import { original as name }`.
    pub imported: Option<String>,
    /// True for `import User from './user'`.
    pub is_default: bool,
    /// True for `import * as users from './user'`.
    pub is_namespace: bool,
}

impl ImportSpecifier {
    fn local(name: String) -> Self {
        Self {
            name,
            imported: None,
            is_default: false,
            is_namespace: false,
        }
    }

    /// The name the declaring module exports this binding under.
    pub fn exported_name(&self) -> &str {
        self.imported.as_deref().unwrap_or(&self.name)
    }
}

/// An import statement with its per-name detail.
#[derive(Debug, Clone)]
pub struct ImportDecl {
    pub record: ImportRecord,
    pub specifiers: Vec<ImportSpecifier>,
}

const IMPORT_QUERY: &str = "(import_statement) @import";

static TS_IMPORT_QUERY: OnceLock<Query> = OnceLock::new();
static TSX_IMPORT_QUERY: OnceLock<Query> = OnceLock::new();
static JS_IMPORT_QUERY: OnceLock<Query> = OnceLock::new();

fn import_query(lang: LangKind) -> &'static Query {
    let cell = match lang {
        LangKind::TypeScript => &TS_IMPORT_QUERY,
        LangKind::Tsx => &TSX_IMPORT_QUERY,
        LangKind::JavaScript => &JS_IMPORT_QUERY,
    };
    cell.get_or_init(|| Query::new(&lang.language(), IMPORT_QUERY).expect("invalid import query"))
}

/// Extract every ESM import statement of a parsed file, in source order.
///
/// Handles named (`{ a, b as c }`), default, namespace (`* as ns`) and combined forms.
/// Side-effect imports (`import './polyfill'`) yield a record with no bound names.
pub fn extract_imports(file: &ParsedFile) -> Vec<ImportDecl> {
    let source = file.source.as_str();
    let query = import_query(file.lang);
    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(query, file.root(), source.as_bytes());

    let mut imports = Vec::new();
    while let Some(m) = matches.next() {
        for capture in m.captures {
            imports.push(import_decl(capture.node, source));
        }
    }
    imports
}

fn import_decl(import_node: Node<'_>, source: &str) -> ImportDecl {
    let module_name = import_node
        .child_by_field_name("source")
        .and_then(|s| s.named_child(0))
        .map(|frag| node_text(frag, source).to_owned())
        .unwrap_or_default();

    let mut specifiers = Vec::new();
    let mut cursor = import_node.walk();
    for child in import_node.children(&mut cursor) {
        if child.kind() == "import_clause" {
            extract_import_clause(child, source, &mut specifiers);
        }
    }

    ImportDecl {
        record: ImportRecord {
            module_name,
            bound_names: specifiers.iter().map(|s| s.name.clone()).collect(),
            source_text: node_text(import_node, source).to_owned(),
        },
        specifiers,
    }
}

fn extract_import_clause(clause: Node<'_>, source: &str, specifiers: &mut Vec<ImportSpecifier>) {
    let mut cursor = clause.walk();
    for child in clause.children(&mut cursor) {
        match child.kind() {
            "identifier" => specifiers.push(ImportSpecifier {
                is_default: true,
                ..ImportSpecifier::local(node_text(child, source).to_owned())
            }),
            "named_imports" => extract_named_imports(child, source, specifiers),
            "namespace_import" => {
                // `* as ns`: the identifier carries no field name.
                let mut inner = child.walk();
                if let Some(ident) = child
                    .named_children(&mut inner)
                    .find(|c| c.kind() == "identifier")
                {
                    specifiers.push(ImportSpecifier {
                        is_namespace: true,
                        ..ImportSpecifier::local(node_text(ident, source).to_owned())
                    });
                }
            }
            _ => {}
        }
    }
}

fn extract_named_imports(named: Node<'_>, source: &str, specifiers: &mut Vec<ImportSpecifier>) {
    let mut cursor = named.walk();
    for spec in named.named_children(&mut cursor) {
        if spec.kind() != "import_specifier" {
            continue;
        }
        // In `import { foo as bar }` the `name` field is foo and `alias` is bar.
        let name = spec.child_by_field_name("name").map(|n| node_text(n, source));
        let alias = spec.child_by_field_name("alias").map(|n| node_text(n, source));
        match (name, alias) {
            (Some(original), Some(local)) => specifiers.push(ImportSpecifier {
                imported: Some(original.to_owned()),
                ..ImportSpecifier::local(local.to_owned())
            }),
            (Some(original), None) => {
                specifiers.push(ImportSpecifier::local(original.to_owned()));
            }
            _ => {}
        }
    }
}

/// The local name under which `imports` bind the exported `name`, if any.
///
/// Only default imports (matched by local name) and named imports (matched by exported
/// name) count; a namespace import does not bind an individual declaration.
pub fn local_binding<'a>(imports: &'a [ImportDecl], name: &str) -> Option<&'a str> {
    imports
        .iter()
        .flat_map(|d| d.specifiers.iter())
        .find(|s| {
            !s.is_namespace
                && if s.is_default {
                    s.name == name
                } else {
                    s.exported_name() == name
                }
        })
        .map(|s| s.name.as_str())
}

/// Import records whose bound names are referenced anywhere inside `node`.
pub fn dependencies_in(node: Node<'_>, source: &str, imports: &[ImportDecl]) -> Vec<ImportRecord> {
    if imports.is_empty() {
        return Vec::new();
    }

    let mut referenced: HashSet<&str> = HashSet::new();
    for_each_descendant(node, |n| {
        if is_identifier_kind(n.kind()) {
            referenced.insert(node_text(n, source));
        }
    });

    imports
        .iter()
        .filter(|d| {
            d.record
                .bound_names
                .iter()
                .any(|b| referenced.contains(b.as_str()))
        })
        .map(|d| d.record.clone())
        .collect()
}
