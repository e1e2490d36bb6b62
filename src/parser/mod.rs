pub mod declarations;
pub mod imports;
pub mod languages;
pub mod usages;

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use tree_sitter::{Node, Parser, Tree};

use crate::error::ExtractError;

use languages::LangKind;

// One parser per grammar per rayon worker thread.
thread_local! {
    static PARSER_TS: RefCell<Parser> = RefCell::new(parser_for(LangKind::TypeScript));
    static PARSER_TSX: RefCell<Parser> = RefCell::new(parser_for(LangKind::Tsx));
    static PARSER_JS: RefCell<Parser> = RefCell::new(parser_for(LangKind::JavaScript));
}

fn parser_for(lang: LangKind) -> Parser {
    let mut p = Parser::new();
    p.set_language(&lang.language())
        .expect("bundled grammar is ABI-compatible with tree-sitter");
    p
}

/// A parsed source file. The tree borrows nothing; nodes borrow from `tree`.
pub struct ParsedFile {
    /// Path the source was read from.
    pub path: PathBuf,
    pub lang: LangKind,
    pub source: String,
    pub tree: Tree,
}

impl ParsedFile {
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    /// Source text covered by `node`.
    pub fn text(&self, node: Node<'_>) -> &str {
        node_text(node, &self.source)
    }
}

/// Extract the UTF-8 text of a node from the original source.
pub(crate) fn node_text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    source.get(node.byte_range()).unwrap_or("")
}

/// Read and parse the file at `path`.
///
/// # Errors
/// - [`ExtractError::Io`] if the file cannot be read or is not UTF-8
/// - [`ExtractError::UnsupportedExtension`] if the extension has no grammar
/// - [`ExtractError::Parse`] if tree-sitter returns no tree
pub fn parse_path(path: &Path) -> Result<ParsedFile, ExtractError> {
    let source = std::fs::read_to_string(path).map_err(|source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_source(path, source)
}

/// Parse `source` with the grammar selected by `path`'s extension, using the calling
/// thread's cached parser.
pub fn parse_source(path: &Path, source: String) -> Result<ParsedFile, ExtractError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let lang = LangKind::from_extension(ext)
        .ok_or_else(|| ExtractError::UnsupportedExtension(path.to_path_buf()))?;

    let tree = match lang {
        LangKind::TypeScript => PARSER_TS.with(|p| p.borrow_mut().parse(&source, None)),
        LangKind::Tsx => PARSER_TSX.with(|p| p.borrow_mut().parse(&source, None)),
        LangKind::JavaScript => PARSER_JS.with(|p| p.borrow_mut().parse(&source, None)),
    }
    .ok_or_else(|| ExtractError::Parse(path.to_path_buf()))?;

    if tree.root_node().has_error() {
        tracing::debug!(path = %path.display(), "syntax errors recovered while parsing");
    }

    Ok(ParsedFile {
        path: path.to_path_buf(),
        lang,
        source,
        tree,
    })
}

/// Walk up from `node` and return the first ancestor (or `node` itself) satisfying `pred`.
pub(crate) fn find_ancestor<'t>(
    node: Node<'t>,
    mut pred: impl FnMut(Node<'t>) -> bool,
) -> Option<Node<'t>> {
    let mut current = Some(node);
    while let Some(n) = current {
        if pred(n) {
            return Some(n);
        }
        current = n.parent();
    }
    None
}

/// Depth-first pre-order visit of every node under (and including) `root`.
pub(crate) fn for_each_descendant<'t>(root: Node<'t>, mut f: impl FnMut(Node<'t>)) {
    let mut cursor = root.walk();
    loop {
        f(cursor.node());
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.node().id() == root.id() {
                return;
            }
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

/// Node kinds that name something in expressions or types.
pub(crate) fn is_identifier_kind(kind: &str) -> bool {
    matches!(
        kind,
        "identifier" | "type_identifier" | "shorthand_property_identifier"
    )
}
