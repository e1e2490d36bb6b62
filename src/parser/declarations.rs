use std::path::Path;

use tree_sitter::Node;

use crate::error::ExtractError;
use crate::graph::Extraction;
use crate::graph::edge::RelType;
use crate::graph::node::{CodeNode, DeclarationKind, NodeId};
use crate::walker::relative_to;

use super::imports::{ImportDecl, dependencies_in, extract_imports};
use super::usages::UsageFinder;
use super::{ParsedFile, find_ancestor, node_text, parse_path};

/// The file a declaration is read from, as seen by node construction.
pub struct FileScope<'a> {
    pub file: &'a ParsedFile,
    /// Path stored on nodes, relative to the indexed root.
    pub rel_path: &'a Path,
    pub imports: &'a [ImportDecl],
}

/// A freshly built node plus any subclass nodes its usage scan discovered.
pub struct BuiltNode {
    pub node: CodeNode,
    pub subclasses: Vec<CodeNode>,
}

/// The declaration kind a syntax node introduces, if it introduces one.
pub fn declaration_kind(node: Node<'_>) -> Option<DeclarationKind> {
    use DeclarationKind::*;

    let parent_kind = node.parent().map(|p| p.kind());
    let kind = match node.kind() {
        "class_declaration" | "abstract_class_declaration" => Class,
        "interface_declaration" => Interface,
        "enum_declaration" => Enum,
        "enum_assignment" => EnumMember,
        "property_identifier" if parent_kind == Some("enum_body") => EnumMember,
        "function_declaration" | "generator_function_declaration" | "function_signature" => {
            Function
        }
        "method_definition" | "method_signature" | "abstract_method_signature" => Method,
        "public_field_definition" | "property_signature" | "field_definition" => Property,
        "required_parameter" | "optional_parameter" => Parameter,
        // JavaScript parameters are bare patterns inside `formal_parameters`.
        "identifier" | "assignment_pattern" if parent_kind == Some("formal_parameters") => {
            Parameter
        }
        "variable_declarator" => Variable,
        "type_alias_declaration" => TypeAlias,
        _ => return None,
    };
    Some(kind)
}

/// The nearest declaration enclosing `name_node` (possibly `name_node` itself) and its kind.
pub fn enclosing_declaration(name_node: Node<'_>) -> Option<(Node<'_>, DeclarationKind)> {
    let decl = find_ancestor(name_node, |n| declaration_kind(n).is_some())?;
    Some((decl, declaration_kind(decl)?))
}

/// Whether the declaration sits directly in an `export` statement.
pub fn is_exported(decl: Node<'_>) -> bool {
    let statement = if decl.kind() == "variable_declarator" {
        decl.parent()
    } else {
        Some(decl)
    };
    statement
        .and_then(|s| s.parent())
        .is_some_and(|p| p.kind() == "export_statement")
}

fn carries_dependencies(kind: DeclarationKind) -> bool {
    matches!(
        kind,
        DeclarationKind::Class
            | DeclarationKind::Interface
            | DeclarationKind::Enum
            | DeclarationKind::Function
            | DeclarationKind::Method
    )
}

/// Build the node for the declaration named by `name_node`.
///
/// Kind and snippet come from the nearest enclosing declaration. When a `finder` is given and
/// the declaration is exported, its cross-file usages are attached and any subclasses found
/// are returned alongside. Returns `None` if `name_node` is not inside a declaration.
pub fn construct_node(
    name_node: Node<'_>,
    scope: &FileScope<'_>,
    finder: Option<&dyn UsageFinder>,
) -> Option<BuiltNode> {
    let (decl, kind) = enclosing_declaration(name_node)?;
    let source = scope.file.source.as_str();

    // `x = 1` alone reads poorly; keep the whole `const x = 1`.
    let snippet_node = match kind {
        DeclarationKind::Variable => decl.parent().unwrap_or(decl),
        _ => decl,
    };

    let mut node = CodeNode::new(
        node_text(name_node, source),
        kind,
        scope.rel_path,
        node_text(snippet_node, source),
    );
    if carries_dependencies(kind) {
        node.dependencies = dependencies_in(decl, source, scope.imports);
    }

    let mut subclasses = Vec::new();
    if let Some(finder) = finder
        && is_exported(decl)
    {
        let scan = finder.find_usages(&node.identifier_name, kind, scope.rel_path);
        node.usages = scan.usages;
        subclasses = scan.subclasses;
    }

    Some(BuiltNode { node, subclasses })
}

/// Parse `path` and extract its declarations. Stored paths are relative to `folder_root`.
pub fn extract_file(
    path: &Path,
    folder_root: &Path,
    finder: Option<&dyn UsageFinder>,
) -> Result<Extraction, ExtractError> {
    let parsed = parse_path(path)?;
    let rel_path = relative_to(path, folder_root);
    Ok(extract_parsed(&parsed, &rel_path, finder))
}

/// Extract the declarations of an already parsed file.
pub fn extract_parsed(
    file: &ParsedFile,
    rel_path: &Path,
    finder: Option<&dyn UsageFinder>,
) -> Extraction {
    let imports = extract_imports(file);
    let scope = FileScope {
        file,
        rel_path,
        imports: &imports,
    };
    let mut visitor = Visitor {
        scope: &scope,
        finder,
        out: Extraction::new(),
    };
    visitor.visit(file.root());
    visitor.out
}

struct Visitor<'s, 'a> {
    scope: &'s FileScope<'a>,
    finder: Option<&'s dyn UsageFinder>,
    out: Extraction,
}

impl Visitor<'_, '_> {
    fn visit(&mut self, node: Node<'_>) {
        match node.kind() {
            "class_declaration" | "abstract_class_declaration" | "interface_declaration" => {
                self.visit_type(node);
                return;
            }
            "enum_declaration" => {
                self.visit_enum(node);
                return;
            }
            "function_declaration" | "generator_function_declaration" | "function_signature" => {
                self.visit_function(node);
            }
            "lexical_declaration" | "variable_declaration" => {
                if is_module_scope(node) {
                    self.visit_variables(node);
                }
                return;
            }
            "type_alias_declaration" => {
                if let Some(name) = node.child_by_field_name("name") {
                    self.add(name);
                }
                return;
            }
            _ => {}
        }

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.visit(child);
        }
    }

    /// Push the node for `name_node` (and its subclasses) and return its id.
    fn add(&mut self, name_node: Node<'_>) -> Option<NodeId> {
        let built = construct_node(name_node, self.scope, self.finder)?;
        let id = self.out.push_node(built.node);
        for subclass in built.subclasses {
            let sub_id = self.out.push_node(subclass);
            self.out.link(id, sub_id, RelType::Subclass);
        }
        Some(id)
    }

    fn visit_type(&mut self, decl: Node<'_>) {
        let Some(name) = decl.child_by_field_name("name") else {
            return;
        };
        let Some(owner) = self.add(name) else {
            return;
        };
        let Some(body) = decl.child_by_field_name("body") else {
            return;
        };

        let mut cursor = body.walk();
        for member in body.named_children(&mut cursor) {
            match member.kind() {
                "method_definition" | "method_signature" | "abstract_method_signature" => {
                    if let Some(name) = member.child_by_field_name("name")
                        && let Some(method) = self.add(name)
                    {
                        self.out.link(owner, method, RelType::Method);
                        self.add_parameters(member, method);
                    }
                }
                "public_field_definition" | "property_signature" | "field_definition" => {
                    let name = member
                        .child_by_field_name("name")
                        .or_else(|| member.child_by_field_name("property"));
                    if let Some(name) = name
                        && let Some(prop) = self.add(name)
                    {
                        self.out.link(owner, prop, RelType::Property);
                    }
                }
                _ => {}
            }
        }
    }

    fn visit_enum(&mut self, decl: Node<'_>) {
        let Some(name) = decl.child_by_field_name("name") else {
            return;
        };
        let Some(owner) = self.add(name) else {
            return;
        };
        let Some(body) = decl.child_by_field_name("body") else {
            return;
        };

        let mut cursor = body.walk();
        for member in body.named_children(&mut cursor) {
            let name = match member.kind() {
                "property_identifier" => Some(member),
                "enum_assignment" => member.child_by_field_name("name"),
                _ => None,
            };
            if let Some(name) = name
                && let Some(id) = self.add(name)
            {
                self.out.link(owner, id, RelType::EnumMember);
            }
        }
    }

    fn visit_function(&mut self, decl: Node<'_>) {
        if let Some(name) = decl.child_by_field_name("name")
            && let Some(id) = self.add(name)
        {
            self.add_parameters(decl, id);
        }
    }

    fn add_parameters(&mut self, callable: Node<'_>, owner: NodeId) {
        let Some(params) = callable.child_by_field_name("parameters") else {
            return;
        };
        let mut cursor = params.walk();
        for param in params.named_children(&mut cursor) {
            let name = match param.kind() {
                "required_parameter" | "optional_parameter" => param.child_by_field_name("pattern"),
                "identifier" => Some(param),
                "assignment_pattern" => param.child_by_field_name("left"),
                _ => None,
            };
            // Destructured parameters have no single name.
            if let Some(name) = name.filter(|n| n.kind() == "identifier")
                && let Some(id) = self.add(name)
            {
                self.out.link(owner, id, RelType::Parameter);
            }
        }
    }

    fn visit_variables(&mut self, statement: Node<'_>) {
        let mut cursor = statement.walk();
        for declarator in statement.named_children(&mut cursor) {
            if declarator.kind() != "variable_declarator" {
                continue;
            }
            if let Some(name) = declarator.child_by_field_name("name")
                && name.kind() == "identifier"
            {
                self.add(name);
            }
        }
    }
}

/// True for declaration statements at the top level of a module, exported or not.
fn is_module_scope(statement: Node<'_>) -> bool {
    match statement.parent() {
        Some(p) if p.kind() == "program" => true,
        Some(p) if p.kind() == "export_statement" => {
            p.parent().is_some_and(|pp| pp.kind() == "program")
        }
        _ => false,
    }
}
