//! Definition and import extraction from Python syntax trees.
//!
//! Walks module, class-body and function-body statement lists, recording one
//! `DefinitionRecord` per class or function. Malformed regions surface as
//! `ERROR` nodes in the tree; the walk descends into them as well, so a
//! broken statement only costs the definitions inside it.

use tree_sitter::{Node, Tree};

use crate::errors::SymdexResult;
use crate::indexer::parser::parse_python;
use crate::models::{DefinitionKind, DefinitionRecord, DefinitionTable, ImportBinding, Span};
use crate::query::guards::MAX_SYNTAX_DEPTH;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    source.get(node.start_byte()..node.end_byte()).unwrap_or("")
}

pub fn node_span(node: Node<'_>) -> Span {
    Span {
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
        start_line: node.start_position().row + 1,
        end_line: node.end_position().row + 1,
    }
}

/// The node a definition's span covers: the surrounding
/// `decorated_definition` when there is one.
pub fn definition_outer_node(def_node: Node<'_>) -> Node<'_> {
    match def_node.parent() {
        Some(parent) if parent.kind() == "decorated_definition" => parent,
        _ => def_node,
    }
}

/// Docstring statement of a class/function body, else a contiguous block of
/// `#` comments directly above the definition.
fn doc_span(def_node: Node<'_>, outer: Node<'_>) -> Option<Span> {
    if let Some(body) = def_node.child_by_field_name("body") {
        if let Some(first) = body.named_child(0) {
            if first.kind() == "expression_statement" {
                if let Some(expr) = first.named_child(0) {
                    if matches!(expr.kind(), "string" | "concatenated_string") {
                        return Some(node_span(first));
                    }
                }
            }
        }
    }

    let mut top: Option<Node<'_>> = None;
    let mut bottom: Option<Node<'_>> = None;
    let mut expected_row = outer.start_position().row;
    let mut cursor = outer.prev_sibling();
    while let Some(sibling) = cursor {
        if sibling.kind() != "comment" || sibling.end_position().row + 1 != expected_row {
            break;
        }
        if bottom.is_none() {
            bottom = Some(sibling);
        }
        top = Some(sibling);
        expected_row = sibling.start_position().row;
        cursor = sibling.prev_sibling();
    }
    match (top, bottom) {
        (Some(top), Some(bottom)) => Some(Span {
            start_byte: top.start_byte(),
            end_byte: bottom.end_byte(),
            start_line: top.start_position().row + 1,
            end_line: bottom.end_position().row + 1,
        }),
        _ => None,
    }
}

/// Positional base-class expressions of a `class_definition`, verbatim.
fn base_classes(class_node: Node<'_>, source: &str) -> Vec<String> {
    let Some(args) = class_node.child_by_field_name("superclasses") else {
        return Vec::new();
    };
    let mut cursor = args.walk();
    args.named_children(&mut cursor)
        .filter(|arg| {
            !matches!(
                arg.kind(),
                "keyword_argument" | "list_splat" | "dictionary_splat" | "comment"
            )
        })
        .map(|arg| node_text(arg, source).to_string())
        .filter(|text| !text.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Definition walk
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Scope {
    class_name: Option<String>,
    nested: bool,
}

struct Extraction<'s> {
    file_path: &'s str,
    source: &'s str,
    definitions: Vec<DefinitionRecord>,
}

impl Extraction<'_> {
    fn walk(&mut self, node: Node<'_>, scope: &Scope, depth: usize) {
        if depth > MAX_SYNTAX_DEPTH {
            return;
        }
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
        for child in children {
            match child.kind() {
                "class_definition" | "function_definition" => {
                    self.definition(child, scope, depth);
                }
                "decorated_definition" => match child.child_by_field_name("definition") {
                    Some(def) => self.definition(def, scope, depth),
                    None => self.walk(child, scope, depth + 1),
                },
                _ => self.walk(child, scope, depth + 1),
            }
        }
    }

    fn definition(&mut self, def_node: Node<'_>, scope: &Scope, depth: usize) {
        let outer = definition_outer_node(def_node);
        let name = def_node
            .child_by_field_name("name")
            .map(|n| node_text(n, self.source).to_string())
            .filter(|n| !n.is_empty());
        let Some(name) = name else {
            // Unnamed (broken) header: still look for intact definitions inside.
            self.walk(def_node, scope, depth + 1);
            return;
        };

        let span = node_span(outer);
        let is_class = def_node.kind() == "class_definition";
        let kind = if is_class {
            DefinitionKind::Class
        } else if scope.class_name.is_some() {
            DefinitionKind::Method
        } else {
            DefinitionKind::Function
        };

        if !span.is_empty() {
            self.definitions.push(DefinitionRecord {
                kind,
                name: name.clone(),
                enclosing_class: if kind == DefinitionKind::Method {
                    scope.class_name.clone()
                } else {
                    None
                },
                file_path: self.file_path.to_string(),
                span,
                base_classes: if is_class {
                    base_classes(def_node, self.source)
                } else {
                    Vec::new()
                },
                doc_span: doc_span(def_node, outer),
                nested: scope.nested,
            });
        }

        let inner = if is_class {
            Scope {
                class_name: Some(name),
                nested: scope.nested,
            }
        } else {
            Scope {
                class_name: None,
                nested: true,
            }
        };
        if let Some(body) = def_node.child_by_field_name("body") {
            self.walk(body, &inner, depth + 1);
        }
    }
}

// ---------------------------------------------------------------------------
// Import bindings
// ---------------------------------------------------------------------------

fn dotted_last(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

fn import_bindings(node: Node<'_>, source: &str, out: &mut Vec<ImportBinding>, depth: usize) {
    if depth > MAX_SYNTAX_DEPTH {
        return;
    }
    match node.kind() {
        "import_statement" => {
            let mut cursor = node.walk();
            for name in node.children_by_field_name("name", &mut cursor) {
                match name.kind() {
                    "dotted_name" => {
                        let module = node_text(name, source).to_string();
                        out.push(ImportBinding {
                            local_name: module.clone(),
                            module,
                            member: None,
                        });
                    }
                    "aliased_import" => {
                        let module = name.child_by_field_name("name");
                        let alias = name.child_by_field_name("alias");
                        if let (Some(module), Some(alias)) = (module, alias) {
                            out.push(ImportBinding {
                                local_name: node_text(alias, source).to_string(),
                                module: node_text(module, source).to_string(),
                                member: None,
                            });
                        }
                    }
                    _ => {}
                }
            }
        }
        "import_from_statement" => {
            let Some(module) = node.child_by_field_name("module_name") else {
                return;
            };
            let module = node_text(module, source).to_string();

            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if child.kind() == "wildcard_import" {
                    out.push(ImportBinding {
                        local_name: "*".to_string(),
                        module: module.clone(),
                        member: None,
                    });
                }
            }

            let mut cursor = node.walk();
            for name in node.children_by_field_name("name", &mut cursor) {
                match name.kind() {
                    "dotted_name" | "identifier" => {
                        let member = dotted_last(node_text(name, source)).to_string();
                        out.push(ImportBinding {
                            local_name: member.clone(),
                            module: module.clone(),
                            member: Some(member),
                        });
                    }
                    "aliased_import" => {
                        let original = name.child_by_field_name("name");
                        let alias = name.child_by_field_name("alias");
                        if let Some(original) = original {
                            let member = dotted_last(node_text(original, source)).to_string();
                            let local_name = alias
                                .map(|a| node_text(a, source).to_string())
                                .unwrap_or_else(|| member.clone());
                            out.push(ImportBinding {
                                local_name,
                                module: module.clone(),
                                member: Some(member),
                            });
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                import_bindings(child, source, out, depth + 1);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Extract definitions and import bindings from an already parsed tree.
pub fn extract_from_tree(file_path: &str, source: &str, tree: &Tree) -> DefinitionTable {
    let root = tree.root_node();
    let mut extraction = Extraction {
        file_path,
        source,
        definitions: Vec::new(),
    };
    extraction.walk(
        root,
        &Scope {
            class_name: None,
            nested: false,
        },
        0,
    );

    let mut imports = Vec::new();
    import_bindings(root, source, &mut imports, 0);

    DefinitionTable {
        definitions: extraction.definitions,
        imports,
    }
}

/// Parse `source` and extract its definition table.
pub fn extract_definitions(file_path: &str, source: &str) -> SymdexResult<DefinitionTable> {
    let tree = parse_python(file_path, source)?;
    Ok(extract_from_tree(file_path, source, &tree))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#""""Sample module"""

from typing import List, Optional
from .utils import helper_func
from base import BaseClass as Base
import os.path
import numpy as np
from shapes import *


class MyClass(Base):
    """A sample class"""

    def __init__(self, name: str):
        self.name = name
        self.helper = HelperClass()

    def process(self, data: List[str]) -> Optional[str]:
        result = helper_func(data)
        return self.transform(result)

    def transform(self, value):
        return str(value)


class HelperClass:
    def do_something(self):
        return "done"


def standalone_function(x: int) -> int:
    """A standalone function"""
    obj = MyClass("test")
    return x * 2
"#;

    fn names(table: &DefinitionTable, kind: DefinitionKind) -> Vec<&str> {
        table
            .definitions
            .iter()
            .filter(|d| d.kind == kind)
            .map(|d| d.name.as_str())
            .collect()
    }

    #[test]
    fn classes_methods_and_functions() {
        let table = extract_definitions("/p/main.py", SAMPLE).unwrap();
        assert_eq!(names(&table, DefinitionKind::Class), vec!["MyClass", "HelperClass"]);
        assert_eq!(
            names(&table, DefinitionKind::Method),
            vec!["__init__", "process", "transform", "do_something"]
        );
        assert_eq!(names(&table, DefinitionKind::Function), vec!["standalone_function"]);

        let process = table.definitions.iter().find(|d| d.name == "process").unwrap();
        assert_eq!(process.enclosing_class.as_deref(), Some("MyClass"));
        assert!(!process.nested);

        let class = table.definitions.iter().find(|d| d.name == "MyClass").unwrap();
        assert_eq!(class.enclosing_class, None);
        assert_eq!(class.base_classes, vec!["Base"]);
        assert_eq!(class.file_path, "/p/main.py");
    }

    #[test]
    fn spans_are_non_empty_contained_and_nested_properly() {
        let table = extract_definitions("main.py", SAMPLE).unwrap();
        for def in &table.definitions {
            assert!(!def.span.is_empty(), "{} has empty span", def.name);
            assert!(def.span.end_byte <= SAMPLE.len());
            assert!(def.span.start_line <= def.span.end_line);
        }
        let class = table.definitions.iter().find(|d| d.name == "MyClass").unwrap();
        for method in table
            .definitions
            .iter()
            .filter(|d| d.enclosing_class.as_deref() == Some("MyClass"))
        {
            assert!(class.span.contains(&method.span));
        }
        let content = class.span.slice(SAMPLE).unwrap();
        assert!(content.starts_with("class MyClass(Base):"));
        assert!(content.ends_with("return str(value)"));
    }

    #[test]
    fn docstrings_and_leading_comments() {
        let source = "# Adds numbers.\n# Really.\ndef add(a, b):\n    return a + b\n\n\ndef sub(a, b):\n    \"\"\"Subtract.\"\"\"\n    return a - b\n";
        let table = extract_definitions("m.py", source).unwrap();
        let add = &table.definitions[0];
        let doc = add.doc_span.unwrap();
        assert_eq!(doc.slice(source), Some("# Adds numbers.\n# Really."));
        assert_eq!(doc.start_line, 1);

        let sub = &table.definitions[1];
        assert_eq!(sub.doc_span.unwrap().slice(source), Some("\"\"\"Subtract.\"\"\""));
    }

    #[test]
    fn nested_definitions_are_flagged() {
        let source = "def outer():\n    def inner():\n        return 1\n    class Local:\n        def m(self):\n            pass\n    return inner()\n";
        let table = extract_definitions("n.py", source).unwrap();
        let outer = &table.definitions[0];
        assert!(!outer.nested);
        for def in &table.definitions[1..] {
            assert!(def.nested, "{} should be nested", def.name);
            assert!(outer.span.contains(&def.span));
        }
        let m = table.definitions.iter().find(|d| d.name == "m").unwrap();
        assert_eq!(m.kind, DefinitionKind::Method);
        assert_eq!(m.enclosing_class.as_deref(), Some("Local"));
    }

    #[test]
    fn base_classes_are_verbatim() {
        let source = "class A(B, mod.C, Generic[T], metaclass=Meta, *extra):\n    pass\n";
        let table = extract_definitions("b.py", source).unwrap();
        assert_eq!(table.definitions[0].base_classes, vec!["B", "mod.C", "Generic[T]"]);
    }

    #[test]
    fn decorated_span_includes_decorators() {
        let source = "import functools\n\n@functools.cache\n@other\ndef cached():\n    return 1\n\nclass K:\n    @property\n    def value(self):\n        return 2\n";
        let table = extract_definitions("d.py", source).unwrap();
        let cached = &table.definitions[0];
        assert!(cached.span.slice(source).unwrap().starts_with("@functools.cache"));
        assert_eq!(cached.span.start_line, 3);

        let value = table.definitions.iter().find(|d| d.name == "value").unwrap();
        assert_eq!(value.kind, DefinitionKind::Method);
        assert!(value.span.slice(source).unwrap().starts_with("@property"));
    }

    #[test]
    fn definitions_in_conditional_blocks_and_async() {
        let source = "try:\n    import fast\nexcept ImportError:\n    def fast_path():\n        pass\n\nclass Svc:\n    if True:\n        async def fetch(self):\n            pass\n";
        let table = extract_definitions("c.py", source).unwrap();
        let fast_path = table.definitions.iter().find(|d| d.name == "fast_path").unwrap();
        assert_eq!(fast_path.kind, DefinitionKind::Function);
        let fetch = table.definitions.iter().find(|d| d.name == "fetch").unwrap();
        assert_eq!(fetch.kind, DefinitionKind::Method);
        assert_eq!(fetch.enclosing_class.as_deref(), Some("Svc"));
    }

    #[test]
    fn recovers_definitions_after_syntax_errors() {
        let source = "def broken(:\n    return\n\nclass Intact:\n    def ok(self):\n        return 1\n\ndef later():\n    return 2\n";
        let table = extract_definitions("e.py", source).unwrap();
        let names: Vec<&str> = table.definitions.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"Intact"), "got {names:?}");
        assert!(names.contains(&"later"), "got {names:?}");
        for def in &table.definitions {
            assert!(def.span.end_byte <= source.len());
        }
    }

    #[test]
    fn import_bindings_cover_all_forms() {
        let table = extract_definitions("main.py", SAMPLE).unwrap();
        let find = |local: &str| table.imports.iter().find(|b| b.local_name == local).cloned();

        let list = find("List").unwrap();
        assert_eq!(list.module, "typing");
        assert_eq!(list.member.as_deref(), Some("List"));

        let helper = find("helper_func").unwrap();
        assert_eq!(helper.module, ".utils");

        let base = find("Base").unwrap();
        assert_eq!(base.module, "base");
        assert_eq!(base.member.as_deref(), Some("BaseClass"));

        let os_path = find("os.path").unwrap();
        assert_eq!(os_path.member, None);

        let np = find("np").unwrap();
        assert_eq!(np.module, "numpy");
        assert_eq!(np.member, None);

        let star = find("*").unwrap();
        assert!(star.is_wildcard());
        assert_eq!(star.module, "shapes");
    }

    #[test]
    fn relative_import_keeps_leading_dots() {
        let source = "from . import sibling\nfrom ..pkg.mod import thing as alias\n";
        let table = extract_definitions("x/y/z.py", source).unwrap();
        assert_eq!(table.imports.len(), 2);
        assert_eq!(table.imports[0].module, ".");
        assert_eq!(table.imports[0].member.as_deref(), Some("sibling"));
        assert_eq!(table.imports[1].module, "..pkg.mod");
        assert_eq!(table.imports[1].local_name, "alias");
        assert_eq!(table.imports[1].member.as_deref(), Some("thing"));
    }

    #[test]
    fn empty_file_has_no_definitions() {
        let table = extract_definitions("empty.py", "").unwrap();
        assert!(table.definitions.is_empty());
        assert!(table.imports.is_empty());
    }
}
