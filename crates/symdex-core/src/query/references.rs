//! Syntactic reference collection for one definition.
//!
//! Produces the identifiers a definition's body reads, classified by how they
//! are used. Names bound locally (parameters, assignment targets, loop and
//! `with` targets, nested definitions) are dropped here; everything else is
//! left for the resolver, which silently ignores what it cannot place.

use std::collections::HashSet;

use indexmap::IndexSet;
use tree_sitter::{Node, Tree};

use crate::indexer::symbols::node_text;
use crate::models::{DefinitionKind, DefinitionRecord, EdgeReason, Span};
use crate::query::guards::MAX_SYNTAX_DEPTH;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    /// A free identifier.
    Name(String),
    /// `root.a.b`: the full dotted chain up to the accessed member.
    Dotted(Vec<String>),
    /// `self.m` / `cls.m` inside a class.
    SelfMember(String),
    /// `super().m`, `super(C, self).m`, or `Base.m(self)` with `via = Base`.
    Super { method: String, via: Option<String> },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Reference {
    pub target: Target,
    pub reason: EdgeReason,
}

/// Locate the syntax node a definition record was extracted from.
///
/// Returns the node covering the recorded span (a `decorated_definition`
/// when decorators are present).
pub fn find_definition_node<'t>(tree: &'t Tree, span: &Span) -> Option<Node<'t>> {
    let root = tree.root_node();
    let mut node = root.descendant_for_byte_range(span.start_byte, span.end_byte)?;
    loop {
        if node.start_byte() == span.start_byte
            && node.end_byte() == span.end_byte
            && matches!(
                node.kind(),
                "class_definition" | "function_definition" | "decorated_definition"
            )
        {
            return Some(node);
        }
        node = node.parent()?;
    }
}

fn inner_definition(outer: Node<'_>) -> Node<'_> {
    if outer.kind() == "decorated_definition" {
        outer.child_by_field_name("definition").unwrap_or(outer)
    } else {
        outer
    }
}

/// References made by `record`, in source order, without duplicates.
pub fn collect_references(tree: &Tree, source: &str, record: &DefinitionRecord) -> Vec<Reference> {
    let Some(outer) = find_definition_node(tree, &record.span) else {
        return Vec::new();
    };
    let def_node = inner_definition(outer);

    let mut bound = HashSet::new();
    collect_bound(def_node, source, &mut bound, true, 0);

    let class_ctx = match record.kind {
        DefinitionKind::Class => Some(ClassCtx {
            name: record.name.clone(),
            bases: record.base_classes.clone(),
        }),
        DefinitionKind::Method => record.enclosing_class.as_ref().map(|name| ClassCtx {
            name: name.clone(),
            bases: class_bases_from_tree(def_node, source, name),
        }),
        DefinitionKind::Function => None,
    };

    let mut collector = Collector {
        source,
        bound,
        out: IndexSet::new(),
    };
    collector.definition(outer, def_node, class_ctx.as_ref(), 0);
    collector.out.into_iter().collect()
}

/// Declared bases of the class named `class_name` enclosing `method_node`.
fn class_bases_from_tree(method_node: Node<'_>, source: &str, class_name: &str) -> Vec<String> {
    let mut current = method_node.parent();
    while let Some(node) = current {
        if node.kind() == "class_definition" {
            let name = node
                .child_by_field_name("name")
                .map(|n| node_text(n, source));
            if name == Some(class_name) {
                return positional_bases(node)
                    .into_iter()
                    .map(|b| node_text(b, source).to_string())
                    .collect();
            }
        }
        current = node.parent();
    }
    Vec::new()
}

fn positional_bases(class_node: Node<'_>) -> Vec<Node<'_>> {
    let Some(args) = class_node.child_by_field_name("superclasses") else {
        return Vec::new();
    };
    let mut cursor = args.walk();
    args.named_children(&mut cursor)
        .filter(|a| {
            !matches!(
                a.kind(),
                "keyword_argument" | "list_splat" | "dictionary_splat" | "comment"
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Bound names
// ---------------------------------------------------------------------------

fn bind_targets(node: Node<'_>, source: &str, bound: &mut HashSet<String>) {
    match node.kind() {
        "identifier" => {
            bound.insert(node_text(node, source).to_string());
        }
        "attribute" | "subscript" => {}
        _ => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                bind_targets(child, source, bound);
            }
        }
    }
}

fn bind_parameters(params: Node<'_>, source: &str, bound: &mut HashSet<String>) {
    let mut cursor = params.walk();
    for param in params.named_children(&mut cursor) {
        match param.kind() {
            "identifier" => {
                bound.insert(node_text(param, source).to_string());
            }
            "default_parameter" | "typed_default_parameter" => {
                if let Some(name) = param.child_by_field_name("name") {
                    bind_targets(name, source, bound);
                }
            }
            "typed_parameter" => {
                if let Some(first) = param.named_child(0) {
                    bind_targets(first, source, bound);
                }
            }
            "list_splat_pattern" | "dictionary_splat_pattern" | "tuple_pattern" => {
                bind_targets(param, source, bound);
            }
            _ => {}
        }
    }
}

/// Names bound anywhere inside a definition. `top` marks the definition
/// itself, whose own name is not a local binding.
fn collect_bound(node: Node<'_>, source: &str, bound: &mut HashSet<String>, top: bool, depth: usize) {
    if depth > MAX_SYNTAX_DEPTH {
        return;
    }
    match node.kind() {
        "function_definition" => {
            if !top && !is_class_body_member(node) {
                if let Some(name) = node.child_by_field_name("name") {
                    bound.insert(node_text(name, source).to_string());
                }
            }
            if let Some(params) = node.child_by_field_name("parameters") {
                bind_parameters(params, source, bound);
            }
        }
        "class_definition" => {
            if !top && !is_class_body_member(node) {
                if let Some(name) = node.child_by_field_name("name") {
                    bound.insert(node_text(name, source).to_string());
                }
            }
        }
        "lambda" => {
            if let Some(params) = node.child_by_field_name("parameters") {
                bind_parameters(params, source, bound);
            }
        }
        "assignment" | "augmented_assignment" | "for_statement" | "for_in_clause" => {
            if let Some(left) = node.child_by_field_name("left") {
                bind_targets(left, source, bound);
            }
        }
        "named_expression" => {
            if let Some(name) = node.child_by_field_name("name") {
                bind_targets(name, source, bound);
            }
        }
        "as_pattern" => {
            if let Some(alias) = node.child_by_field_name("alias") {
                bind_targets(alias, source, bound);
            }
        }
        "except_clause" => {
            if let Some(alias) = node.child_by_field_name("alias") {
                bind_targets(alias, source, bound);
            }
            // `except E as name` without an as_pattern wrapper.
            let mut after_as = false;
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                if after_as && child.kind() == "identifier" {
                    bound.insert(node_text(child, source).to_string());
                }
                after_as = child.kind() == "as";
            }
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_bound(child, source, bound, false, depth + 1);
    }
}

/// Methods and nested classes directly in a class body are attributes, not
/// locals.
fn is_class_body_member(def_node: Node<'_>) -> bool {
    let mut parent = def_node.parent();
    if let Some(p) = parent {
        if p.kind() == "decorated_definition" {
            parent = p.parent();
        }
    }
    parent
        .filter(|p| p.kind() == "block")
        .and_then(|block| block.parent())
        .is_some_and(|owner| owner.kind() == "class_definition")
}

// ---------------------------------------------------------------------------
// Reference walk
// ---------------------------------------------------------------------------

struct ClassCtx {
    name: String,
    bases: Vec<String>,
}

struct Collector<'s> {
    source: &'s str,
    bound: HashSet<String>,
    out: IndexSet<Reference>,
}

enum Chain<'t> {
    /// Dotted identifiers, root first.
    Names(Vec<String>),
    /// `super(...)`, then the accessed attributes.
    Super(Vec<String>),
    /// Anything else at the root; must be walked on its own.
    Opaque(Node<'t>),
}

impl<'s> Collector<'s> {
    fn text(&self, node: Node<'_>) -> &'s str {
        node_text(node, self.source)
    }

    fn push(&mut self, target: Target, reason: EdgeReason) {
        self.out.insert(Reference { target, reason });
    }

    fn is_free(&self, name: &str) -> bool {
        !name.is_empty()
            && !matches!(name, "self" | "cls" | "super")
            && !self.bound.contains(name)
    }

    /// Entry point for a class or function, `outer` carrying any decorators.
    fn definition(&mut self, outer: Node<'_>, def_node: Node<'_>, ctx: Option<&ClassCtx>, depth: usize) {
        if depth > MAX_SYNTAX_DEPTH {
            return;
        }
        let is_class = def_node.kind() == "class_definition";

        if is_class {
            self.superclasses(def_node, ctx, depth);
        }
        if outer.kind() == "decorated_definition" {
            let mut cursor = outer.walk();
            for child in outer.named_children(&mut cursor) {
                if child.kind() == "decorator" {
                    self.walk(child, ctx, depth + 1);
                }
            }
        }

        let inner_ctx;
        let body_ctx = if is_class {
            inner_ctx = ClassCtx {
                name: self.text_of_field(def_node, "name").to_string(),
                bases: positional_bases(def_node)
                    .into_iter()
                    .map(|b| self.text(b).to_string())
                    .collect(),
            };
            Some(&inner_ctx)
        } else {
            ctx
        };

        let mut cursor = def_node.walk();
        for child in def_node.named_children(&mut cursor) {
            let field = field_name_of(def_node, child);
            match field {
                Some("name") | Some("superclasses") => {}
                _ => self.walk(child, body_ctx, depth + 1),
            }
        }
    }

    fn text_of_field(&self, node: Node<'_>, field: &str) -> &'s str {
        node.child_by_field_name(field)
            .map(|n| self.text(n))
            .unwrap_or("")
    }

    fn superclasses(&mut self, class_node: Node<'_>, ctx: Option<&ClassCtx>, depth: usize) {
        let Some(args) = class_node.child_by_field_name("superclasses") else {
            return;
        };
        let mut cursor = args.walk();
        for arg in args.named_children(&mut cursor) {
            match arg.kind() {
                "keyword_argument" => {
                    if let Some(value) = arg.child_by_field_name("value") {
                        self.walk(value, ctx, depth + 1);
                    }
                }
                "list_splat" | "dictionary_splat" | "comment" => {
                    self.walk(arg, ctx, depth + 1);
                }
                _ => self.base_expression(arg, ctx, depth + 1),
            }
        }
    }

    fn base_expression(&mut self, node: Node<'_>, ctx: Option<&ClassCtx>, depth: usize) {
        match node.kind() {
            "identifier" => {
                let name = self.text(node);
                if self.is_free(name) {
                    self.push(Target::Name(name.to_string()), EdgeReason::BaseClass);
                }
            }
            "attribute" => self.attribute(node, EdgeReason::BaseClass, None, ctx, depth),
            // Generic[T] and friends: the subscripted value is the base.
            "subscript" | "generic_type" => {
                let value = node
                    .child_by_field_name("value")
                    .or_else(|| node.named_child(0));
                if let Some(value) = value {
                    self.base_expression(value, ctx, depth + 1);
                }
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor).skip(1) {
                    self.walk(child, ctx, depth + 1);
                }
            }
            _ => self.walk(node, ctx, depth),
        }
    }

    fn walk(&mut self, node: Node<'_>, ctx: Option<&ClassCtx>, depth: usize) {
        if depth > MAX_SYNTAX_DEPTH {
            return;
        }
        match node.kind() {
            "import_statement"
            | "import_from_statement"
            | "future_import_statement"
            | "global_statement"
            | "nonlocal_statement"
            | "comment" => {}
            "class_definition" | "function_definition" => {
                self.definition(node, node, ctx, depth + 1);
            }
            "decorated_definition" => {
                let def_node = inner_definition(node);
                self.definition(node, def_node, ctx, depth + 1);
            }
            "call" => self.call(node, ctx, depth),
            "attribute" => self.attribute(node, EdgeReason::Attribute, None, ctx, depth),
            "keyword_argument" => {
                if let Some(value) = node.child_by_field_name("value") {
                    self.walk(value, ctx, depth + 1);
                }
            }
            "identifier" => {
                let name = self.text(node);
                if self.is_free(name) {
                    self.push(Target::Name(name.to_string()), EdgeReason::Name);
                }
            }
            _ => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    self.walk(child, ctx, depth + 1);
                }
            }
        }
    }

    fn call(&mut self, node: Node<'_>, ctx: Option<&ClassCtx>, depth: usize) {
        let arguments = node.child_by_field_name("arguments");
        if let Some(function) = node.child_by_field_name("function") {
            match function.kind() {
                "identifier" => {
                    let name = self.text(function);
                    if name == "super" {
                        // Bare `super(...)` with no member access.
                        return;
                    }
                    if self.is_free(name) {
                        self.push(Target::Name(name.to_string()), EdgeReason::Call);
                    }
                }
                "attribute" => {
                    let first_arg = arguments.and_then(|a| a.named_child(0));
                    self.attribute(function, EdgeReason::Call, first_arg, ctx, depth + 1);
                }
                _ => self.walk(function, ctx, depth + 1),
            }
        }
        if let Some(arguments) = arguments {
            self.walk(arguments, ctx, depth + 1);
        }
    }

    fn chain<'t>(&self, node: Node<'t>) -> Chain<'t> {
        let mut parts = Vec::new();
        let mut current = node;
        while current.kind() == "attribute" {
            if let Some(attr) = current.child_by_field_name("attribute") {
                parts.push(self.text(attr).to_string());
            }
            match current.child_by_field_name("object") {
                Some(object) => current = object,
                None => return Chain::Opaque(current),
            }
        }
        parts.reverse();
        match current.kind() {
            "identifier" => {
                parts.insert(0, self.text(current).to_string());
                Chain::Names(parts)
            }
            "call" => {
                let is_super = current
                    .child_by_field_name("function")
                    .is_some_and(|f| f.kind() == "identifier" && self.text(f) == "super");
                if is_super {
                    Chain::Super(parts)
                } else {
                    Chain::Opaque(current)
                }
            }
            _ => Chain::Opaque(current),
        }
    }

    /// Classify an attribute chain. `first_arg` is the first call argument
    /// when the chain is being called.
    fn attribute(
        &mut self,
        node: Node<'_>,
        reason: EdgeReason,
        first_arg: Option<Node<'_>>,
        ctx: Option<&ClassCtx>,
        depth: usize,
    ) {
        match self.chain(node) {
            Chain::Super(parts) => {
                if let Some(method) = parts.first() {
                    self.push(
                        Target::Super {
                            method: method.clone(),
                            via: None,
                        },
                        EdgeReason::SuperCall,
                    );
                }
            }
            Chain::Names(parts) => {
                let root = parts[0].as_str();
                if matches!(root, "self" | "cls") {
                    if ctx.is_some() && parts.len() >= 2 {
                        self.push(Target::SelfMember(parts[1].clone()), EdgeReason::Attribute);
                    }
                    return;
                }
                if !self.is_free(root) {
                    return;
                }
                let explicit_super = parts.len() == 2
                    && first_arg.is_some_and(|a| a.kind() == "identifier" && self.text(a) == "self")
                    && ctx.is_some_and(|c| c.bases.iter().any(|b| b == root));
                if explicit_super {
                    self.push(
                        Target::Super {
                            method: parts[1].clone(),
                            via: Some(root.to_string()),
                        },
                        EdgeReason::SuperCall,
                    );
                    return;
                }
                let reason = match reason {
                    EdgeReason::Call => EdgeReason::Attribute,
                    other => other,
                };
                self.push(Target::Dotted(parts), reason);
            }
            Chain::Opaque(root) => self.walk(root, ctx, depth + 1),
        }
    }
}

fn field_name_of(parent: Node<'_>, child: Node<'_>) -> Option<&'static str> {
    let mut cursor = parent.walk();
    if !cursor.goto_first_child() {
        return None;
    }
    loop {
        if cursor.node() == child {
            return cursor.field_name();
        }
        if !cursor.goto_next_sibling() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::parser::parse_python;
    use crate::indexer::symbols::extract_from_tree;

    fn refs_for(source: &str, name: &str) -> Vec<Reference> {
        let tree = parse_python("t.py", source).unwrap();
        let table = extract_from_tree("t.py", source, &tree);
        let record = table
            .definitions
            .iter()
            .find(|d| d.name == name)
            .unwrap_or_else(|| panic!("no definition {name}"));
        collect_references(&tree, source, record)
    }

    fn name(n: &str, reason: EdgeReason) -> Reference {
        Reference {
            target: Target::Name(n.to_string()),
            reason,
        }
    }

    #[test]
    fn calls_and_names_skip_locals_and_parameters() {
        let source = "def run(items, flag=DEFAULT):\n    total = compute(items)\n    for item in items:\n        total += weigh(item)\n    with open_db() as db:\n        db.save(total)\n    return Result(total, flag)\n";
        let refs = refs_for(source, "run");
        assert_eq!(
            refs,
            vec![
                name("DEFAULT", EdgeReason::Name),
                name("compute", EdgeReason::Call),
                name("weigh", EdgeReason::Call),
                name("open_db", EdgeReason::Call),
                name("Result", EdgeReason::Call),
            ]
        );
    }

    #[test]
    fn class_bases_come_first() {
        let source = "@register\nclass Child(Base, mixins.Loggable, metaclass=Meta):\n    def __init__(self):\n        super().__init__()\n        self.setup()\n";
        let refs = refs_for(source, "Child");
        assert_eq!(refs[0], name("Base", EdgeReason::BaseClass));
        assert_eq!(
            refs[1],
            Reference {
                target: Target::Dotted(vec!["mixins".into(), "Loggable".into()]),
                reason: EdgeReason::BaseClass,
            }
        );
        assert!(refs.contains(&name("Meta", EdgeReason::Name)));
        assert!(refs.contains(&name("register", EdgeReason::Name)));
        assert!(refs.contains(&Reference {
            target: Target::Super {
                method: "__init__".into(),
                via: None
            },
            reason: EdgeReason::SuperCall,
        }));
        assert!(refs.contains(&Reference {
            target: Target::SelfMember("setup".into()),
            reason: EdgeReason::Attribute,
        }));
    }

    #[test]
    fn super_forms_inside_methods() {
        let source = "class C(A, B):\n    def go(self):\n        super(C, self).go()\n        A.go(self, 1)\n        B.other(x)\n";
        let refs = refs_for(source, "go");
        assert_eq!(
            refs[0],
            Reference {
                target: Target::Super {
                    method: "go".into(),
                    via: None
                },
                reason: EdgeReason::SuperCall,
            }
        );
        assert_eq!(
            refs[1],
            Reference {
                target: Target::Super {
                    method: "go".into(),
                    via: Some("A".into())
                },
                reason: EdgeReason::SuperCall,
            }
        );
        assert!(refs.contains(&Reference {
            target: Target::Dotted(vec!["B".into(), "other".into()]),
            reason: EdgeReason::Attribute,
        }));
    }

    #[test]
    fn dotted_chains_keep_module_prefix() {
        let source = "import pkg.sub\n\ndef f():\n    pkg.sub.helper()\n    return pkg.sub.CONST\n";
        let refs = refs_for(source, "f");
        assert_eq!(
            refs,
            vec![
                Reference {
                    target: Target::Dotted(vec!["pkg".into(), "sub".into(), "helper".into()]),
                    reason: EdgeReason::Attribute,
                },
                Reference {
                    target: Target::Dotted(vec!["pkg".into(), "sub".into(), "CONST".into()]),
                    reason: EdgeReason::Attribute,
                },
            ]
        );
    }

    #[test]
    fn chained_call_roots_are_walked() {
        let source = "def f():\n    return build().finish(extra=Marker)\n";
        let refs = refs_for(source, "f");
        assert_eq!(
            refs,
            vec![name("build", EdgeReason::Call), name("Marker", EdgeReason::Name)]
        );
    }

    #[test]
    fn nested_definitions_and_lambdas_are_local() {
        let source = "def outer():\n    def inner(x: Hint):\n        return x\n    key = lambda v: v.size\n    return [inner(k) for k in sorted(data, key=key) if (n := k)]\n";
        let refs = refs_for(source, "outer");
        assert_eq!(
            refs,
            vec![
                name("Hint", EdgeReason::Name),
                name("sorted", EdgeReason::Call),
                name("data", EdgeReason::Name),
            ]
        );
    }

    #[test]
    fn method_names_in_class_body_stay_visible() {
        let source = "def helper():\n    pass\n\nclass K:\n    def helper(self):\n        pass\n    def run(self):\n        return helper()\n";
        let refs = refs_for(source, "K");
        assert!(refs.contains(&name("helper", EdgeReason::Call)));
    }

    #[test]
    fn exception_aliases_are_bound() {
        let source = "def f():\n    try:\n        risky()\n    except KeyError as err:\n        report(err)\n";
        let refs = refs_for(source, "f");
        assert_eq!(
            refs,
            vec![
                name("risky", EdgeReason::Call),
                name("KeyError", EdgeReason::Name),
                name("report", EdgeReason::Call),
            ]
        );
    }

    #[test]
    fn missing_span_yields_nothing() {
        let source = "def f():\n    g()\n";
        let tree = parse_python("t.py", source).unwrap();
        let mut record = extract_from_tree("t.py", source, &tree).definitions.remove(0);
        record.span.start_byte += 1;
        assert!(collect_references(&tree, source, &record).is_empty());
    }
}
