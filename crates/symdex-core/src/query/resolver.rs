//! Dependency resolution: maps a definition's references onto project
//! definitions.

use std::cell::RefCell;
use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::debug;

use crate::errors::{SymdexError, SymdexResult};
use crate::indexer::parser::parse_python;
use crate::indexer::project::{DefRef, ProjectIndex};
use crate::models::{DefinitionKind, DependencyEdge, EdgeReason, ImportBinding};
use crate::query::guards::{MAX_MRO_LENGTH, MAX_REEXPORT_DEPTH};
use crate::query::references::{collect_references, Reference, Target};

/// Names that never resolve to project code unless shadowed by a same-file
/// definition or an explicit import.
const BUILTIN_NAMES: &[&str] = &[
    "abs", "all", "any", "ascii", "bin", "bool", "breakpoint", "bytearray", "bytes",
    "callable", "chr", "classmethod", "compile", "complex", "delattr", "dict", "dir",
    "divmod", "enumerate", "eval", "exec", "filter", "float", "format", "frozenset",
    "getattr", "globals", "hasattr", "hash", "help", "hex", "id", "input", "int",
    "isinstance", "issubclass", "iter", "len", "list", "locals", "map", "max",
    "memoryview", "min", "next", "object", "oct", "open", "ord", "pow", "print",
    "property", "range", "repr", "reversed", "round", "set", "setattr", "slice",
    "sorted", "staticmethod", "str", "sum", "super", "tuple", "type", "vars", "zip",
    "__import__", "NotImplemented", "Ellipsis", "__name__", "__file__",
    "BaseException", "Exception", "ArithmeticError", "AssertionError", "AttributeError",
    "EOFError", "ImportError", "ModuleNotFoundError", "IndexError", "KeyError",
    "KeyboardInterrupt", "LookupError", "MemoryError", "NameError", "NotImplementedError",
    "OSError", "IOError", "OverflowError", "RecursionError", "RuntimeError",
    "StopIteration", "StopAsyncIteration", "SyntaxError", "SystemExit", "TypeError",
    "UnicodeError", "UnicodeDecodeError", "UnicodeEncodeError", "ValueError",
    "ZeroDivisionError", "FileNotFoundError", "FileExistsError", "PermissionError",
    "TimeoutError", "ConnectionError", "Warning", "UserWarning", "DeprecationWarning",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_NAMES.contains(&name)
}

/// Own content plus resolved dependencies of one definition.
#[derive(Debug)]
pub struct Resolution {
    pub own_content: String,
    pub edges: Vec<DependencyEdge>,
    /// `(content, file_path)` in first-encountered order, unique by
    /// `(file_path, span)`.
    pub dependencies: Vec<(String, String)>,
}

pub struct Resolver<'a> {
    index: &'a ProjectIndex,
    /// Resolved bases per class.
    bases: RefCell<HashMap<DefRef, Vec<DefRef>>>,
    /// C3 linearization per class; `None` marks an inconsistent hierarchy.
    linearizations: RefCell<HashMap<DefRef, Option<Vec<DefRef>>>>,
}

impl<'a> Resolver<'a> {
    pub fn new(index: &'a ProjectIndex) -> Self {
        Self {
            index,
            bases: RefCell::new(HashMap::new()),
            linearizations: RefCell::new(HashMap::new()),
        }
    }

    pub fn resolve(&self, def: DefRef) -> SymdexResult<Resolution> {
        let index = self.index;
        let record = index.record(def);
        let entry = index.file(def.file);
        let own_content = index
            .content(def)
            .ok_or_else(|| SymdexError::CacheCorrupt {
                path: entry.path.clone(),
                message: format!("span of '{}' lies outside the file text", record.name),
            })?
            .to_string();

        let tree = parse_python(&entry.path, &entry.text)?;
        let references = collect_references(&tree, &entry.text, record);
        let class_ref = self.context_class(def);

        let mut seen: IndexMap<(usize, usize, usize), DependencyEdge> = IndexMap::new();
        for reference in &references {
            let Some(target) = self.resolve_reference(def.file, class_ref, reference) else {
                continue;
            };
            if self.overlaps_own(def, target) {
                continue;
            }
            let target = self.promote(def, target);
            let span = index.record(target).span;
            seen.entry((target.file, span.start_byte, span.end_byte))
                .or_insert_with(|| DependencyEdge {
                    from: record.clone(),
                    to: index.record(target).clone(),
                    reason: reference.reason,
                });
        }

        let mut dependencies = Vec::with_capacity(seen.len());
        for ((file, _, _), edge) in &seen {
            let entry = index.file(*file);
            if let Some(content) = entry.content_of(&edge.to) {
                dependencies.push((content.to_string(), entry.path.clone()));
            }
        }
        debug!(
            symbol = %record.qualified_name(),
            references = references.len(),
            dependencies = dependencies.len(),
            "resolved dependencies"
        );

        Ok(Resolution {
            own_content,
            edges: seen.into_values().collect(),
            dependencies,
        })
    }

    /// Same-file targets that enclose or sit inside the queried definition.
    fn overlaps_own(&self, def: DefRef, target: DefRef) -> bool {
        if target.file != def.file {
            return false;
        }
        let own = self.index.record(def).span;
        let other = self.index.record(target).span;
        own.contains(&other) || other.contains(&own)
    }

    /// Report a method through its host class, unless that class encloses
    /// the queried definition.
    fn promote(&self, def: DefRef, target: DefRef) -> DefRef {
        let record = self.index.record(target);
        if record.kind != DefinitionKind::Method {
            return target;
        }
        let Some(class_name) = record.enclosing_class.as_deref() else {
            return target;
        };
        match self.index.class_containing(target.file, class_name, &record.span) {
            Some(host) if !self.overlaps_own(def, host) => host,
            _ => target,
        }
    }

    /// Class whose `self`/`super` a definition's body sees.
    fn context_class(&self, def: DefRef) -> Option<DefRef> {
        let record = self.index.record(def);
        match record.kind {
            DefinitionKind::Class => Some(def),
            DefinitionKind::Method => {
                let class_name = record.enclosing_class.as_deref()?;
                self.index.class_containing(def.file, class_name, &record.span)
            }
            DefinitionKind::Function => None,
        }
    }

    fn resolve_reference(
        &self,
        file: usize,
        class_ref: Option<DefRef>,
        reference: &Reference,
    ) -> Option<DefRef> {
        match &reference.target {
            Target::Name(name) => self.resolve_name(file, name),
            Target::Dotted(parts) => self.resolve_dotted(file, parts),
            Target::SelfMember(member) => {
                let class_ref = class_ref?;
                self.mro(class_ref)
                    .into_iter()
                    .find_map(|c| self.method_of(c, member))
            }
            Target::Super { method, via } => {
                let class_ref = class_ref?;
                let chain = match via {
                    Some(base) => {
                        let base = self.resolve_class_expr(class_ref.file, base)?;
                        self.mro(base)
                    }
                    None => self.mro(class_ref).into_iter().skip(1).collect(),
                };
                chain.iter().find_map(|&c| self.method_of(c, method))
            }
        }
    }

    fn method_of(&self, class_ref: DefRef, member: &str) -> Option<DefRef> {
        let class_name = &self.index.record(class_ref).name;
        self.index.method_in_class(class_ref.file, class_name, member)
    }

    // -- names ---------------------------------------------------------------

    /// Resolve a free name as seen from `file`.
    pub fn resolve_name(&self, file: usize, name: &str) -> Option<DefRef> {
        if let Some(found) = self.index.top_level_in_file(file, name) {
            return Some(found);
        }
        let imports = &self.index.file(file).imports;
        if let Some(binding) = imports.iter().rev().find(|b| b.local_name == name) {
            return self.resolve_binding(file, binding, 0);
        }
        if is_builtin(name) {
            return None;
        }
        for binding in imports.iter().filter(|b| b.is_wildcard()) {
            let found = self
                .index
                .resolve_module(file, &binding.module)
                .and_then(|module| self.resolve_in_module(module, name, 1));
            if found.is_some() {
                return found;
            }
        }
        for sibling in self.index.sibling_files(file) {
            if let Some(found) = self.index.top_level_in_file(sibling, name) {
                return Some(found);
            }
        }
        self.index
            .named(name)
            .iter()
            .copied()
            .find(|&r| self.index.record(r).enclosing_class.is_none())
    }

    /// A name defined in, or re-exported by, the module file `module`.
    fn resolve_in_module(&self, module: usize, name: &str, depth: usize) -> Option<DefRef> {
        if depth > MAX_REEXPORT_DEPTH {
            return None;
        }
        if let Some(found) = self.index.top_level_in_file(module, name) {
            return Some(found);
        }
        let imports = &self.index.file(module).imports;
        if let Some(binding) = imports.iter().rev().find(|b| b.local_name == name) {
            return self.resolve_binding(module, binding, depth);
        }
        imports
            .iter()
            .filter(|b| b.is_wildcard())
            .find_map(|b| {
                let target = self.index.resolve_module(module, &b.module)?;
                self.resolve_in_module(target, name, depth + 1)
            })
    }

    fn resolve_binding(&self, file: usize, binding: &ImportBinding, depth: usize) -> Option<DefRef> {
        let member = binding.member.as_deref()?;
        let module = self.index.resolve_module(file, &binding.module)?;
        self.resolve_in_module(module, member, depth + 1)
    }

    /// Module file bound to `local` in `file`, if it names a module.
    fn module_binding(&self, file: usize, local: &str) -> Option<usize> {
        let binding = self
            .index
            .file(file)
            .imports
            .iter()
            .rev()
            .find(|b| b.local_name == local)?;
        match binding.member.as_deref() {
            None => self.index.resolve_module(file, &binding.module),
            Some(member) => self
                .index
                .resolve_module(file, &join_module(&binding.module, member)),
        }
    }

    fn resolve_dotted(&self, file: usize, parts: &[String]) -> Option<DefRef> {
        if parts.is_empty() {
            return None;
        }
        for k in (1..parts.len()).rev() {
            let prefix = parts[..k].join(".");
            let Some(mut module) = self.module_binding(file, &prefix) else {
                continue;
            };
            let mut module_name = self.index.relative(module).to_string();
            for part in &parts[k..] {
                if let Some(found) = self.resolve_in_module(module, part, 1) {
                    return Some(found);
                }
                module_name = submodule_name(&module_name, part);
                module = self.index.file_index(&self.absolute(&module_name)?)?;
            }
            return None;
        }
        self.resolve_name(file, &parts[0])
    }

    fn absolute(&self, relative: &str) -> Option<String> {
        let path = self.index.root().join(relative);
        Some(path.to_string_lossy().to_string()).filter(|p| self.index.file_index(p).is_some())
    }

    /// Resolve a base-class expression as written (`Base`, `mod.Base`,
    /// `Generic[T]`) to a class definition.
    fn resolve_class_expr(&self, file: usize, expr: &str) -> Option<DefRef> {
        let expr = expr.split('[').next().unwrap_or(expr).trim();
        let parts: Vec<String> = expr.split('.').map(|p| p.trim().to_string()).collect();
        let found = if parts.len() > 1 {
            self.resolve_dotted(file, &parts)
        } else {
            self.resolve_name(file, expr)
        }?;
        (self.index.record(found).kind == DefinitionKind::Class).then_some(found)
    }

    // -- method resolution order ---------------------------------------------

    fn bases(&self, class_ref: DefRef) -> Vec<DefRef> {
        if let Some(cached) = self.bases.borrow().get(&class_ref) {
            return cached.clone();
        }
        let record = self.index.record(class_ref);
        let resolved: Vec<DefRef> = record
            .base_classes
            .iter()
            .filter_map(|b| self.resolve_class_expr(class_ref.file, b))
            .filter(|&b| b != class_ref)
            .collect();
        self.bases.borrow_mut().insert(class_ref, resolved.clone());
        resolved
    }

    /// C3 linearization over resolvable bases, falling back to left-to-right
    /// depth-first order when the hierarchy is inconsistent.
    pub fn mro(&self, class_ref: DefRef) -> Vec<DefRef> {
        let mut visiting = Vec::new();
        match self.c3(class_ref, &mut visiting) {
            Some(order) => order,
            None => self.dfs_order(class_ref),
        }
    }

    fn c3(&self, class_ref: DefRef, visiting: &mut Vec<DefRef>) -> Option<Vec<DefRef>> {
        if let Some(cached) = self.linearizations.borrow().get(&class_ref) {
            return cached.clone();
        }
        if visiting.contains(&class_ref) || visiting.len() >= MAX_MRO_LENGTH {
            return None;
        }
        let order = self.linearize(class_ref, visiting);
        self.linearizations
            .borrow_mut()
            .insert(class_ref, order.clone());
        order
    }

    fn linearize(&self, class_ref: DefRef, visiting: &mut Vec<DefRef>) -> Option<Vec<DefRef>> {
        visiting.push(class_ref);
        let bases = self.bases(class_ref);
        let mut sequences = Vec::with_capacity(bases.len() + 1);
        for &base in &bases {
            sequences.push(self.c3(base, visiting)?);
        }
        sequences.push(bases);
        visiting.pop();

        let mut order = vec![class_ref];
        loop {
            sequences.retain(|s| !s.is_empty());
            if sequences.is_empty() {
                return Some(order);
            }
            let head = sequences
                .iter()
                .map(|s| s[0])
                .find(|candidate| !sequences.iter().any(|s| s[1..].contains(candidate)))?;
            order.push(head);
            if order.len() > MAX_MRO_LENGTH {
                return None;
            }
            for sequence in &mut sequences {
                if sequence[0] == head {
                    sequence.remove(0);
                }
            }
        }
    }

    fn dfs_order(&self, class_ref: DefRef) -> Vec<DefRef> {
        let mut order = Vec::new();
        let mut stack = vec![class_ref];
        while let Some(current) = stack.pop() {
            if order.contains(&current) {
                continue;
            }
            order.push(current);
            if order.len() >= MAX_MRO_LENGTH {
                break;
            }
            for base in self.bases(current).into_iter().rev() {
                stack.push(base);
            }
        }
        order
    }
}

fn join_module(module: &str, member: &str) -> String {
    if module.ends_with('.') {
        format!("{module}{member}")
    } else {
        format!("{module}.{member}")
    }
}

/// `pkg/__init__.py` + `sub` -> `pkg/sub.py`; `pkg/mod.py` + `sub` -> `pkg/mod/sub.py`.
fn submodule_name(module_rel: &str, part: &str) -> String {
    let dir = module_rel
        .strip_suffix("/__init__.py")
        .or_else(|| module_rel.strip_suffix("/__init__.pyi"))
        .or_else(|| module_rel.strip_suffix(".pyi"))
        .or_else(|| module_rel.strip_suffix(".py"))
        .unwrap_or(module_rel);
    format!("{dir}/{part}.py")
}
