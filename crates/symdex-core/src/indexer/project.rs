//! In-memory project index: name lookups over every indexed file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::errors::{SymdexError, SymdexResult};
use crate::indexer::filesystem::relative_path;
use crate::models::{DefinitionKind, DefinitionRecord, FileEntry, Span, SymbolSummary};

/// Position of one definition inside a [`ProjectIndex`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefRef {
    pub file: usize,
    pub index: usize,
}

pub const CLASS_KINDS: &[DefinitionKind] = &[DefinitionKind::Class];
pub const CALLABLE_KINDS: &[DefinitionKind] = &[DefinitionKind::Function, DefinitionKind::Method];

#[derive(Clone, Copy, Debug)]
pub struct LookupQuery<'a> {
    pub name: &'a str,
    pub kinds: &'a [DefinitionKind],
    /// Strict filter on the enclosing class.
    pub enclosing_class: Option<&'a str>,
    /// Preferred file; other files remain candidates.
    pub file_hint: Option<&'a str>,
}

/// Immutable snapshot of one project's definitions.
#[derive(Debug)]
pub struct ProjectIndex {
    root: PathBuf,
    files: Vec<FileEntry>,
    rel_paths: Vec<String>,
    by_path: HashMap<String, usize>,
    /// Non-nested definitions by name, ordered by (file path, span start).
    by_name: HashMap<String, Vec<DefRef>>,
}

impl ProjectIndex {
    /// Fold per-file entries into an index; entry order does not matter.
    pub fn from_entries(root: &Path, mut entries: Vec<FileEntry>) -> Self {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries.dedup_by(|a, b| a.path == b.path);

        let rel_paths = entries
            .iter()
            .map(|e| relative_path(root, Path::new(&e.path)))
            .collect();
        let by_path = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.path.clone(), i))
            .collect();

        let mut by_name: HashMap<String, Vec<DefRef>> = HashMap::new();
        for (file, entry) in entries.iter().enumerate() {
            let mut order: Vec<usize> = (0..entry.definitions.len()).collect();
            order.sort_by_key(|&i| entry.definitions[i].span.start_byte);
            for index in order {
                let record = &entry.definitions[index];
                if record.nested {
                    continue;
                }
                by_name
                    .entry(record.name.clone())
                    .or_default()
                    .push(DefRef { file, index });
            }
        }

        Self {
            root: root.to_path_buf(),
            files: entries,
            rel_paths,
            by_path,
            by_name,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn file(&self, file: usize) -> &FileEntry {
        &self.files[file]
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Every extracted definition, nested ones included.
    pub fn definition_count(&self) -> usize {
        self.files.iter().map(|f| f.definitions.len()).sum()
    }

    pub fn file_index(&self, path: &str) -> Option<usize> {
        self.by_path.get(path).copied()
    }

    pub fn relative(&self, file: usize) -> &str {
        &self.rel_paths[file]
    }

    pub fn record(&self, def: DefRef) -> &DefinitionRecord {
        &self.files[def.file].definitions[def.index]
    }

    pub fn content(&self, def: DefRef) -> Option<&str> {
        let entry = &self.files[def.file];
        entry.content_of(&entry.definitions[def.index])
    }

    fn refs_in_file(&self, file: usize) -> impl Iterator<Item = DefRef> + '_ {
        (0..self.files[file].definitions.len()).map(move |index| DefRef { file, index })
    }

    // -- lookups -------------------------------------------------------------

    /// Candidates for a query: hinted files first, then the rest, each group
    /// in (file path, span start) order.
    pub fn lookup(&self, query: &LookupQuery<'_>) -> SymdexResult<Vec<DefRef>> {
        let candidates: Vec<DefRef> = self
            .by_name
            .get(query.name)
            .map(|refs| {
                refs.iter()
                    .copied()
                    .filter(|&r| {
                        let record = self.record(r);
                        query.kinds.contains(&record.kind)
                            && query
                                .enclosing_class
                                .map_or(true, |c| record.enclosing_class.as_deref() == Some(c))
                    })
                    .collect()
            })
            .unwrap_or_default();

        if candidates.is_empty() {
            let kind = if query.kinds == CLASS_KINDS {
                "Class"
            } else {
                "Function"
            };
            return Err(SymdexError::SymbolNotFound {
                kind,
                name: match query.enclosing_class {
                    Some(class_name) => format!("{class_name}.{}", query.name),
                    None => query.name.to_string(),
                },
            });
        }

        let Some(hint) = query.file_hint else {
            return Ok(candidates);
        };
        let (mut preferred, rest): (Vec<DefRef>, Vec<DefRef>) = candidates
            .into_iter()
            .partition(|r| self.matches_file_hint(r.file, hint));
        preferred.extend(rest);
        Ok(preferred)
    }

    /// True when `hint` is the file's absolute path, its root-relative path,
    /// or a whole-component suffix of it.
    pub fn matches_file_hint(&self, file: usize, hint: &str) -> bool {
        let hint = hint.trim().replace('\\', "/");
        let hint = hint.trim_start_matches("./");
        if hint.is_empty() {
            return false;
        }
        let path = self.files[file].path.replace('\\', "/");
        if path == hint || self.rel_paths[file] == hint {
            return true;
        }
        path.ends_with(&format!("/{hint}"))
    }

    /// First module-level definition named `name` in `file`.
    pub fn top_level_in_file(&self, file: usize, name: &str) -> Option<DefRef> {
        self.by_name.get(name)?.iter().copied().find(|&r| {
            r.file == file && self.record(r).enclosing_class.is_none()
        })
    }

    pub fn method_in_class(&self, file: usize, class_name: &str, name: &str) -> Option<DefRef> {
        self.by_name.get(name)?.iter().copied().find(|&r| {
            let record = self.record(r);
            r.file == file
                && record.kind == DefinitionKind::Method
                && record.enclosing_class.as_deref() == Some(class_name)
        })
    }

    /// Innermost class named `class_name` whose span contains `span`.
    pub fn class_containing(&self, file: usize, class_name: &str, span: &Span) -> Option<DefRef> {
        self.refs_in_file(file)
            .filter(|&r| {
                let record = self.record(r);
                record.kind == DefinitionKind::Class
                    && record.name == class_name
                    && record.span.contains(span)
                    && record.span != *span
            })
            .min_by_key(|&r| {
                let s = self.record(r).span;
                s.end_byte - s.start_byte
            })
    }

    /// Files living in the same directory as `file`, excluding it.
    pub fn sibling_files(&self, file: usize) -> Vec<usize> {
        let dir = Path::new(&self.files[file].path).parent();
        (0..self.files.len())
            .filter(|&i| i != file && Path::new(&self.files[i].path).parent() == dir)
            .collect()
    }

    /// All non-nested definitions named `name`, in project order.
    pub fn named(&self, name: &str) -> &[DefRef] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    // -- module paths --------------------------------------------------------

    /// Map a dotted (possibly relative) module name, as imported from
    /// `from_file`, to an indexed file.
    pub fn resolve_module(&self, from_file: usize, module: &str) -> Option<usize> {
        let dots = module.chars().take_while(|&c| c == '.').count();
        let rest = &module[dots..];
        let segments: Vec<&str> = rest.split('.').filter(|s| !s.is_empty()).collect();

        if dots > 0 {
            let mut base = Path::new(&self.files[from_file].path).parent()?.to_path_buf();
            for _ in 1..dots {
                base = base.parent()?.to_path_buf();
            }
            for segment in &segments {
                base.push(segment);
            }
            let candidates = if segments.is_empty() {
                vec![base.join("__init__.py"), base.join("__init__.pyi")]
            } else {
                vec![
                    base.with_extension("py"),
                    base.with_extension("pyi"),
                    base.join("__init__.py"),
                    base.join("__init__.pyi"),
                ]
            };
            return candidates
                .iter()
                .find_map(|p| self.file_index(&p.to_string_lossy()));
        }

        if segments.is_empty() {
            return None;
        }
        let stem = segments.join("/");
        let suffixes = [
            format!("{stem}.py"),
            format!("{stem}.pyi"),
            format!("{stem}/__init__.py"),
            format!("{stem}/__init__.pyi"),
        ];
        let mut matches: Vec<usize> = (0..self.files.len())
            .filter(|&i| {
                let rel = &self.rel_paths[i];
                suffixes
                    .iter()
                    .any(|s| rel == s || rel.ends_with(&format!("/{s}")))
            })
            .collect();
        matches.sort_by(|&a, &b| {
            self.rel_paths[a]
                .len()
                .cmp(&self.rel_paths[b].len())
                .then_with(|| self.rel_paths[a].cmp(&self.rel_paths[b]))
        });
        matches.first().copied()
    }

    // -- listings ------------------------------------------------------------

    /// Every definition, optionally restricted to files matching `file_hint`,
    /// ordered by (file path, span start).
    pub fn list_symbols(&self, file_hint: Option<&str>) -> Vec<SymbolSummary> {
        let mut out = Vec::new();
        for (file, entry) in self.files.iter().enumerate() {
            if let Some(hint) = file_hint {
                if !self.matches_file_hint(file, hint) {
                    continue;
                }
            }
            let mut records: Vec<&DefinitionRecord> = entry.definitions.iter().collect();
            records.sort_by_key(|d| d.span.start_byte);
            out.extend(records.into_iter().map(|d| SymbolSummary {
                name: d.name.clone(),
                kind: d.kind,
                enclosing_class: d.enclosing_class.clone(),
                file_path: entry.path.clone(),
                start_line: d.span.start_line,
            }));
        }
        out
    }
}

/// Canonicalize an absolute hint so it compares equal to indexed paths.
pub fn normalize_file_hint(hint: &str) -> String {
    let trimmed = hint.trim();
    let path = Path::new(trimmed);
    if path.is_absolute() {
        if let Ok(canonical) = std::fs::canonicalize(path) {
            return canonical.to_string_lossy().to_string();
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::symbols::extract_definitions;
    use std::sync::Arc;

    fn entry(path: &str, source: &str) -> FileEntry {
        let table = extract_definitions(path, source).unwrap();
        FileEntry {
            path: path.to_string(),
            fingerprint: String::new(),
            definitions: table.definitions,
            imports: table.imports,
            last_indexed_at: 0,
            text: Arc::from(source),
        }
    }

    fn index() -> ProjectIndex {
        ProjectIndex::from_entries(
            Path::new("/proj"),
            vec![
                entry("/proj/pkg/b.py", "def process():\n    return 'b'\n"),
                entry(
                    "/proj/pkg/a.py",
                    "def process():\n    return 'a'\n\nclass Worker:\n    def process(self):\n        return 'w'\n",
                ),
                entry("/proj/data.py", "def helper():\n    def inner():\n        pass\n    return inner\n"),
                entry("/proj/pkg/__init__.py", "from .a import process\n"),
                entry("/proj/lib/util/__init__.py", "def u():\n    pass\n"),
                entry("/proj/vendor/lib/util/__init__.py", "def u():\n    pass\n"),
            ],
        )
    }

    fn paths(index: &ProjectIndex, refs: &[DefRef]) -> Vec<String> {
        refs.iter().map(|r| index.record(*r).file_path.clone()).collect()
    }

    #[test]
    fn lookup_orders_by_path_and_span() {
        let index = index();
        let refs = index
            .lookup(&LookupQuery {
                name: "process",
                kinds: CALLABLE_KINDS,
                enclosing_class: None,
                file_hint: None,
            })
            .unwrap();
        assert_eq!(
            paths(&index, &refs),
            vec!["/proj/pkg/a.py", "/proj/pkg/a.py", "/proj/pkg/b.py"]
        );
        assert_eq!(index.record(refs[0]).kind, DefinitionKind::Function);
    }

    #[test]
    fn file_hint_is_preferred_not_exclusive() {
        let index = index();
        let refs = index
            .lookup(&LookupQuery {
                name: "process",
                kinds: CALLABLE_KINDS,
                enclosing_class: None,
                file_hint: Some("b.py"),
            })
            .unwrap();
        assert_eq!(index.record(refs[0]).file_path, "/proj/pkg/b.py");
        assert_eq!(refs.len(), 3);
    }

    #[test]
    fn enclosing_class_is_strict() {
        let index = index();
        let refs = index
            .lookup(&LookupQuery {
                name: "process",
                kinds: CALLABLE_KINDS,
                enclosing_class: Some("Worker"),
                file_hint: None,
            })
            .unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(index.record(refs[0]).kind, DefinitionKind::Method);

        let err = index
            .lookup(&LookupQuery {
                name: "process",
                kinds: CALLABLE_KINDS,
                enclosing_class: Some("Nope"),
                file_hint: None,
            })
            .unwrap_err();
        assert_eq!(err.kind(), "symbol_not_found");
        assert!(err.to_string().contains("Nope.process"));
    }

    #[test]
    fn nested_definitions_are_not_looked_up() {
        let index = index();
        let err = index
            .lookup(&LookupQuery {
                name: "inner",
                kinds: CALLABLE_KINDS,
                enclosing_class: None,
                file_hint: None,
            })
            .unwrap_err();
        assert!(matches!(err, SymdexError::SymbolNotFound { .. }));
        assert_eq!(index.definition_count(), 8);
    }

    #[test]
    fn file_hint_matching_is_component_based() {
        let index = index();
        let a = index.file_index("/proj/pkg/a.py").unwrap();
        let data = index.file_index("/proj/data.py").unwrap();
        assert!(index.matches_file_hint(a, "a.py"));
        assert!(index.matches_file_hint(a, "pkg/a.py"));
        assert!(index.matches_file_hint(a, "./pkg/a.py"));
        assert!(index.matches_file_hint(a, "/proj/pkg/a.py"));
        assert!(!index.matches_file_hint(data, "a.py"));
        assert!(!index.matches_file_hint(a, ""));
    }

    #[test]
    fn resolves_relative_and_absolute_modules() {
        let index = index();
        let init = index.file_index("/proj/pkg/__init__.py").unwrap();
        let a = index.file_index("/proj/pkg/a.py").unwrap();
        let data = index.file_index("/proj/data.py").unwrap();

        assert_eq!(index.resolve_module(init, ".a"), Some(a));
        assert_eq!(index.resolve_module(a, "."), Some(init));
        assert_eq!(index.resolve_module(a, "..data"), Some(data));
        assert_eq!(index.resolve_module(data, "pkg.a"), Some(a));
        assert_eq!(index.resolve_module(data, "pkg"), Some(init));
        assert_eq!(
            index.resolve_module(data, "lib.util"),
            index.file_index("/proj/lib/util/__init__.py")
        );
        assert_eq!(index.resolve_module(data, "missing.mod"), None);
    }

    #[test]
    fn list_symbols_filters_by_hint() {
        let index = index();
        let all = index.list_symbols(None);
        assert_eq!(all.len(), index.definition_count());
        assert_eq!(all[0].file_path, "/proj/data.py");

        let only_a = index.list_symbols(Some("pkg/a.py"));
        let names: Vec<&str> = only_a.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["process", "Worker", "process"]);
        assert_eq!(only_a[2].enclosing_class.as_deref(), Some("Worker"));
    }

    #[test]
    fn class_containing_finds_host_class() {
        let index = index();
        let a = index.file_index("/proj/pkg/a.py").unwrap();
        let method = index.method_in_class(a, "Worker", "process").unwrap();
        let span = index.record(method).span;
        let class = index.class_containing(a, "Worker", &span).unwrap();
        assert_eq!(index.record(class).name, "Worker");
        assert!(index.content(class).unwrap().starts_with("class Worker"));
    }
}
