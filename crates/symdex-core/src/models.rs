//! Shared typed models used across indexing, storage, and query layers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionKind {
    Class,
    Function,
    Method,
}

impl DefinitionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DefinitionKind::Class => "class",
            DefinitionKind::Function => "function",
            DefinitionKind::Method => "method",
        }
    }
}

/// Byte range plus 1-based inclusive line range inside a file's text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start_byte: usize,
    pub end_byte: usize,
    pub start_line: usize,
    pub end_line: usize,
}

impl Span {
    pub fn is_empty(&self) -> bool {
        self.end_byte <= self.start_byte
    }

    pub fn contains(&self, other: &Span) -> bool {
        self.start_byte <= other.start_byte && other.end_byte <= self.end_byte
    }

    /// Slice `text` by this span; `None` when the span no longer fits the text.
    pub fn slice<'a>(&self, text: &'a str) -> Option<&'a str> {
        text.get(self.start_byte..self.end_byte)
    }
}

/// One class, function, or method definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionRecord {
    pub kind: DefinitionKind,
    pub name: String,
    /// Present iff `kind` is `Method`.
    pub enclosing_class: Option<String>,
    pub file_path: String,
    pub span: Span,
    /// Base-class expressions exactly as written.
    pub base_classes: Vec<String>,
    pub doc_span: Option<Span>,
    /// Defined inside a function body; hidden from name lookups.
    pub nested: bool,
}

impl DefinitionRecord {
    pub fn qualified_name(&self) -> String {
        match &self.enclosing_class {
            Some(class_name) => format!("{class_name}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// One name bound by an import statement.
///
/// `import a.b` binds `a.b` to module `a.b`; `from x import y as z` binds `z`
/// to member `y` of module `x`. Wildcard imports use `*` as the local name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportBinding {
    pub local_name: String,
    pub module: String,
    pub member: Option<String>,
}

impl ImportBinding {
    pub fn is_wildcard(&self) -> bool {
        self.local_name == "*"
    }
}

/// The extraction result for one file; the unit persisted per path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionTable {
    pub definitions: Vec<DefinitionRecord>,
    pub imports: Vec<ImportBinding>,
}

/// One analyzed file together with the text its spans refer to.
#[derive(Clone, Debug)]
pub struct FileEntry {
    pub path: String,
    pub fingerprint: String,
    pub definitions: Vec<DefinitionRecord>,
    pub imports: Vec<ImportBinding>,
    /// Seconds since the Unix epoch.
    pub last_indexed_at: i64,
    pub text: Arc<str>,
}

impl FileEntry {
    pub fn content_of(&self, record: &DefinitionRecord) -> Option<&str> {
        record.span.slice(&self.text)
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeReason {
    Call,
    Attribute,
    BaseClass,
    SuperCall,
    Name,
}

#[derive(Clone, Debug)]
pub struct DependencyEdge {
    pub from: DefinitionRecord,
    pub to: DefinitionRecord,
    pub reason: EdgeReason,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Class,
    Func,
}

/// Response shared by `query_class` and `query_function`.
///
/// `dependency_paths[i]` is the file holding `dependency_contents[i]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueryResponse {
    pub kind: ResponseKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enclosing_class: Option<String>,
    pub file_path: String,
    pub dependency_contents: Vec<String>,
    pub dependency_paths: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SymbolSummary {
    pub name: String,
    pub kind: DefinitionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enclosing_class: Option<String>,
    pub file_path: String,
    pub start_line: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RebuildStats {
    pub files_indexed: usize,
    pub symbols_found: usize,
    pub elapsed_ms: u64,
}
