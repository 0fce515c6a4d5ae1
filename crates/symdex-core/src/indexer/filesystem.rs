//! Filesystem scanning helpers for indexing passes.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::{DirEntry, WalkBuilder};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::errors::{SymdexError, SymdexResult};

const PYTHON_EXTENSIONS: &[&str] = &["py", "pyi"];

const IMPLICIT_IGNORED_DIRS: &[&str] = &[
    "__pycache__",
    "venv",
    "node_modules",
    "site-packages",
    "build",
    "dist",
];

/// Project-local ignore file, read with `.gitignore` syntax.
pub const IGNORE_FILE_NAME: &str = ".symdexignore";

/// Enumerates analyzable Python files below one project root.
///
/// `files()` builds a fresh walk every time it is called, so the sequence is
/// lazy and restartable.
#[derive(Clone, Debug)]
pub struct SourceWalker {
    root: PathBuf,
    max_depth: usize,
    excludes: GlobSet,
    skip_paths: Vec<PathBuf>,
    respect_gitignore: bool,
}

impl SourceWalker {
    pub fn new(root: &Path, config: &EngineConfig) -> SymdexResult<Self> {
        let root = canonical_project_root(root)?;
        let skip_paths = [Some(&config.cache_dir), config.log_dir.as_ref()]
            .into_iter()
            .flatten()
            .filter_map(|p| std::fs::canonicalize(p).ok())
            .collect();
        Ok(Self {
            root,
            max_depth: config.max_depth,
            excludes: compile_excludes(&config.extra_excludes),
            skip_paths,
            respect_gitignore: config.respect_gitignore,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> impl Iterator<Item = PathBuf> {
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(true)
            .parents(false)
            .git_ignore(self.respect_gitignore)
            .git_exclude(self.respect_gitignore)
            .git_global(false)
            .require_git(false)
            .follow_links(false)
            .max_depth(Some(self.max_depth))
            .sort_by_file_name(|a, b| a.cmp(b));
        builder.add_custom_ignore_filename(IGNORE_FILE_NAME);

        let excludes = self.excludes.clone();
        let skip_paths = self.skip_paths.clone();
        builder.filter_entry(move |entry| !is_excluded_dir(entry, &excludes, &skip_paths));

        builder
            .build()
            .filter_map(|result| match result {
                Ok(entry) => Some(entry),
                Err(err) => {
                    debug!(error = %err, "skipping unreadable entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .filter(|entry| is_python_source(entry.path()))
            .map(DirEntry::into_path)
    }
}

/// Canonicalize a project root, failing with `ProjectNotFound` unless it is
/// an existing directory.
pub fn canonical_project_root(root: &Path) -> SymdexResult<PathBuf> {
    let display = root.to_string_lossy().to_string();
    let canonical =
        std::fs::canonicalize(root).map_err(|_| SymdexError::ProjectNotFound(display.clone()))?;
    if !canonical.is_dir() {
        return Err(SymdexError::ProjectNotFound(display));
    }
    Ok(canonical)
}

/// Directory-name globs; patterns that fail to compile are skipped.
fn compile_excludes(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(err) => warn!(pattern = %pattern, error = %err, "ignoring invalid exclude pattern"),
        }
    }
    builder.build().unwrap_or_else(|err| {
        warn!(error = %err, "exclude patterns unusable; excluding nothing extra");
        GlobSet::empty()
    })
}

fn is_excluded_dir(entry: &DirEntry, excludes: &GlobSet, skip_paths: &[PathBuf]) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_some_and(|ft| ft.is_dir()) {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    if IMPLICIT_IGNORED_DIRS.contains(&name.as_ref()) || name.ends_with(".egg-info") {
        return true;
    }
    if excludes.is_match(name.as_ref()) {
        return true;
    }
    skip_paths.iter().any(|skip| entry.path() == skip.as_path())
}

pub fn is_python_source(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|ext| PYTHON_EXTENSIONS.contains(&ext.as_str()))
}

/// `path` relative to `root` with `/` separators; falls back to `path`.
pub fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// SHA-256 hex digest of raw file bytes.
pub fn content_fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn compute_content_hash(path: &Path) -> SymdexResult<String> {
    let data = std::fs::read(path)?;
    Ok(content_fingerprint(&data))
}
