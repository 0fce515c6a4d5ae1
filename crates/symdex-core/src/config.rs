//! Engine configuration resolved from `SYMDEX_*` environment variables.

use std::path::{Path, PathBuf};

use crate::query::guards::{clamp_depth, clamp_workers, DEFAULT_MAX_WALK_DEPTH};

/// Runtime knobs shared by every project the engine serves.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Directory holding one SQLite store per project root.
    pub cache_dir: PathBuf,
    /// Host log directory; skipped while walking when it lies inside a project.
    pub log_dir: Option<PathBuf>,
    /// Threads used for per-file extraction during a build.
    pub workers: usize,
    /// Maximum directory depth visited below a project root.
    pub max_depth: usize,
    /// Extra directory names (or `*` globs) to exclude.
    pub extra_excludes: Vec<String>,
    pub respect_gitignore: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            log_dir: None,
            workers: default_workers(),
            max_depth: DEFAULT_MAX_WALK_DEPTH,
            extra_excludes: Vec::new(),
            respect_gitignore: true,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(dir) = env_path("SYMDEX_CACHE_DIR") {
            config.cache_dir = dir;
        }
        config.log_dir = env_path("SYMDEX_LOG_DIR");

        if let Ok(val) = std::env::var("SYMDEX_WORKERS") {
            if let Ok(workers) = val.trim().parse::<usize>() {
                config.workers = clamp_workers(workers);
            }
        }
        if let Ok(val) = std::env::var("SYMDEX_MAX_DEPTH") {
            if let Ok(depth) = val.trim().parse::<usize>() {
                config.max_depth = clamp_depth(depth);
            }
        }
        if let Ok(val) = std::env::var("SYMDEX_EXCLUDE") {
            config.extra_excludes = parse_exclude_list(&val);
        }
        config.respect_gitignore = match std::env::var("SYMDEX_RESPECT_GITIGNORE") {
            Ok(val) => env_flag(&val),
            Err(_) => true,
        };

        config
    }

    /// Config rooted at an explicit cache directory, everything else default.
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }
}

fn env_flag(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    !matches!(v.as_str(), "0" | "false" | "no" | "off")
}

fn env_path(key: &str) -> Option<PathBuf> {
    let raw = std::env::var(key).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(expand_tilde(trimmed))
}

fn parse_exclude_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|p| p.trim().trim_end_matches('/').to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if path.len() > 2 {
                expanded.push(&path[2..]);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}

fn default_cache_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => Path::new(&home).join(".symdex").join("cache"),
        None => PathBuf::from("cache"),
    }
}

fn default_workers() -> usize {
    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    clamp_workers(available)
}
