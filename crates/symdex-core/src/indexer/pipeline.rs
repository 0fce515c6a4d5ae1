//! Index build orchestration with Rayon-based parallelism.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::errors::{SymdexError, SymdexResult};
use crate::indexer::filesystem::SourceWalker;
use crate::indexer::project::ProjectIndex;
use crate::models::{FileEntry, RebuildStats};
use crate::store::fingerprint::FingerprintStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildMode {
    /// Reuse stored tables whose fingerprint still matches.
    Incremental,
    /// Treat every file as a cache miss.
    Forced,
}

fn extract_file_worker(
    store: &FingerprintStore,
    path: &Path,
    mode: BuildMode,
) -> SymdexResult<Option<FileEntry>> {
    let result = match mode {
        BuildMode::Incremental => store.get_or_extract(path),
        BuildMode::Forced => store.refresh(path),
    };
    match result {
        Ok(entry) => Ok(Some(entry)),
        // Vanished or unreadable between walk and read.
        Err(SymdexError::Io(err)) => {
            warn!(path = %path.display(), error = %err, "skipping unreadable file");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

pub fn parallel_extract(
    store: &FingerprintStore,
    paths: &[PathBuf],
    workers: usize,
    mode: BuildMode,
) -> SymdexResult<Vec<FileEntry>> {
    if paths.is_empty() {
        return Ok(vec![]);
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build();

    let results: SymdexResult<Vec<Option<FileEntry>>> = match pool {
        Ok(pool) => pool.install(|| {
            paths
                .par_iter()
                .map(|path| extract_file_worker(store, path, mode))
                .collect()
        }),
        Err(_) => {
            // Fallback to sequential
            paths
                .iter()
                .map(|path| extract_file_worker(store, path, mode))
                .collect()
        }
    };
    Ok(results?.into_iter().flatten().collect())
}

/// Walk the project, fold every file through the store and drop stale rows.
pub fn build_index(
    walker: &SourceWalker,
    store: &FingerprintStore,
    config: &EngineConfig,
    mode: BuildMode,
) -> SymdexResult<(ProjectIndex, RebuildStats)> {
    let started = Instant::now();
    let paths: Vec<PathBuf> = walker.files().collect();
    info!(
        root = %walker.root().display(),
        files = paths.len(),
        forced = mode == BuildMode::Forced,
        "building index"
    );

    let extractions_before = store.extraction_count();
    let entries = parallel_extract(store, &paths, config.workers, mode)?;

    let keep: HashSet<String> = entries.iter().map(|e| e.path.clone()).collect();
    let pruned = store.prune(&keep)?;

    let index = ProjectIndex::from_entries(walker.root(), entries);
    let stats = RebuildStats {
        files_indexed: index.file_count(),
        symbols_found: index.definition_count(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    let stored_definitions = store.definition_total()?;
    if stored_definitions != stats.symbols_found {
        warn!(
            root = %walker.root().display(),
            stored_definitions,
            symbols_found = stats.symbols_found,
            "store and index disagree on definition count"
        );
    }
    info!(
        root = %walker.root().display(),
        files_indexed = stats.files_indexed,
        symbols_found = stats.symbols_found,
        extracted = store.extraction_count() - extractions_before,
        pruned,
        elapsed_ms = stats.elapsed_ms,
        "index ready"
    );
    Ok((index, stats))
}
