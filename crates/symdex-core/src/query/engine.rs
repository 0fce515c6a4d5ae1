//! Query facade: per-project index registry plus the four public operations.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::errors::{SymdexError, SymdexResult};
use crate::indexer::filesystem::{canonical_project_root, content_fingerprint, SourceWalker};
use crate::indexer::pipeline::{build_index, BuildMode};
use crate::indexer::project::{
    normalize_file_hint, DefRef, LookupQuery, ProjectIndex, CALLABLE_KINDS, CLASS_KINDS,
};
use crate::models::{QueryResponse, RebuildStats, ResponseKind, SymbolSummary};
use crate::query::guards::normalize_query_name;
use crate::query::resolver::{Resolution, Resolver};
use crate::store::fingerprint::FingerprintStore;

static GLOBAL_ENGINE: LazyLock<SymbolEngine> = LazyLock::new(SymbolEngine::from_env);

/// Index state for one canonical project root.
pub struct ProjectHandle {
    walker: SourceWalker,
    store: FingerprintStore,
    build_lock: Mutex<()>,
    snapshot: RwLock<Option<Arc<ProjectIndex>>>,
}

impl ProjectHandle {
    fn open(root: &Path, config: &EngineConfig) -> SymdexResult<Self> {
        let walker = SourceWalker::new(root, config)?;
        let store = FingerprintStore::open(walker.root(), &config.cache_dir)?;
        Ok(Self {
            walker,
            store,
            build_lock: Mutex::new(()),
            snapshot: RwLock::new(None),
        })
    }

    pub fn store(&self) -> &FingerprintStore {
        &self.store
    }

    /// The published index, building it on first use.
    fn current(&self, config: &EngineConfig) -> SymdexResult<Arc<ProjectIndex>> {
        self.current_or_built(config).map(|(index, _)| index)
    }

    /// Like [`current`](Self::current); the flag is set when this call did
    /// the build.
    fn current_or_built(&self, config: &EngineConfig) -> SymdexResult<(Arc<ProjectIndex>, bool)> {
        if let Some(index) = self.snapshot.read().as_ref() {
            return Ok((Arc::clone(index), false));
        }
        let _building = self.build_lock.lock();
        if let Some(index) = self.snapshot.read().as_ref() {
            return Ok((Arc::clone(index), false));
        }
        let (index, _) = build_index(&self.walker, &self.store, config, BuildMode::Incremental)?;
        let index = Arc::new(index);
        *self.snapshot.write() = Some(Arc::clone(&index));
        Ok((index, true))
    }

    /// Build and publish a new index; readers keep their old snapshot.
    fn rebuild(
        &self,
        config: &EngineConfig,
        mode: BuildMode,
    ) -> SymdexResult<(Arc<ProjectIndex>, RebuildStats)> {
        let _building = self.build_lock.lock();
        let (index, stats) = build_index(&self.walker, &self.store, config, mode)?;
        let index = Arc::new(index);
        *self.snapshot.write() = Some(Arc::clone(&index));
        Ok((index, stats))
    }
}

/// Whether any of `files` changed on disk since `index` was built.
fn any_stale(index: &ProjectIndex, files: &BTreeSet<usize>) -> bool {
    files.iter().any(|&file| {
        let entry = index.file(file);
        match std::fs::read(&entry.path) {
            Ok(bytes) => content_fingerprint(&bytes) != entry.fingerprint,
            Err(_) => true,
        }
    })
}

pub struct SymbolEngine {
    config: EngineConfig,
    projects: RwLock<HashMap<PathBuf, Arc<ProjectHandle>>>,
}

impl SymbolEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            projects: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_env() -> Self {
        Self::new(EngineConfig::from_env())
    }

    /// Process-wide engine configured from the environment.
    pub fn global() -> &'static SymbolEngine {
        &GLOBAL_ENGINE
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Handle for `project_root`, created on first use and kept for the
    /// lifetime of the engine.
    pub fn project(&self, project_root: &Path) -> SymdexResult<Arc<ProjectHandle>> {
        let root = canonical_project_root(project_root)?;
        if let Some(handle) = self.projects.read().get(&root) {
            return Ok(Arc::clone(handle));
        }
        let mut projects = self.projects.write();
        if let Some(handle) = projects.get(&root) {
            return Ok(Arc::clone(handle));
        }
        debug!(root = %root.display(), "opening project");
        let handle = Arc::new(ProjectHandle::open(&root, &self.config)?);
        projects.insert(root, Arc::clone(&handle));
        Ok(handle)
    }

    /// Look up and resolve against the current snapshot. When the symbol is
    /// missing, or a file the answer was drawn from changed on disk, refresh
    /// the index once and answer again.
    fn answer(
        &self,
        handle: &ProjectHandle,
        query: &LookupQuery<'_>,
    ) -> SymdexResult<(Arc<ProjectIndex>, DefRef, Resolution)> {
        let (mut index, mut refreshed) = handle.current_or_built(&self.config)?;
        loop {
            let def = match index.lookup(query) {
                Ok(candidates) => candidates[0],
                Err(SymdexError::SymbolNotFound { .. }) if !refreshed => {
                    debug!(name = query.name, "symbol missing from snapshot; refreshing");
                    index = handle.rebuild(&self.config, BuildMode::Incremental)?.0;
                    refreshed = true;
                    continue;
                }
                Err(err @ SymdexError::SymbolNotFound { .. }) => {
                    info!(name = query.name, file_hint = ?query.file_hint, "symbol not found");
                    return Err(err);
                }
                Err(err) => return Err(err),
            };
            let resolution = Resolver::new(&index).resolve(def)?;

            let mut touched: BTreeSet<usize> = BTreeSet::new();
            touched.insert(def.file);
            for (_, path) in &resolution.dependencies {
                if let Some(file) = index.file_index(path) {
                    touched.insert(file);
                }
            }
            if refreshed || !any_stale(&index, &touched) {
                return Ok((index, def, resolution));
            }
            debug!(root = %index.root().display(), "answer touched changed files; refreshing");
            index = handle.rebuild(&self.config, BuildMode::Incremental)?.0;
            refreshed = true;
        }
    }

    pub fn query_class(
        &self,
        project_root: &Path,
        class_name: &str,
        file_hint: Option<&str>,
    ) -> SymdexResult<QueryResponse> {
        let name = normalize_query_name(class_name);
        let hint = file_hint.map(normalize_file_hint);
        info!(class_name = %name, file_hint = ?hint, "query_class");

        let handle = self.project(project_root)?;
        let query = LookupQuery {
            name: &name,
            kinds: CLASS_KINDS,
            enclosing_class: None,
            file_hint: hint.as_deref(),
        };
        let (index, def, resolution) = self.answer(&handle, &query)?;
        Ok(into_response(&index, def, resolution, ResponseKind::Class))
    }

    pub fn query_function(
        &self,
        project_root: &Path,
        function_name: &str,
        file_hint: Option<&str>,
        enclosing_class: Option<&str>,
    ) -> SymdexResult<QueryResponse> {
        let name = normalize_query_name(function_name);
        let hint = file_hint.map(normalize_file_hint);
        let class_name = enclosing_class
            .map(normalize_query_name)
            .filter(|c| !c.is_empty());
        info!(
            function_name = %name,
            file_hint = ?hint,
            enclosing_class = ?class_name,
            "query_function"
        );

        let handle = self.project(project_root)?;
        let query = LookupQuery {
            name: &name,
            kinds: CALLABLE_KINDS,
            enclosing_class: class_name.as_deref(),
            file_hint: hint.as_deref(),
        };
        let (index, def, resolution) = self.answer(&handle, &query)?;
        Ok(into_response(&index, def, resolution, ResponseKind::Func))
    }

    /// Every definition in the project (or in files matching `file_hint`),
    /// ordered by file path then position.
    pub fn list_symbols(
        &self,
        project_root: &Path,
        file_hint: Option<&str>,
    ) -> SymdexResult<Vec<SymbolSummary>> {
        let hint = file_hint.map(normalize_file_hint);
        let handle = self.project(project_root)?;
        let index = handle.current(&self.config)?;
        Ok(index.list_symbols(hint.as_deref()))
    }

    /// Re-extract every file and publish a fresh index.
    pub fn rebuild_index(&self, project_root: &Path) -> SymdexResult<RebuildStats> {
        let handle = self.project(project_root)?;
        let (_, stats) = handle.rebuild(&self.config, BuildMode::Forced)?;
        Ok(stats)
    }
}

fn into_response(
    index: &ProjectIndex,
    def: DefRef,
    resolution: Resolution,
    kind: ResponseKind,
) -> QueryResponse {
    let record = index.record(def);
    let (dependency_contents, dependency_paths) = resolution.dependencies.into_iter().unzip();
    QueryResponse {
        kind,
        content: resolution.own_content,
        enclosing_class: match kind {
            ResponseKind::Func => record.enclosing_class.clone(),
            ResponseKind::Class => None,
        },
        file_path: record.file_path.clone(),
        dependency_contents,
        dependency_paths,
    }
}
