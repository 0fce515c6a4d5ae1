//! Persistent per-project cache of definition tables keyed by content fingerprint.
//!
//! Each public method opens its own connection, so one store can be shared
//! freely between rayon workers and query threads.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::errors::{SymdexError, SymdexResult};
use crate::indexer::filesystem::content_fingerprint;
use crate::indexer::parser::decode_source;
use crate::indexer::symbols::extract_definitions;
use crate::models::{DefinitionTable, FileEntry};
use crate::store::schema;

/// Bumped whenever extraction output changes shape; cached tables written by
/// another version are discarded on open.
pub const EXTRACTOR_VERSION: &str = "1";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Row as persisted for one path.
struct StoredRow {
    fingerprint: String,
    table_json: String,
    last_indexed_at: i64,
}

/// SQLite-backed fingerprint store bound to one project root.
pub struct FingerprintStore {
    root: PathBuf,
    db_path: PathBuf,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    extractions: AtomicUsize,
}

impl FingerprintStore {
    /// Open (creating if needed) the store for `root` under `cache_dir`.
    pub fn open(root: &Path, cache_dir: &Path) -> SymdexResult<Self> {
        std::fs::create_dir_all(cache_dir)?;
        let store = Self {
            root: root.to_path_buf(),
            db_path: cache_dir.join(store_file_name(root)),
            in_flight: Mutex::new(HashMap::new()),
            extractions: AtomicUsize::new(0),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn connect(&self) -> SymdexResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn init_schema(&self) -> SymdexResult<()> {
        let conn = self.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        schema::initialize(&conn)?;

        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = 'extractor_version';",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if stored.as_deref() != Some(EXTRACTOR_VERSION) {
            if stored.is_some() {
                warn!(
                    db = %self.db_path.display(),
                    "extractor version changed; discarding cached tables"
                );
            }
            conn.execute("DELETE FROM file_entries;", [])?;
            conn.execute(
                "INSERT INTO store_meta(key, value) VALUES('extractor_version', ?1) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
                params![EXTRACTOR_VERSION],
            )?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Number of Syntax-Extractor invocations made through this store.
    pub fn extraction_count(&self) -> usize {
        self.extractions.load(Ordering::SeqCst)
    }

    pub fn entry_count(&self) -> SymdexResult<usize> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM file_entries;", [], |row| {
            row.get(0)
        })?;
        Ok(count.max(0) as usize)
    }

    /// Total definitions across stored files.
    pub fn definition_total(&self) -> SymdexResult<usize> {
        let conn = self.connect()?;
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(definition_count), 0) FROM file_entries;",
            [],
            |row| row.get(0),
        )?;
        Ok(total.max(0) as usize)
    }

    // -- lookups -------------------------------------------------------------

    fn stored_row(&self, key: &str) -> SymdexResult<Option<StoredRow>> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                "SELECT fingerprint, table_json, last_indexed_at FROM file_entries WHERE path = ?1;",
                params![key],
                |row| {
                    Ok(StoredRow {
                        fingerprint: row.get(0)?,
                        table_json: row.get(1)?,
                        last_indexed_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// A stored entry whose fingerprint matches, if one decodes cleanly.
    fn fresh_entry(
        &self,
        key: &str,
        fingerprint: &str,
        text: &Arc<str>,
    ) -> SymdexResult<Option<FileEntry>> {
        let Some(row) = self.stored_row(key)? else {
            return Ok(None);
        };
        if row.fingerprint != fingerprint {
            return Ok(None);
        }
        match decode_table(key, &row.table_json) {
            Ok(table) => Ok(Some(FileEntry {
                path: key.to_string(),
                fingerprint: row.fingerprint,
                definitions: table.definitions,
                imports: table.imports,
                last_indexed_at: row.last_indexed_at,
                text: Arc::clone(text),
            })),
            Err(err) => {
                warn!(path = key, error = %err, "re-extracting after cache corruption");
                Ok(None)
            }
        }
    }

    // -- extraction ----------------------------------------------------------

    /// Return the entry for `path`, re-extracting only when its current bytes
    /// no longer match the stored fingerprint.
    pub fn get_or_extract(&self, path: &Path) -> SymdexResult<FileEntry> {
        self.load(path, false)
    }

    /// Re-extract `path` unconditionally and replace its stored entry.
    pub fn refresh(&self, path: &Path) -> SymdexResult<FileEntry> {
        self.load(path, true)
    }

    fn load(&self, path: &Path, force: bool) -> SymdexResult<FileEntry> {
        let key = path_key(path);
        let bytes = std::fs::read(path)?;
        let fingerprint = content_fingerprint(&bytes);
        let text: Arc<str> = Arc::from(String::from_utf8_lossy(&bytes).as_ref());

        if !force {
            if let Some(entry) = self.fresh_entry(&key, &fingerprint, &text)? {
                debug!(path = %key, "cache hit");
                return Ok(entry);
            }
        }

        let gate = self.gate(&key);
        let result = {
            let _held = gate.lock();
            self.load_gated(&key, &bytes, fingerprint, text, force)
        };
        self.release_gate(&key, gate);
        result
    }

    fn load_gated(
        &self,
        key: &str,
        bytes: &[u8],
        fingerprint: String,
        text: Arc<str>,
        force: bool,
    ) -> SymdexResult<FileEntry> {
        // Another caller may have finished the same extraction while we waited.
        if !force {
            if let Some(entry) = self.fresh_entry(key, &fingerprint, &text)? {
                return Ok(entry);
            }
        }
        self.extract_and_store(key, bytes, fingerprint, text)
    }

    fn gate(&self, key: &str) -> Arc<Mutex<()>> {
        let mut in_flight = self.in_flight.lock();
        Arc::clone(in_flight.entry(key.to_string()).or_default())
    }

    fn release_gate(&self, key: &str, gate: Arc<Mutex<()>>) {
        let mut in_flight = self.in_flight.lock();
        // Map plus our handle: nobody else is waiting on it.
        if Arc::strong_count(&gate) <= 2 {
            in_flight.remove(key);
        }
    }

    fn extract_and_store(
        &self,
        key: &str,
        bytes: &[u8],
        fingerprint: String,
        text: Arc<str>,
    ) -> SymdexResult<FileEntry> {
        self.extractions.fetch_add(1, Ordering::SeqCst);
        debug!(path = %key, "cache miss; extracting");

        let table = match decode_source(key, bytes).and_then(|src| extract_definitions(key, src)) {
            Ok(table) => table,
            Err(err @ SymdexError::Syntax { .. }) => {
                warn!(path = %key, error = %err, "indexing file without definitions");
                DefinitionTable::default()
            }
            Err(err) => return Err(err),
        };

        let last_indexed_at = unix_now();
        let table_json = serde_json::to_string(&table)?;
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO file_entries(path, fingerprint, table_json, definition_count, last_indexed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(path) DO UPDATE SET \
                fingerprint = excluded.fingerprint, \
                table_json = excluded.table_json, \
                definition_count = excluded.definition_count, \
                last_indexed_at = excluded.last_indexed_at;",
            params![
                key,
                fingerprint,
                table_json,
                table.definitions.len() as i64,
                last_indexed_at
            ],
        )?;

        Ok(FileEntry {
            path: key.to_string(),
            fingerprint,
            definitions: table.definitions,
            imports: table.imports,
            last_indexed_at,
            text,
        })
    }

    // -- maintenance ---------------------------------------------------------

    /// Delete rows for paths not in `keep`; returns the number removed.
    pub fn prune(&self, keep: &HashSet<String>) -> SymdexResult<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let stale: Vec<String> = {
            let mut stmt = tx.prepare("SELECT path FROM file_entries;")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut stale = Vec::new();
            for path in rows {
                let path = path?;
                if !keep.contains(&path) {
                    stale.push(path);
                }
            }
            stale
        };
        for path in &stale {
            tx.execute("DELETE FROM file_entries WHERE path = ?1;", params![path])?;
        }
        tx.commit()?;
        if !stale.is_empty() {
            debug!(removed = stale.len(), "pruned stale cache entries");
        }
        Ok(stale.len())
    }
}

/// Store key for a file: its path as a string.
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// `{dir_name}_{sha256(root)[..12]}.db`; distinct roots never share a file.
pub fn store_file_name(root: &Path) -> String {
    let dir_name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "root".to_string());
    let safe: String = dir_name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let mut hasher = Sha256::new();
    hasher.update(root.to_string_lossy().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{safe}_{}.db", &digest[..12])
}

fn decode_table(key: &str, json: &str) -> SymdexResult<DefinitionTable> {
    serde_json::from_str(json).map_err(|e| SymdexError::CacheCorrupt {
        path: key.to_string(),
        message: e.to_string(),
    })
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, TempDir, FingerprintStore) {
        let project = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let root = fs::canonicalize(project.path()).unwrap();
        let store = FingerprintStore::open(&root, cache.path()).unwrap();
        (project, cache, store)
    }

    #[test]
    fn unchanged_file_is_extracted_once() {
        let (project, _cache, store) = setup();
        let file = project.path().join("a.py");
        fs::write(&file, "def f():\n    return 1\n").unwrap();

        let first = store.get_or_extract(&file).unwrap();
        let second = store.get_or_extract(&file).unwrap();
        assert_eq!(store.extraction_count(), 1);
        assert_eq!(first.fingerprint, second.fingerprint);
        assert_eq!(first.definitions, second.definitions);
        assert_eq!(second.definitions[0].name, "f");
        assert_eq!(store.entry_count().unwrap(), 1);
        assert_eq!(store.definition_total().unwrap(), 1);
    }

    #[test]
    fn changed_bytes_force_re_extraction() {
        let (project, _cache, store) = setup();
        let file = project.path().join("a.py");
        fs::write(&file, "def f():\n    return 1\n").unwrap();
        store.get_or_extract(&file).unwrap();

        fs::write(&file, "def g():\n    return 2\n").unwrap();
        let entry = store.get_or_extract(&file).unwrap();
        assert_eq!(store.extraction_count(), 2);
        assert_eq!(entry.definitions[0].name, "g");
        assert_eq!(store.entry_count().unwrap(), 1);
    }

    #[test]
    fn refresh_bypasses_fingerprint() {
        let (project, _cache, store) = setup();
        let file = project.path().join("a.py");
        fs::write(&file, "class A:\n    pass\n").unwrap();
        store.get_or_extract(&file).unwrap();
        store.refresh(&file).unwrap();
        assert_eq!(store.extraction_count(), 2);
    }

    #[test]
    fn entries_survive_reopen() {
        let project = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let root = fs::canonicalize(project.path()).unwrap();
        let file = root.join("m.py");
        fs::write(&file, "def keep():\n    pass\n").unwrap();

        FingerprintStore::open(&root, cache.path())
            .unwrap()
            .get_or_extract(&file)
            .unwrap();
        let reopened = FingerprintStore::open(&root, cache.path()).unwrap();
        let entry = reopened.get_or_extract(&file).unwrap();
        assert_eq!(reopened.extraction_count(), 0);
        assert_eq!(entry.definitions[0].name, "keep");
    }

    #[test]
    fn corrupt_row_degrades_to_re_extraction() {
        let (project, _cache, store) = setup();
        let file = project.path().join("a.py");
        fs::write(&file, "def f():\n    pass\n").unwrap();
        let entry = store.get_or_extract(&file).unwrap();

        let conn = Connection::open(store.db_path()).unwrap();
        conn.execute(
            "UPDATE file_entries SET table_json = '{not json' WHERE path = ?1;",
            params![entry.path],
        )
        .unwrap();

        let stored = store.stored_row(&entry.path).unwrap().unwrap();
        let err = decode_table(&entry.path, &stored.table_json).unwrap_err();
        assert_eq!(err.kind(), "cache_corrupt");

        let recovered = store.get_or_extract(&file).unwrap();
        assert_eq!(recovered.definitions.len(), 1);
        assert_eq!(store.extraction_count(), 2);
        let stored = store.stored_row(&entry.path).unwrap().unwrap();
        assert_eq!(decode_table(&entry.path, &stored.table_json).unwrap().definitions.len(), 1);
    }

    #[test]
    fn failed_store_write_releases_path_gate() {
        let (project, _cache, store) = setup();
        let file = project.path().join("a.py");
        fs::write(&file, "def f():\n    pass\n").unwrap();

        let conn = Connection::open(store.db_path()).unwrap();
        conn.execute_batch("DROP TABLE file_entries;").unwrap();

        assert!(store.refresh(&file).is_err());
        assert!(store.in_flight.lock().is_empty());
    }

    #[test]
    fn undecodable_file_is_stored_empty() {
        let (project, _cache, store) = setup();
        let file = project.path().join("latin1.py");
        fs::write(&file, [0x64u8, 0x65, 0x66, 0xff, 0x0a]).unwrap();
        let entry = store.get_or_extract(&file).unwrap();
        assert!(entry.definitions.is_empty());
        store.get_or_extract(&file).unwrap();
        assert_eq!(store.extraction_count(), 1);
    }

    #[test]
    fn prune_removes_missing_paths() {
        let (project, _cache, store) = setup();
        let a = project.path().join("a.py");
        let b = project.path().join("b.py");
        fs::write(&a, "x = 1\n").unwrap();
        fs::write(&b, "y = 2\n").unwrap();
        store.get_or_extract(&a).unwrap();
        store.get_or_extract(&b).unwrap();

        let keep: HashSet<String> = [path_key(&a)].into_iter().collect();
        assert_eq!(store.prune(&keep).unwrap(), 1);
        assert_eq!(store.entry_count().unwrap(), 1);
    }

    #[test]
    fn concurrent_misses_collapse_to_one_extraction() {
        let (project, _cache, store) = setup();
        let file = project.path().join("busy.py");
        let mut source = String::new();
        for i in 0..200 {
            source.push_str(&format!("def f{i}():\n    return {i}\n\n"));
        }
        fs::write(&file, source).unwrap();

        let store = Arc::new(store);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let file = file.clone();
                std::thread::spawn(move || store.get_or_extract(&file).unwrap().definitions.len())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 200);
        }
        assert_eq!(store.extraction_count(), 1);
    }

    #[test]
    fn store_names_differ_per_root() {
        let a = store_file_name(Path::new("/work/app"));
        let b = store_file_name(Path::new("/other/app"));
        assert!(a.starts_with("app_"));
        assert!(a.ends_with(".db"));
        assert_ne!(a, b);
        assert_eq!(a, store_file_name(Path::new("/work/app")));
    }
}
