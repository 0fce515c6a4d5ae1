//! SQLite schema DDL and migration steps for the fingerprint store.

use rusqlite::Connection;

use crate::errors::SymdexResult;

/// Current schema version. Migrations run from whatever the DB currently
/// reports up to this value.
pub const SCHEMA_VERSION: i32 = 2;

/// Version of the layout [`SCHEMA_STATEMENTS`] creates; an unversioned
/// database starts here.
pub const BASELINE_VERSION: i32 = 1;

/// Baseline (v1) DDL, safe to replay on an initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS store_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS file_entries (
        path TEXT PRIMARY KEY,
        fingerprint TEXT NOT NULL,
        table_json TEXT NOT NULL,
        last_indexed_at INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS migration_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_version INTEGER NOT NULL,
        to_version INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        migrated_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
];

/// Create the baseline tables and bring them up to [`SCHEMA_VERSION`].
pub fn initialize(conn: &Connection) -> SymdexResult<()> {
    for stmt in SCHEMA_STATEMENTS {
        conn.execute_batch(stmt)?;
    }
    migrate_schema(conn)
}

// ─── Migration framework ────────────────────────────────────────────────────

/// Run pending migrations one SAVEPOINT per step.
pub fn migrate_schema(conn: &Connection) -> SymdexResult<()> {
    let mut current_version = get_schema_version(conn).max(BASELINE_VERSION);

    while current_version < SCHEMA_VERSION {
        let next_version = current_version + 1;
        conn.execute_batch("SAVEPOINT symdex_migrate_step;")?;

        let step_result = (|| -> SymdexResult<()> {
            match next_version {
                2 => migrate_to_v2(conn)?,
                _ => {}
            }
            set_schema_version(conn, next_version)?;
            record_migration_step(conn, current_version, next_version, "success", None)?;
            conn.execute_batch("RELEASE SAVEPOINT symdex_migrate_step;")?;
            Ok(())
        })();

        match step_result {
            Ok(()) => {
                current_version = next_version;
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK TO SAVEPOINT symdex_migrate_step;");
                let _ = conn.execute_batch("RELEASE SAVEPOINT symdex_migrate_step;");
                let _ = record_migration_step(
                    conn,
                    current_version,
                    next_version,
                    "failed",
                    Some(&e.to_string()),
                );
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Returns 0 when the key is absent or unparseable.
pub(crate) fn get_schema_version(conn: &Connection) -> i32 {
    let result: Result<String, _> = conn.query_row(
        "SELECT value FROM store_meta WHERE key = 'schema_version';",
        [],
        |row| row.get(0),
    );
    match result {
        Ok(v) => v.parse::<i32>().unwrap_or(0),
        Err(_) => 0,
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> SymdexResult<()> {
    conn.execute(
        "INSERT INTO store_meta(key, value) \
         VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        rusqlite::params![version.to_string()],
    )?;
    Ok(())
}

fn record_migration_step(
    conn: &Connection,
    from_v: i32,
    to_v: i32,
    status: &str,
    error_msg: Option<&str>,
) -> SymdexResult<()> {
    conn.execute(
        "INSERT INTO migration_history(from_version, to_version, status, error_message) \
         VALUES (?1, ?2, ?3, ?4);",
        rusqlite::params![from_v, to_v, status, error_msg],
    )?;
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> SymdexResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

// ─── Individual migration steps ─────────────────────────────────────────────

/// v1 -> v2: denormalised definition counts for cheap stats.
fn migrate_to_v2(conn: &Connection) -> SymdexResult<()> {
    if !column_exists(conn, "file_entries", "definition_count")? {
        conn.execute_batch(
            "ALTER TABLE file_entries ADD COLUMN definition_count INTEGER NOT NULL DEFAULT 0;",
        )?;
    }
    conn.execute_batch(
        "UPDATE file_entries \
         SET definition_count = json_array_length(table_json, '$.definitions') \
         WHERE json_valid(table_json);",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
        assert!(column_exists(&conn, "file_entries", "definition_count").unwrap());
    }

    #[test]
    fn migrate_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        initialize(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);

        let steps: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM migration_history WHERE status = 'success';",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(steps, (SCHEMA_VERSION - BASELINE_VERSION) as i64);
    }

    #[test]
    fn fresh_database_starts_from_baseline() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        let (from, to): (i32, i32) = conn
            .query_row(
                "SELECT from_version, to_version FROM migration_history ORDER BY id LIMIT 1;",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!((from, to), (BASELINE_VERSION, BASELINE_VERSION + 1));
    }

    #[test]
    fn v2_backfills_definition_counts() {
        let conn = Connection::open_in_memory().unwrap();
        for stmt in SCHEMA_STATEMENTS {
            conn.execute_batch(stmt).unwrap();
        }
        conn.execute(
            "INSERT INTO file_entries(path, fingerprint, table_json, last_indexed_at) \
             VALUES ('a.py', 'abc', ?1, 0);",
            rusqlite::params![r#"{"definitions":[{},{}],"imports":[]}"#],
        )
        .unwrap();
        conn.execute_batch(
            "INSERT INTO store_meta(key, value) VALUES('schema_version', '1');",
        )
        .unwrap();

        migrate_schema(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT definition_count FROM file_entries WHERE path = 'a.py';",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }
}
