//! Local SQLite database layer for Caixa POS.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations, settings
//! helpers, and the shared connection state that the document store and the
//! channel handlers work through.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Shared database handle.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Ordered schema steps: `(version, label, sql)`. Append only.
const MIGRATIONS: &[(i32, &str, &str)] = &[
    (
        1,
        "settings store",
        "CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );
        CREATE INDEX IF NOT EXISTS idx_local_settings_cat_key
            ON local_settings(setting_category, setting_key);",
    ),
    (
        2,
        "documents",
        // One JSON document per (collection, doc_key): employees, work_log, daily_closings
        "CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            doc_key TEXT NOT NULL,
            data TEXT NOT NULL CHECK (json_valid(data)),
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            PRIMARY KEY (collection, doc_key)
        );
        CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);",
    ),
];

/// Highest version in [`MIGRATIONS`].
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

const FILE_PRAGMAS: &str = "PRAGMA journal_mode = WAL;
     PRAGMA synchronous = NORMAL;";
const SHARED_PRAGMAS: &str = "PRAGMA foreign_keys = ON;
     PRAGMA busy_timeout = 5000;";

/// Open `{data_dir}/caixa.db`, creating the directory and migrating as
/// needed. An unreadable file is renamed to `caixa.db.broken-<timestamp>`
/// and replaced by a fresh database.
pub fn init(data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;
    let db_path = data_dir.join("caixa.db");
    info!(path = %db_path.display(), "Opening database");

    let conn = match open_file(&db_path) {
        Ok(conn) => conn,
        Err(first_err) => {
            warn!(error = %first_err, "Database unreadable, starting a fresh file");
            move_aside(&db_path)?;
            open_file(&db_path).map_err(|e| format!("Database open failed after retry: {e}"))?
        }
    };
    run_migrations(&conn)?;

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Fresh in-memory database with all migrations applied.
pub fn open_in_memory() -> Result<DbState, String> {
    let conn = Connection::open_in_memory().map_err(|e| format!("sqlite open: {e}"))?;
    conn.execute_batch(SHARED_PRAGMAS)
        .map_err(|e| format!("pragma setup: {e}"))?;
    run_migrations(&conn)?;
    Ok(DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    })
}

fn open_file(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;
    conn.execute_batch(FILE_PRAGMAS)
        .and_then(|()| conn.execute_batch(SHARED_PRAGMAS))
        .map_err(|e| format!("pragma setup: {e}"))?;
    Ok(conn)
}

fn move_aside(db_path: &Path) -> Result<(), String> {
    if !db_path.exists() {
        return Ok(());
    }
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
    let aside = db_path.with_extension(format!("db.broken-{stamp}"));
    fs::rename(db_path, &aside)
        .map_err(|e| format!("Database unusable and could not be moved: {e}"))?;
    warn!(kept_at = %aside.display(), "Unreadable database moved aside");
    Ok(())
}

/// Highest applied migration, 0 for an empty database.
pub(crate) fn schema_version(conn: &Connection) -> i32 {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

/// Apply every step above the recorded version. Each step commits together
/// with its `schema_version` row.
fn run_migrations(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let from = schema_version(conn);
    let pending: Vec<_> = MIGRATIONS.iter().filter(|(v, _, _)| *v > from).collect();
    if pending.is_empty() {
        debug!(version = from, "Database schema up to date");
        return Ok(());
    }

    for &(version, label, sql) in pending {
        let step = format!(
            "BEGIN IMMEDIATE;
             {sql}
             INSERT INTO schema_version (version) VALUES ({version});
             COMMIT;"
        );
        if let Err(e) = conn.execute_batch(&step) {
            let _ = conn.execute_batch("ROLLBACK");
            error!(version, label, error = %e, "Migration failed");
            return Err(format!("migration v{version} ({label}): {e}"));
        }
        info!(version, label, "Applied migration");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(
    conn: &Connection,
    category: &str,
    key: &str,
    value: &str,
) -> Result<(), String> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| format!("set_setting: {e}"))?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
