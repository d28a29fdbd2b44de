//! Diagnostics for Caixa POS.
//!
//! Provides:
//! - **About info**: version, build timestamp, git SHA, platform
//! - **Status**: schema version, database size, document counts
//! - **Log rotation helpers**: used by `lib.rs` before the rolling file
//!   appender starts.

use rusqlite::params;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::db::DbState;
use crate::store::{DAILY_CLOSINGS, EMPLOYEES, WORK_LOG};

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// File name prefix of the daily rolling log.
pub const LOG_FILE_PREFIX: &str = "caixa";

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

pub fn get_about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
    })
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Snapshot for the `system:status` channel.
pub fn get_status(db: &DbState, log_dir: &Path) -> Result<Value, String> {
    let (schema_version, counts, last_closing) = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;

        let schema_version = crate::db::schema_version(&conn);

        let mut counts = serde_json::Map::new();
        for collection in [EMPLOYEES, WORK_LOG, DAILY_CLOSINGS] {
            let n: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM documents WHERE collection = ?1",
                    params![collection],
                    |row| row.get(0),
                )
                .unwrap_or(0);
            counts.insert(collection.to_string(), json!(n));
        }

        let last_closing: Option<String> = conn
            .query_row(
                "SELECT MAX(doc_key) FROM documents
                 WHERE collection = ?1 AND json_extract(data, '$.closedAt') IS NOT NULL",
                params![DAILY_CLOSINGS],
                |row| row.get(0),
            )
            .unwrap_or(None);

        (schema_version, counts, last_closing)
    };

    let db_size = fs::metadata(&db.db_path).map(|m| m.len()).unwrap_or(0);

    Ok(json!({
        "about": get_about_info(),
        "schemaVersion": schema_version,
        "dbPath": db.db_path.display().to_string(),
        "dbSizeBytes": db_size,
        "documents": counts,
        "lastFinalizedDate": last_closing,
        "logDir": log_dir.display().to_string(),
    }))
}

// ---------------------------------------------------------------------------
// Log rotation
// ---------------------------------------------------------------------------

/// Remove old log files in `log_dir`, keeping the newest `MAX_LOG_FILES`.
pub fn prune_old_logs(log_dir: &Path) {
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.starts_with(&format!("{LOG_FILE_PREFIX}.")));
            if is_log {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::UNIX_EPOCH);
                log_files.push((path, modified));
            }
        }
    }

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocPath, DocumentStore, SqliteDocumentStore};

    #[test]
    fn test_about_info_has_required_fields() {
        let info = get_about_info();
        for key in ["version", "buildTimestamp", "gitSha", "platform", "arch"] {
            assert!(info.get(key).is_some(), "missing {key}");
        }
        // build.rs always stamps a value, "unknown" when the tool is absent
        for key in ["buildTimestamp", "gitSha"] {
            let value = info[key].as_str().unwrap();
            assert!(!value.is_empty() && value == value.trim(), "{key} = {value:?}");
        }
    }

    #[test]
    fn test_status_counts_documents() {
        let store = SqliteDocumentStore::new(crate::db::open_in_memory().unwrap());
        store
            .run_transaction(|tx| {
                tx.set(&DocPath::employee("e1"), json!({ "name": "Ana" }))?;
                tx.set(
                    &DocPath::new(DAILY_CLOSINGS, "2024-03-01"),
                    json!({ "date": "2024-03-01", "closedAt": "2024-03-01T23:00:00Z" }),
                )?;
                tx.set(
                    &DocPath::new(DAILY_CLOSINGS, "2024-03-02"),
                    json!({ "date": "2024-03-02" }),
                )
            })
            .unwrap();

        let status = get_status(store.db(), Path::new("/tmp/logs")).unwrap();
        assert_eq!(status["documents"]["employees"], 1);
        assert_eq!(status["documents"]["daily_closings"], 2);
        assert_eq!(status["documents"]["work_log"], 0);
        assert_eq!(status["lastFinalizedDate"], "2024-03-01");
        assert_eq!(status["schemaVersion"], 2);
    }

    #[test]
    fn test_prune_keeps_newest_logs_only() {
        let dir = tempfile::tempdir().unwrap();
        for day in 1..=(MAX_LOG_FILES + 3) {
            fs::write(dir.path().join(format!("caixa.2024-03-{day:02}")), b"x").unwrap();
        }
        fs::write(dir.path().join("notes.txt"), b"keep").unwrap();

        prune_old_logs(dir.path());

        let remaining: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with("caixa."))
            .collect();
        assert_eq!(remaining.len(), MAX_LOG_FILES);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_prune_missing_dir_is_noop() {
        prune_old_logs(Path::new("/nonexistent/caixa-logs"));
    }
}
