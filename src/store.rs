//! Document store: the persistence gateway behind every ledger operation.
//!
//! Documents are JSON objects addressed by `(collection, key)`. Reads can be
//! one-off or live: a [`Subscription`] holds the current snapshot right away
//! and receives a fresh one after every committed transaction that touches
//! it. Multi-document writes go through [`DocumentStore::run_transaction`],
//! which commits or rolls back as a unit.
//!
//! The SQLite implementation runs each transaction under `BEGIN IMMEDIATE`,
//! so concurrent writers (other connections or processes on the same file)
//! are serialized by the database and a read-modify-write never loses an
//! update. Live snapshots are published in-process only.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::db::DbState;

pub const EMPLOYEES: &str = "employees";
pub const DAILY_CLOSINGS: &str = "daily_closings";
pub const WORK_LOG: &str = "work_log";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid document: {0}")]
    Invalid(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Addressing and snapshots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath {
    collection: String,
    key: String,
}

impl DocPath {
    pub fn new(collection: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
        }
    }

    pub fn employee(id: &str) -> Self {
        Self::new(EMPLOYEES, id)
    }

    pub fn closing(date: NaiveDate) -> Self {
        Self::new(DAILY_CLOSINGS, date.format("%Y-%m-%d").to_string())
    }

    pub fn work_log(date: NaiveDate) -> Self {
        Self::new(WORK_LOG, date.format("%Y-%m-%d").to_string())
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn validate(&self) -> StoreResult<()> {
        if self.collection.is_empty() || self.key.is_empty() {
            return Err(StoreError::Invalid(format!("empty path segment in {self}")));
        }
        if self.key.contains('/') || self.collection.contains('/') {
            return Err(StoreError::Invalid(format!("'/' not allowed in {self}")));
        }
        Ok(())
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.key)
    }
}

/// One stored document as of some read.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: DocPath,
    pub data: Value,
}

impl Document {
    /// The document key (store-assigned id for generated documents).
    pub fn id(&self) -> &str {
        self.path.key()
    }

    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| StoreError::Serialization(format!("{}: {e}", self.path)))
    }
}

/// Live view of a document or collection. Dropping it (or calling
/// [`Subscription::unsubscribe`]) stops delivery.
pub struct Subscription<T> {
    rx: watch::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    fn new(rx: watch::Receiver<T>) -> Self {
        Self { rx }
    }

    /// Latest published snapshot.
    pub fn current(&self) -> T {
        self.rx.borrow().clone()
    }

    /// The newest snapshot if one arrived since the last poll.
    pub fn poll_change(&mut self) -> Option<T> {
        match self.rx.has_changed() {
            Ok(true) => Some(self.rx.borrow_and_update().clone()),
            _ => None,
        }
    }

    /// Wait for the next snapshot. `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<T> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    pub fn unsubscribe(self) {}
}

// ---------------------------------------------------------------------------
// Gateway traits
// ---------------------------------------------------------------------------

/// Reads and writes available inside [`DocumentStore::run_transaction`].
pub trait Transaction {
    fn get(&mut self, path: &DocPath) -> StoreResult<Option<Document>>;

    /// Create or overwrite the whole document.
    fn set(&mut self, path: &DocPath, data: Value) -> StoreResult<()>;

    /// Merge top-level fields into an existing document. Fails with
    /// `NotFound` when the document does not exist.
    fn update(&mut self, path: &DocPath, fields: Value) -> StoreResult<()>;
}

pub trait DocumentStore {
    fn get(&self, path: &DocPath) -> StoreResult<Option<Document>>;

    fn list(&self, collection: &str) -> StoreResult<Vec<Document>>;

    fn create_with_generated_id(&self, collection: &str, data: Value) -> StoreResult<DocPath>;

    fn watch_document(&self, path: &DocPath) -> StoreResult<Subscription<Option<Document>>>;

    fn watch_collection(&self, collection: &str) -> StoreResult<Subscription<Vec<Document>>>;

    /// Run `work` atomically. Everything it wrote is committed when it
    /// returns `Ok`, and nothing is when it returns `Err`.
    fn run_transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, E>,
        E: From<StoreError>;
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Watchers {
    documents: HashMap<DocPath, watch::Sender<Option<Document>>>,
    collections: HashMap<String, watch::Sender<Vec<Document>>>,
}

/// [`DocumentStore`] over the `documents` table.
///
/// Lock order is watchers, then connection.
pub struct SqliteDocumentStore {
    db: DbState,
    watchers: Mutex<Watchers>,
}

impl SqliteDocumentStore {
    pub fn new(db: DbState) -> Self {
        Self {
            db,
            watchers: Mutex::new(Watchers::default()),
        }
    }

    pub fn db(&self) -> &DbState {
        &self.db
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.db
            .conn
            .lock()
            .map_err(|e| StoreError::Database(format!("connection lock: {e}")))
    }

    fn watchers(&self) -> MutexGuard<'_, Watchers> {
        self.watchers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Push fresh snapshots to subscribers of anything in `touched`.
    fn publish(&self, touched: &BTreeSet<DocPath>) {
        if touched.is_empty() {
            return;
        }
        let mut watchers = self.watchers();
        watchers.documents.retain(|_, tx| tx.receiver_count() > 0);
        watchers.collections.retain(|_, tx| tx.receiver_count() > 0);
        if watchers.documents.is_empty() && watchers.collections.is_empty() {
            return;
        }

        let conn = match self.conn() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Skipping snapshot publish");
                return;
            }
        };

        for path in touched {
            if let Some(sender) = watchers.documents.get(path) {
                match read_document(&conn, path) {
                    Ok(doc) => {
                        sender.send_replace(doc);
                    }
                    Err(e) => warn!(path = %path, error = %e, "Document snapshot read failed"),
                }
            }
        }

        let collections: BTreeSet<&str> = touched.iter().map(DocPath::collection).collect();
        for collection in collections {
            if let Some(sender) = watchers.collections.get(collection) {
                match list_documents(&conn, collection) {
                    Ok(docs) => {
                        sender.send_replace(docs);
                    }
                    Err(e) => {
                        warn!(collection = %collection, error = %e, "Collection snapshot read failed")
                    }
                }
            }
        }
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn get(&self, path: &DocPath) -> StoreResult<Option<Document>> {
        let conn = self.conn()?;
        read_document(&conn, path)
    }

    fn list(&self, collection: &str) -> StoreResult<Vec<Document>> {
        let conn = self.conn()?;
        list_documents(&conn, collection)
    }

    fn create_with_generated_id(&self, collection: &str, data: Value) -> StoreResult<DocPath> {
        let path = DocPath::new(collection, Uuid::new_v4().simple().to_string());
        self.run_transaction(|tx| tx.set(&path, data))?;
        debug!(path = %path, "Document created");
        Ok(path)
    }

    fn watch_document(&self, path: &DocPath) -> StoreResult<Subscription<Option<Document>>> {
        path.validate()?;
        let mut watchers = self.watchers();
        if let Some(sender) = watchers.documents.get(path) {
            return Ok(Subscription::new(sender.subscribe()));
        }
        let current = {
            let conn = self.conn()?;
            read_document(&conn, path)?
        };
        let (tx, rx) = watch::channel(current);
        watchers.documents.insert(path.clone(), tx);
        Ok(Subscription::new(rx))
    }

    fn watch_collection(&self, collection: &str) -> StoreResult<Subscription<Vec<Document>>> {
        let mut watchers = self.watchers();
        if let Some(sender) = watchers.collections.get(collection) {
            return Ok(Subscription::new(sender.subscribe()));
        }
        let current = {
            let conn = self.conn()?;
            list_documents(&conn, collection)?
        };
        let (tx, rx) = watch::channel(current);
        watchers.collections.insert(collection.to_string(), tx);
        Ok(Subscription::new(rx))
    }

    fn run_transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, E>,
        E: From<StoreError>,
    {
        let (value, touched) = {
            let conn = self.conn()?;
            conn.execute_batch("BEGIN IMMEDIATE")
                .map_err(|e| StoreError::Database(format!("begin transaction: {e}")))?;

            let mut tx = SqliteTransaction {
                conn: &*conn,
                touched: BTreeSet::new(),
            };
            let result = work(&mut tx);
            let touched = std::mem::take(&mut tx.touched);

            match result {
                Ok(value) => {
                    if let Err(e) = conn.execute_batch("COMMIT") {
                        let _ = conn.execute_batch("ROLLBACK");
                        error!(error = %e, "Transaction commit failed");
                        return Err(StoreError::Database(format!("commit: {e}")).into());
                    }
                    (value, touched)
                }
                Err(e) => {
                    if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                        error!(error = %rollback_err, "Transaction rollback failed");
                    }
                    return Err(e);
                }
            }
        };

        self.publish(&touched);
        Ok(value)
    }
}

struct SqliteTransaction<'c> {
    conn: &'c Connection,
    touched: BTreeSet<DocPath>,
}

impl Transaction for SqliteTransaction<'_> {
    fn get(&mut self, path: &DocPath) -> StoreResult<Option<Document>> {
        read_document(self.conn, path)
    }

    fn set(&mut self, path: &DocPath, data: Value) -> StoreResult<()> {
        path.validate()?;
        if !data.is_object() {
            return Err(StoreError::Invalid(format!("{path}: body must be an object")));
        }
        write_document(self.conn, path, &data)?;
        self.touched.insert(path.clone());
        Ok(())
    }

    fn update(&mut self, path: &DocPath, fields: Value) -> StoreResult<()> {
        let Value::Object(fields) = fields else {
            return Err(StoreError::Invalid(format!("{path}: update must be an object")));
        };
        let mut doc =
            read_document(self.conn, path)?.ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        let Value::Object(ref mut body) = doc.data else {
            return Err(StoreError::Invalid(format!("{path}: stored body is not an object")));
        };
        for (k, v) in fields {
            body.insert(k, v);
        }
        write_document(self.conn, path, &doc.data)?;
        self.touched.insert(path.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn read_document(conn: &Connection, path: &DocPath) -> StoreResult<Option<Document>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT data FROM documents WHERE collection = ?1 AND doc_key = ?2",
            params![path.collection(), path.key()],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(raw) => Ok(Some(Document {
            path: path.clone(),
            data: serde_json::from_str(&raw)?,
        })),
        None => Ok(None),
    }
}

fn list_documents(conn: &Connection, collection: &str) -> StoreResult<Vec<Document>> {
    let mut stmt = conn.prepare(
        "SELECT doc_key, data FROM documents WHERE collection = ?1
         ORDER BY created_at, doc_key",
    )?;
    let rows = stmt.query_map(params![collection], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut docs = Vec::new();
    for row in rows {
        let (key, raw) = row?;
        docs.push(Document {
            path: DocPath::new(collection, key),
            data: serde_json::from_str(&raw)?,
        });
    }
    Ok(docs)
}

fn write_document(conn: &Connection, path: &DocPath, data: &Value) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO documents (collection, doc_key, data)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(collection, doc_key) DO UPDATE SET
            data = excluded.data,
            updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
        params![path.collection(), path.key(), data.to_string()],
    )?;
    Ok(())
}

/// In-memory store for unit tests across the crate.
#[cfg(test)]
pub fn test_store() -> SqliteDocumentStore {
    SqliteDocumentStore::new(crate::db::open_in_memory().expect("in-memory db"))
}

// ===========================================================================
// Tests
// ===========================================================================
