//! Main store implementation.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use time::OffsetDateTime;
use tracing::{debug, info};

use safetrail_types::{DocumentPath, Fields, Timestamp};

use crate::error::{Error, Result};
use crate::models::StoredDocument;
use crate::schema;

/// SQLite-based document store.
///
/// Documents are addressed by [`DocumentPath`] and hold a JSON object of
/// fields. Only document paths (an even number of segments) can be written;
/// collections exist implicitly through the documents inside them.
pub struct Store {
    conn: Connection,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    /// Read a document's fields.
    pub fn get_document(&self, path: &DocumentPath) -> Result<Option<Fields>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT fields FROM documents WHERE path = ?",
                [path.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|raw| parse_fields(&path.to_string(), &raw)).transpose()
    }

    /// Write a document.
    ///
    /// With `merge`, top-level fields are merged into the existing document
    /// (new values win); otherwise the document is replaced.
    pub fn set_document(&self, path: &DocumentPath, fields: Fields, merge: bool) -> Result<()> {
        let collection = collection_of(path)?;
        let key = path.to_string();
        let now = Timestamp::from(OffsetDateTime::now_utc()).as_millis();

        let tx = self.conn.unchecked_transaction()?;
        let fields = if merge {
            let existing: Option<String> = tx
                .query_row("SELECT fields FROM documents WHERE path = ?", [&key], |row| {
                    row.get(0)
                })
                .optional()?;
            match existing {
                Some(raw) => {
                    let mut merged = parse_fields(&key, &raw)?;
                    merged.extend(fields);
                    merged
                }
                None => fields,
            }
        } else {
            fields
        };

        tx.execute(
            "INSERT INTO documents (path, collection, fields, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET
                fields = excluded.fields,
                updated_at = excluded.updated_at",
            rusqlite::params![key, collection, serde_json::to_string(&fields)?, now],
        )?;
        tx.commit()?;

        debug!("Wrote document {}", key);
        Ok(())
    }

    /// Delete a document. Returns whether it existed.
    pub fn delete_document(&self, path: &DocumentPath) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM documents WHERE path = ?", [path.to_string()])?;
        if deleted > 0 {
            debug!("Deleted document {}", path);
        }
        Ok(deleted > 0)
    }

    /// List the documents directly inside a collection, ordered by path.
    pub fn list_collection(&self, collection: &DocumentPath) -> Result<Vec<StoredDocument>> {
        let collection = collection.to_string();
        let mut stmt = self.conn.prepare(
            "SELECT path, fields, updated_at FROM documents
             WHERE collection = ? ORDER BY path",
        )?;

        let rows = stmt
            .query_map([&collection], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(path, raw, updated_at)| {
                let fields = parse_fields(&path, &raw)?;
                let id = path.rsplit('/').next().unwrap_or_default().to_string();
                Ok(StoredDocument {
                    id,
                    collection: collection.clone(),
                    fields,
                    updated_at: Timestamp::from_millis(updated_at)
                        .to_offset_date_time()
                        .unwrap_or(OffsetDateTime::UNIX_EPOCH),
                    path,
                })
            })
            .collect()
    }

    /// Count documents, optionally only those in one collection.
    pub fn count_documents(&self, collection: Option<&DocumentPath>) -> Result<u64> {
        let count: i64 = match collection {
            Some(collection) => self.conn.query_row(
                "SELECT COUNT(*) FROM documents WHERE collection = ?",
                [collection.to_string()],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?,
        };
        Ok(count as u64)
    }
}

fn collection_of(path: &DocumentPath) -> Result<String> {
    if !path.is_document() {
        return Err(Error::invalid_document(path, "not a document path"));
    }
    path.parent()
        .map(|parent| parent.to_string())
        .ok_or_else(|| Error::invalid_document(path, "document has no collection"))
}

fn parse_fields(path: &str, raw: &str) -> Result<Fields> {
    match serde_json::from_str(raw)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(Error::invalid_document(
            path,
            format!("expected a JSON object, found {}", other),
        )),
    }
}
