//! SQLite database layer for clipboard storage
//!
//! Single `items` table keyed by content identity.
//! Uses r2d2 connection pooling to allow concurrent reads without mutex blocking.

use crate::interface::{SemanticType, SourceFormat};
use crate::models::{ItemRecord, PayloadLocation};
use chrono::{DateTime, TimeZone, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),
    #[error("Database busy: {0}")]
    Busy(String),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        let busy = matches!(
            &e,
            rusqlite::Error::SqliteFailure(err, _)
                if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        );
        let corrupt = matches!(
            &e,
            rusqlite::Error::SqliteFailure(err, _)
                if matches!(err.code, ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase)
        ) || matches!(
            &e,
            rusqlite::Error::FromSqlConversionFailure(..) | rusqlite::Error::InvalidColumnType(..)
        );
        if busy {
            DatabaseError::Busy(e.to_string())
        } else if corrupt {
            DatabaseError::Corrupt(e.to_string())
        } else {
            DatabaseError::Sqlite(e)
        }
    }
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

#[derive(Error, Debug)]
#[error("unknown {column} value {value:?}")]
struct UnknownColumnValue {
    column: &'static str,
    value: String,
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

const ITEM_COLUMNS: &str = "identity, semanticType, sourceFormat, payload, preview, timestamp, \
     originApp, searchableText, length, blobPath, tag, isEphemeral, isSealed, imageWidth, imageHeight";

/// Parse timestamp string from database to DateTime<Utc>
fn parse_db_timestamp(timestamp_str: &str) -> DateTime<Utc> {
    chrono::NaiveDateTime::parse_from_str(timestamp_str, TIMESTAMP_FORMAT)
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(timestamp_str, "%Y-%m-%d %H:%M:%S"))
        .map(|dt| Utc.from_utc_datetime(&dt))
        .unwrap_or_else(|_| Utc::now())
}

fn format_db_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Thread-safe database wrapper using connection pooling
///
/// Uses r2d2 connection pool for concurrent read access.
/// WAL mode enables readers to proceed without blocking each other; writers
/// wait up to `busy_timeout` before surfacing [`DatabaseError::Busy`].
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open or create a database at the given path with connection pooling
    pub fn open<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> DatabaseResult<Self> {
        let busy_ms = busy_timeout.as_millis();
        let manager = SqliteConnectionManager::file(path)
            .with_init(move |conn| {
                conn.execute_batch(&format!("
                    PRAGMA busy_timeout={busy_ms};
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA mmap_size=67108864;
                    PRAGMA cache_size=-32000;
                "))?;
                Ok(())
            });

        let pool = Pool::builder()
            .max_size(8)
            .connection_timeout(busy_timeout)
            .build(manager)?;

        let db = Self { pool };
        db.setup_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| {
                conn.execute_batch("
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                ")?;
                Ok(())
            });

        // In-memory needs single connection to maintain state
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)?;

        let db = Self { pool };
        db.setup_schema()?;
        Ok(db)
    }

    /// Get a connection from the pool. A checkout timeout means every
    /// connection is held by a writer, which callers see as busy.
    fn get_conn(&self) -> DatabaseResult<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| DatabaseError::Busy(format!("connection pool exhausted: {}", e)))
    }

    fn setup_schema(&self) -> DatabaseResult<()> {
        let conn = self.get_conn()?;
        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS items (
                identity TEXT PRIMARY KEY NOT NULL,
                semanticType TEXT NOT NULL,
                sourceFormat TEXT NOT NULL,
                payload BLOB,
                preview BLOB,
                timestamp TEXT NOT NULL,
                originApp TEXT,
                searchableText TEXT NOT NULL DEFAULT '',
                length INTEGER NOT NULL DEFAULT 0,
                blobPath TEXT,
                tag TEXT,
                isEphemeral INTEGER NOT NULL DEFAULT 0,
                isSealed INTEGER NOT NULL DEFAULT 0,
                imageWidth INTEGER,
                imageHeight INTEGER,
                CHECK ((payload IS NULL) <> (blobPath IS NULL))
            );

            CREATE INDEX IF NOT EXISTS idx_items_timestamp ON items(timestamp);
            CREATE INDEX IF NOT EXISTS idx_items_ephemeral ON items(isEphemeral) WHERE isEphemeral = 1;
        "#)?;
        Ok(())
    }

    /// Get the database size in bytes
    pub fn database_size(&self) -> DatabaseResult<i64> {
        let conn = self.get_conn()?;
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok(page_count * page_size)
    }

    /// Get total number of items in the database
    pub fn count_items(&self) -> DatabaseResult<u64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Insert a new item. Returns `false` when a row with the same identity
    /// already exists (a concurrent capture won the race).
    pub fn insert_item(&self, record: &ItemRecord) -> DatabaseResult<bool> {
        let conn = self.get_conn()?;
        let (payload, blob_path) = match &record.payload {
            PayloadLocation::Inline(bytes) => (Some(bytes.as_slice()), None),
            PayloadLocation::External { path } => (None, Some(path.as_str())),
        };
        let inserted = conn.execute(
            r#"INSERT OR IGNORE INTO items (identity, semanticType, sourceFormat, payload, preview, timestamp,
                   originApp, searchableText, length, blobPath, tag, isEphemeral, isSealed, imageWidth, imageHeight)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"#,
            params![
                record.identity,
                record.semantic_type.database_str(),
                record.source_format.database_str(),
                payload,
                record.preview,
                format_db_timestamp(record.timestamp),
                record.origin_app,
                record.searchable_text,
                record.length as i64,
                blob_path,
                record.tag,
                record.is_ephemeral,
                record.is_sealed,
                record.image_size.map(|(width, _)| width),
                record.image_size.map(|(_, height)| height),
            ],
        )?;
        Ok(inserted == 1)
    }

    /// Find an item by identity
    pub fn find_by_identity(&self, identity: &str) -> DatabaseResult<Option<ItemRecord>> {
        let conn = self.get_conn()?;
        let record = conn
            .query_row(
                &format!("SELECT {} FROM items WHERE identity = ?1", ITEM_COLUMNS),
                [identity],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Most recent items first; ties broken by insertion order
    pub fn fetch_recent(&self, limit: usize) -> DatabaseResult<Vec<ItemRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM items ORDER BY timestamp DESC, rowid DESC LIMIT ?1",
            ITEM_COLUMNS
        ))?;
        let records = stmt
            .query_map([limit as i64], Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn fetch_ephemeral(&self) -> DatabaseResult<Vec<ItemRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM items WHERE isEphemeral = 1",
            ITEM_COLUMNS
        ))?;
        let records = stmt
            .query_map([], Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Update the timestamp of an existing item. Returns whether a row matched.
    pub fn update_timestamp(&self, identity: &str, timestamp: DateTime<Utc>) -> DatabaseResult<bool> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            "UPDATE items SET timestamp = ?1 WHERE identity = ?2",
            params![format_db_timestamp(timestamp), identity],
        )?;
        Ok(updated == 1)
    }

    pub fn update_tag(&self, identity: &str, tag: Option<&str>) -> DatabaseResult<bool> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            "UPDATE items SET tag = ?1 WHERE identity = ?2",
            params![tag, identity],
        )?;
        Ok(updated == 1)
    }

    /// Delete an item row. Returns whether a row was removed.
    pub fn delete_item(&self, identity: &str) -> DatabaseResult<bool> {
        let conn = self.get_conn()?;
        let deleted = conn.execute("DELETE FROM items WHERE identity = ?1", [identity])?;
        Ok(deleted == 1)
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ItemRecord> {
        let identity: String = row.get(0)?;
        let semantic_type_str: String = row.get(1)?;
        let source_format_str: String = row.get(2)?;
        let payload: Option<Vec<u8>> = row.get(3)?;
        let preview: Option<Vec<u8>> = row.get(4)?;
        let timestamp_str: String = row.get(5)?;
        let origin_app: Option<String> = row.get(6)?;
        let searchable_text: String = row.get(7)?;
        let length: i64 = row.get(8)?;
        let blob_path: Option<String> = row.get(9)?;
        let tag: Option<String> = row.get(10)?;
        let is_ephemeral: bool = row.get(11)?;
        let is_sealed: bool = row.get(12)?;
        let image_width: Option<u32> = row.get(13)?;
        let image_height: Option<u32> = row.get(14)?;

        let semantic_type = SemanticType::from_database_str(&semantic_type_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                Box::new(UnknownColumnValue { column: "semanticType", value: semantic_type_str.clone() }),
            )
        })?;

        let payload = match (payload, blob_path) {
            (Some(bytes), None) => PayloadLocation::Inline(bytes),
            (None, Some(path)) => PayloadLocation::External { path },
            (payload, _) => {
                return Err(rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Blob,
                    Box::new(UnknownColumnValue {
                        column: "payload/blobPath",
                        value: if payload.is_some() { "both set" } else { "neither set" }.to_string(),
                    }),
                ))
            }
        };

        Ok(ItemRecord {
            identity,
            source_format: SourceFormat::from_database_str(&source_format_str),
            semantic_type,
            payload,
            preview,
            timestamp: parse_db_timestamp(&timestamp_str),
            origin_app,
            searchable_text,
            length: length.max(0) as u64,
            tag,
            is_ephemeral,
            is_sealed,
            image_size: image_width.zip(image_height),
        })
    }
}
