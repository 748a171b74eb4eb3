//! SQLite-backed counter store.
//!
//! One row per `(bucket, field)`. Scans are keyset-paginated on `rowid`,
//! which follows insertion order: a call examines up to `page_size` rows of
//! the bucket after the cursor rowid and keeps the ones matching the pattern.
//! The cursor is the last examined rowid, or the sentinel once a short page
//! shows the bucket is exhausted.

use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params, types::Type};
use tracing::debug;

use super::{CounterStore, Increment, ScanCursor, ScanPage, glob_match};
use crate::error::StoreError;
use crate::lock::RunLock;

/// Busy timeout used for counter store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Latest schema version understood by this binary.
pub const LATEST_SCHEMA_VERSION: u32 = 1;

const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS counters (
    bucket TEXT NOT NULL,
    field  TEXT NOT NULL,
    count  INTEGER NOT NULL CHECK (count >= 0),
    PRIMARY KEY (bucket, field)
);
CREATE INDEX IF NOT EXISTS counters_bucket ON counters (bucket);
";

const MIGRATIONS: &[(u32, &str)] = &[(1, MIGRATION_V1_SQL)];

const UPSERT_SQL: &str = "INSERT INTO counters (bucket, field, count) VALUES (?1, ?2, ?3) \
     ON CONFLICT (bucket, field) DO UPDATE SET count = count + excluded.count \
     RETURNING count";

/// Counter store persisted in a SQLite database file.
#[derive(Debug)]
pub struct SqliteCounterStore {
    conn: Connection,
    page_size: NonZeroUsize,
    lock: Option<RunLock>,
}

impl SqliteCounterStore {
    /// Open (or create) a store database without taking the run lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened, configured or
    /// migrated.
    pub fn open(path: &Path, page_size: NonZeroUsize) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn, page_size)
    }

    /// Open a store and hold `<path>.lock` exclusively until the store drops.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Lock`] if another run holds the lock longer than
    /// `lock_timeout`, or any error from [`Self::open`].
    pub fn open_locked(
        path: &Path,
        page_size: NonZeroUsize,
        lock_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let lock = RunLock::acquire(&RunLock::path_for_store(path), lock_timeout)?;
        let mut store = Self::open(path, page_size)?;
        store.lock = Some(lock);
        Ok(store)
    }

    /// Private in-memory database, mainly for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot create the database.
    pub fn open_in_memory(page_size: NonZeroUsize) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, page_size)
    }

    fn from_connection(mut conn: Connection, page_size: NonZeroUsize) -> Result<Self, StoreError> {
        configure_connection(&conn)?;
        migrate(&mut conn)?;
        Ok(Self {
            conn,
            page_size,
            lock: None,
        })
    }

    /// True while this store holds the run lock.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Current value of one counter, if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(&self, bucket: &str, field: &str) -> Result<Option<u64>, StoreError> {
        let count = self
            .conn
            .query_row(
                "SELECT count FROM counters WHERE bucket = ?1 AND field = ?2",
                params![bucket, field],
                |row| count_from_sql(row.get(0)?),
            )
            .optional()?;
        Ok(count)
    }
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(version).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(error))
    })
}

fn migrate(conn: &mut Connection) -> rusqlite::Result<u32> {
    let mut current = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", i64::from(*version))?;
        tx.commit()?;
        current = *version;
    }

    Ok(current)
}

fn count_from_sql(raw: i64) -> rusqlite::Result<u64> {
    u64::try_from(raw).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(error))
    })
}

fn delta_to_sql(bucket: &str, field: &str, delta: u64) -> Result<i64, StoreError> {
    i64::try_from(delta).map_err(|_| StoreError::Overflow {
        bucket: bucket.to_string(),
        field: field.to_string(),
    })
}

impl CounterStore for SqliteCounterStore {
    fn increment(&mut self, bucket: &str, field: &str, delta: u64) -> Result<u64, StoreError> {
        let delta = delta_to_sql(bucket, field, delta)?;
        let mut stmt = self.conn.prepare_cached(UPSERT_SQL)?;
        let count = stmt.query_row(params![bucket, field, delta], |row| {
            count_from_sql(row.get(0)?)
        })?;
        Ok(count)
    }

    fn increment_batch(&mut self, batch: &[Increment]) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
            for op in batch {
                let delta = delta_to_sql(&op.bucket, &op.field, op.delta)?;
                stmt.query_row(params![op.bucket, op.field, delta], |_| Ok(()))?;
            }
        }
        tx.commit()?;
        debug!(operations = batch.len(), "sqlite batch committed");
        Ok(())
    }

    fn scan(
        &self,
        bucket: &str,
        cursor: ScanCursor,
        pattern: &str,
    ) -> Result<ScanPage, StoreError> {
        let after = i64::try_from(cursor.raw()).map_err(|_| StoreError::InvalidCursor(cursor.raw()))?;
        let limit = i64::try_from(self.page_size.get()).unwrap_or(i64::MAX);

        let mut stmt = self.conn.prepare_cached(
            "SELECT rowid, field, count FROM counters \
             WHERE bucket = ?1 AND rowid > ?2 \
             ORDER BY rowid LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![bucket, after, limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    count_from_sql(row.get(2)?)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let examined = rows.len();
        let last_rowid = rows.last().map(|(rowid, _, _)| *rowid);
        let entries = rows
            .into_iter()
            .filter(|(_, field, _)| glob_match(pattern, field))
            .map(|(_, field, count)| (field, count))
            .collect();

        let next = match last_rowid {
            Some(rowid) if examined == self.page_size.get() => {
                ScanCursor::new(u64::try_from(rowid).map_err(|_| StoreError::InvalidCursor(0))?)
            }
            _ => ScanCursor::START,
        };

        Ok(ScanPage { entries, next })
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        let removed = self.conn.execute("DELETE FROM counters", [])?;
        debug!(removed, "sqlite counter store cleared");
        Ok(())
    }
}
