//! Counter store adapters.
//!
//! Counters live in one bucket per campaign, keyed by event type and
//! publisher. The naming contract is shared with any pre-existing store
//! contents and must not change:
//!
//! ```text
//! bucket = "ev:{campaign_id}"
//! field  = "{event_type}:{publisher_id}"
//! ```
//!
//! Reads go through cursor pagination only. A scan starts at
//! [`ScanCursor::START`] and is complete when the store hands that same
//! sentinel back; individual pages may be empty before that happens.

pub mod glob;
pub mod memory;
pub mod sqlite;

pub use glob::{escape_glob, glob_match};
pub use memory::MemoryCounterStore;
pub use sqlite::SqliteCounterStore;

use std::fmt;

use serde::Serialize;

use crate::error::StoreError;
use crate::model::{CampaignId, PublisherId};

/// Prefix of every per-campaign bucket.
pub const BUCKET_PREFIX: &str = "ev:";

/// Bucket holding all counters of one campaign.
#[must_use]
pub fn bucket_key(campaign_id: CampaignId) -> String {
    format!("{BUCKET_PREFIX}{campaign_id}")
}

/// Field holding one (event type, publisher) counter inside a bucket.
#[must_use]
pub fn field_key(event_type: &str, publisher_id: PublisherId) -> String {
    format!("{event_type}:{publisher_id}")
}

/// Scan pattern selecting every publisher counter of one event type.
#[must_use]
pub fn field_pattern(event_type: &str) -> String {
    format!("{}:*", escape_glob(event_type))
}

/// Publisher id encoded after the last `:` of a field key.
#[must_use]
pub fn publisher_from_field(field: &str) -> Option<PublisherId> {
    let (_, suffix) = field.rsplit_once(':')?;
    suffix.parse().ok()
}

/// One pipelined increment operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Increment {
    pub bucket: String,
    pub field: String,
    pub delta: u64,
}

/// Opaque position inside an incremental scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct ScanCursor(u64);

impl ScanCursor {
    /// Cursor that starts a scan and signals its completion.
    pub const START: Self = Self(0);

    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// True when this cursor is the start/completion sentinel.
    #[must_use]
    pub const fn is_sentinel(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ScanCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fields returned by one scan call plus the cursor for the next call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanPage {
    pub entries: Vec<(String, u64)>,
    pub next: ScanCursor,
}

/// External associative store holding the event counters.
///
/// Implementations must make their own writes visible to subsequent scans
/// (read-after-write) once an increment call has returned.
pub trait CounterStore {
    /// Add `delta` to one field and return the new value.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store rejects the write.
    fn increment(&mut self, bucket: &str, field: &str, delta: u64) -> Result<u64, StoreError>;

    /// Submit a batch of increments as one pipelined call.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if any increment in the batch fails.
    fn increment_batch(&mut self, batch: &[Increment]) -> Result<(), StoreError> {
        for op in batch {
            self.increment(&op.bucket, &op.field, op.delta)?;
        }
        Ok(())
    }

    /// Fetch the next page of `bucket` fields matching the glob `pattern`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store cannot be read or the cursor is
    /// not one this store handed out.
    fn scan(&self, bucket: &str, cursor: ScanCursor, pattern: &str)
    -> Result<ScanPage, StoreError>;

    /// Wipe the whole working keyspace.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store cannot be cleared.
    fn clear(&mut self) -> Result<(), StoreError>;
}

impl<S: CounterStore + ?Sized> CounterStore for &mut S {
    fn increment(&mut self, bucket: &str, field: &str, delta: u64) -> Result<u64, StoreError> {
        (**self).increment(bucket, field, delta)
    }

    fn increment_batch(&mut self, batch: &[Increment]) -> Result<(), StoreError> {
        (**self).increment_batch(batch)
    }

    fn scan(
        &self,
        bucket: &str,
        cursor: ScanCursor,
        pattern: &str,
    ) -> Result<ScanPage, StoreError> {
        (**self).scan(bucket, cursor, pattern)
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        (**self).clear()
    }
}

/// Paginate a scan to completion and collect every matching field.
///
/// # Errors
///
/// Propagates the first scan failure.
pub fn scan_all<S: CounterStore + ?Sized>(
    store: &S,
    bucket: &str,
    pattern: &str,
) -> Result<Vec<(String, u64)>, StoreError> {
    let mut entries = Vec::new();
    let mut cursor = ScanCursor::START;
    loop {
        let page = store.scan(bucket, cursor, pattern)?;
        entries.extend(page.entries);
        cursor = page.next;
        if cursor.is_sentinel() {
            return Ok(entries);
        }
    }
}
