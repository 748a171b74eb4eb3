//! In-process counter store with incremental-scan semantics.
//!
//! Each bucket keeps its fields in insertion order. A scan call examines at
//! most `page_size` fields starting at the cursor position and returns the
//! ones matching the pattern, so pages can be empty while the scan is still
//! in progress. The cursor is the position of the next field to examine and
//! drops back to the sentinel once the bucket end is reached.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use super::{CounterStore, Increment, ScanCursor, ScanPage, glob_match};
use crate::error::StoreError;

/// Fields examined per scan call when no page size is given.
pub const DEFAULT_PAGE_SIZE: NonZeroUsize = NonZeroUsize::MIN.saturating_add(9);

#[derive(Debug, Default, Clone)]
struct Bucket {
    fields: Vec<(String, u64)>,
    index: HashMap<String, usize>,
}

/// Counter store held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryCounterStore {
    buckets: HashMap<String, Bucket>,
    page_size: NonZeroUsize,
    batches_submitted: usize,
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl MemoryCounterStore {
    #[must_use]
    pub fn new(page_size: NonZeroUsize) -> Self {
        Self {
            buckets: HashMap::new(),
            page_size,
            batches_submitted: 0,
        }
    }

    /// Convenience for tests and tools; a zero page size is raised to one.
    #[must_use]
    pub fn with_page_size(page_size: usize) -> Self {
        Self::new(NonZeroUsize::new(page_size).unwrap_or(NonZeroUsize::MIN))
    }

    /// Current value of one counter, if it exists.
    #[must_use]
    pub fn get(&self, bucket: &str, field: &str) -> Option<u64> {
        let bucket = self.buckets.get(bucket)?;
        bucket.index.get(field).map(|&pos| bucket.fields[pos].1)
    }

    /// All counters as `(bucket, field, count)`, sorted for comparison.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, String, u64)> {
        let mut all: Vec<_> = self
            .buckets
            .iter()
            .flat_map(|(name, bucket)| {
                bucket
                    .fields
                    .iter()
                    .map(move |(field, count)| (name.clone(), field.clone(), *count))
            })
            .collect();
        all.sort();
        all
    }

    /// Number of pipelined batch submissions received so far.
    #[must_use]
    pub const fn batches_submitted(&self) -> usize {
        self.batches_submitted
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl CounterStore for MemoryCounterStore {
    fn increment(&mut self, bucket: &str, field: &str, delta: u64) -> Result<u64, StoreError> {
        let entry = self.buckets.entry(bucket.to_string()).or_default();
        let pos = match entry.index.get(field) {
            Some(&pos) => pos,
            None => {
                entry.fields.push((field.to_string(), 0));
                let pos = entry.fields.len() - 1;
                entry.index.insert(field.to_string(), pos);
                pos
            }
        };

        let slot = &mut entry.fields[pos].1;
        *slot = slot.checked_add(delta).ok_or_else(|| StoreError::Overflow {
            bucket: bucket.to_string(),
            field: field.to_string(),
        })?;
        Ok(*slot)
    }

    fn increment_batch(&mut self, batch: &[Increment]) -> Result<(), StoreError> {
        self.batches_submitted += 1;
        for op in batch {
            self.increment(&op.bucket, &op.field, op.delta)?;
        }
        Ok(())
    }

    fn scan(
        &self,
        bucket: &str,
        cursor: ScanCursor,
        pattern: &str,
    ) -> Result<ScanPage, StoreError> {
        let Some(bucket) = self.buckets.get(bucket) else {
            return Ok(ScanPage::default());
        };

        let start = usize::try_from(cursor.raw())
            .ok()
            .filter(|&start| start <= bucket.fields.len())
            .ok_or(StoreError::InvalidCursor(cursor.raw()))?;
        let end = start
            .saturating_add(self.page_size.get())
            .min(bucket.fields.len());

        let entries = bucket.fields[start..end]
            .iter()
            .filter(|(field, _)| glob_match(pattern, field))
            .cloned()
            .collect();

        let next = if end >= bucket.fields.len() {
            ScanCursor::START
        } else {
            ScanCursor::new(end as u64)
        };

        Ok(ScanPage { entries, next })
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.buckets.clear();
        Ok(())
    }
}
