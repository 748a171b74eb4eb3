//! Folding raw events into per-campaign counters.
//!
//! Events are counted in a pending batch keyed by
//! `(campaign, publisher, event type)`. The batch is flushed to the store as
//! one pipelined call whenever its distinct-entry count is a multiple of the
//! batch size, and once more after the event stream ends.
//!
//! The multiple-of check runs after every event, not only after events that
//! add a new entry. Because a flush resets the distinct count to zero, the
//! check could fire again on an empty batch; such no-op flushes are elided.
//! Flush cadence is therefore driven by distinct entries, never by the raw
//! number of events.
//!
//! Event type names are interned once per aggregator, so folding an event
//! into an existing entry does not allocate.

use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::error::StoreError;
use crate::model::{CampaignId, Event, PublisherId};
use crate::store::{CounterStore, Increment, bucket_key, field_key};

/// Composite key of one pending counter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CounterKey {
    pub campaign_id: CampaignId,
    pub publisher_id: PublisherId,
    pub event_type: Arc<str>,
}

impl CounterKey {
    fn to_increment(&self, delta: u64) -> Increment {
        Increment {
            bucket: bucket_key(self.campaign_id),
            field: field_key(&self.event_type, self.publisher_id),
            delta,
        }
    }
}

/// What one aggregation pass wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AggregateStats {
    /// Events folded into counters.
    pub events: u64,
    /// Non-empty pipelined submissions.
    pub flushes: u64,
    /// Increment operations across all submissions.
    pub increments: u64,
}

/// Streaming aggregator holding the pending batch between flushes.
#[derive(Debug)]
pub struct Aggregator {
    batch_size: NonZeroUsize,
    pending: BTreeMap<CounterKey, u64>,
    event_types: BTreeSet<Arc<str>>,
    distinct: usize,
    stats: AggregateStats,
}

impl Aggregator {
    #[must_use]
    pub const fn new(batch_size: NonZeroUsize) -> Self {
        Self {
            batch_size,
            pending: BTreeMap::new(),
            event_types: BTreeSet::new(),
            distinct: 0,
            stats: AggregateStats {
                events: 0,
                flushes: 0,
                increments: 0,
            },
        }
    }

    /// Fold one event in, flushing when the distinct count hits the boundary.
    ///
    /// # Errors
    ///
    /// Propagates the store failure of a triggered flush.
    pub fn push<S: CounterStore + ?Sized>(
        &mut self,
        event: &Event,
        sink: &mut S,
    ) -> Result<(), StoreError> {
        let key = self.key_for(event);
        match self.pending.get_mut(&key) {
            Some(count) => *count += 1,
            None => {
                self.pending.insert(key, 1);
                self.distinct += 1;
            }
        }
        self.stats.events += 1;

        if self.distinct % self.batch_size.get() == 0 {
            self.flush(sink)?;
        }
        Ok(())
    }

    /// Flush whatever is left and return the totals.
    ///
    /// # Errors
    ///
    /// Propagates the store failure of the final flush.
    pub fn finish<S: CounterStore + ?Sized>(
        mut self,
        sink: &mut S,
    ) -> Result<AggregateStats, StoreError> {
        self.flush(sink)?;
        Ok(self.stats)
    }

    fn key_for(&mut self, event: &Event) -> CounterKey {
        let name = event.event_type.as_str();
        let event_type = self
            .event_types
            .get(name)
            .cloned()
            .unwrap_or_else(|| Arc::from(name));
        // keeps the first copy when the name is already known
        self.event_types.insert(Arc::clone(&event_type));
        CounterKey {
            campaign_id: event.campaign_id,
            publisher_id: event.publisher_id,
            event_type,
        }
    }

    /// Entries currently waiting for a flush.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn flush<S: CounterStore + ?Sized>(&mut self, sink: &mut S) -> Result<(), StoreError> {
        self.distinct = 0;
        if self.pending.is_empty() {
            return Ok(());
        }

        let batch: Vec<Increment> = std::mem::take(&mut self.pending)
            .iter()
            .map(|(key, &count)| key.to_increment(count))
            .collect();
        sink.increment_batch(&batch)?;

        self.stats.flushes += 1;
        self.stats.increments += batch.len() as u64;
        debug!(operations = batch.len(), "flushed counter batch");
        Ok(())
    }
}

/// Aggregate a finite event sequence into `sink`.
///
/// # Errors
///
/// Any store failure aborts aggregation; batches are not retried.
pub fn aggregate<'a, I, S>(
    events: I,
    batch_size: NonZeroUsize,
    sink: &mut S,
) -> Result<AggregateStats, StoreError>
where
    I: IntoIterator<Item = &'a Event>,
    S: CounterStore + ?Sized,
{
    let mut aggregator = Aggregator::new(batch_size);
    for event in events {
        aggregator.push(event, sink)?;
    }
    aggregator.finish(sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryCounterStore, ScanCursor, ScanPage};

    fn batch(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).expect("non-zero")
    }

    fn ev(event_type: &str, campaign: i64, publisher: i64) -> Event {
        Event::new(event_type, campaign, publisher, 1_709_251_200)
    }

    #[derive(Default)]
    struct RecordingSink {
        batches: Vec<Vec<Increment>>,
    }

    impl CounterStore for RecordingSink {
        fn increment(&mut self, bucket: &str, field: &str, delta: u64) -> Result<u64, StoreError> {
            self.batches.push(vec![Increment {
                bucket: bucket.into(),
                field: field.into(),
                delta,
            }]);
            Ok(delta)
        }

        fn increment_batch(&mut self, batch: &[Increment]) -> Result<(), StoreError> {
            self.batches.push(batch.to_vec());
            Ok(())
        }

        fn scan(&self, _: &str, _: ScanCursor, _: &str) -> Result<ScanPage, StoreError> {
            Ok(ScanPage::default())
        }

        fn clear(&mut self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct FailingSink;

    impl CounterStore for FailingSink {
        fn increment(&mut self, _: &str, _: &str, _: u64) -> Result<u64, StoreError> {
            Err(StoreError::InvalidCursor(0))
        }

        fn scan(&self, _: &str, _: ScanCursor, _: &str) -> Result<ScanPage, StoreError> {
            Ok(ScanPage::default())
        }

        fn clear(&mut self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[test]
    fn counts_use_the_key_naming_contract() {
        let events = [
            ev("install", 1, 10),
            ev("install", 1, 10),
            ev("purchase", 1, 10),
            ev("install", 2, 10),
        ];
        let mut store = MemoryCounterStore::default();
        let stats = aggregate(&events, batch(100), &mut store).expect("aggregate");

        assert_eq!(store.get("ev:1", "install:10"), Some(2));
        assert_eq!(store.get("ev:1", "purchase:10"), Some(1));
        assert_eq!(store.get("ev:2", "install:10"), Some(1));
        assert_eq!(stats.events, 4);
        assert_eq!(stats.flushes, 1);
        assert_eq!(stats.increments, 3);
    }

    #[test]
    fn flush_fires_on_distinct_entry_boundary() {
        // distinct entries: a(1) a a b(2) -> flush, c(1) c d(2) -> flush
        let events = [
            ev("install", 1, 1),
            ev("install", 1, 1),
            ev("install", 1, 1),
            ev("install", 1, 2),
            ev("install", 1, 3),
            ev("install", 1, 3),
            ev("install", 1, 4),
        ];
        let mut sink = RecordingSink::default();
        let stats = aggregate(&events, batch(2), &mut sink).expect("aggregate");

        assert_eq!(sink.batches.len(), 2);
        let deltas: Vec<Vec<u64>> = sink
            .batches
            .iter()
            .map(|b| b.iter().map(|op| op.delta).collect())
            .collect();
        assert_eq!(deltas, vec![vec![3, 1], vec![2, 1]]);
        assert_eq!(stats.flushes, 2);
    }

    #[test]
    fn repeated_events_do_not_trigger_flush() {
        let events = vec![ev("install", 1, 1); 10];
        let mut sink = RecordingSink::default();
        aggregate(&events, batch(3), &mut sink).expect("aggregate");

        assert_eq!(sink.batches.len(), 1, "only the final flush");
        assert_eq!(sink.batches[0][0].delta, 10);
    }

    #[test]
    fn batch_size_one_flushes_every_event() {
        let events = [ev("install", 1, 1), ev("install", 1, 1), ev("purchase", 1, 1)];
        let mut sink = RecordingSink::default();
        let stats = aggregate(&events, batch(1), &mut sink).expect("aggregate");
        assert_eq!(sink.batches.len(), 3);
        assert_eq!(stats.increments, 3);
    }

    #[test]
    fn empty_stream_issues_no_calls() {
        let events: [Event; 0] = [];
        let mut sink = RecordingSink::default();
        let stats = aggregate(&events, batch(5), &mut sink).expect("aggregate");
        assert!(sink.batches.is_empty());
        assert_eq!(stats, AggregateStats::default());
    }

    #[test]
    fn final_partial_batch_is_flushed() {
        let events = [ev("install", 1, 1), ev("install", 1, 2), ev("install", 1, 3)];
        let mut sink = RecordingSink::default();
        aggregate(&events, batch(2), &mut sink).expect("aggregate");
        let sizes: Vec<usize> = sink.batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 1]);
    }

    #[test]
    fn store_failure_aborts() {
        let events = [ev("install", 1, 1)];
        let err = aggregate(&events, batch(1), &mut FailingSink).expect_err("must fail");
        assert!(matches!(err, StoreError::InvalidCursor(0)));
    }

    #[test]
    fn pending_is_empty_after_boundary_flush() {
        let mut aggregator = Aggregator::new(batch(2));
        let mut store = MemoryCounterStore::default();
        aggregator.push(&ev("install", 1, 1), &mut store).expect("push");
        assert_eq!(aggregator.pending_len(), 1);
        aggregator.push(&ev("install", 1, 2), &mut store).expect("push");
        assert_eq!(aggregator.pending_len(), 0);
        assert_eq!(store.batches_submitted(), 1);
    }

    #[test]
    fn event_type_names_are_shared_between_keys() {
        let mut aggregator = Aggregator::new(batch(100));
        let mut store = MemoryCounterStore::default();
        for event in [ev("install", 1, 1), ev("install", 1, 2), ev("purchase", 1, 1)] {
            aggregator.push(&event, &mut store).expect("push");
        }

        assert_eq!(aggregator.event_types.len(), 2);
        let installs: Vec<&Arc<str>> = aggregator
            .pending
            .keys()
            .filter(|key| &*key.event_type == "install")
            .map(|key| &key.event_type)
            .collect();
        assert_eq!(installs.len(), 2);
        assert!(Arc::ptr_eq(installs[0], installs[1]));
    }
}
