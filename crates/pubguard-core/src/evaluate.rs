//! Threshold evaluation of per-publisher counters.
//!
//! For one campaign the source-event and measured-event counters are read
//! back page by page from the campaign bucket. Every source counter at or
//! above the campaign threshold is judged:
//!
//! - no measured counter on the joined page: blacklist;
//! - `measured / source` (truncated to three digits) strictly below the
//!   ratio threshold: blacklist;
//! - otherwise, if the publisher is currently blacklisted: whitelist.
//!
//! Publishers below the threshold are left alone for this run. Deltas keep
//! page-encounter order and are neither sorted nor deduplicated.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span, warn};

use crate::error::StoreError;
use crate::model::{Campaign, PublisherId, conversion_ratio};
use crate::store::{
    CounterStore, ScanCursor, bucket_key, field_pattern, publisher_from_field, scan_all,
};

/// How the measured-event scan is joined against the source-event scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasuredScan {
    /// Paginate both scans on the same loop iteration. Once the measured
    /// scan is complete it contributes empty pages until the source scan
    /// completes; measured pages past the source scan's end are never read.
    #[default]
    Lockstep,
    /// Drain the measured scan before paginating the source scan, so every
    /// source page is joined against all measured counters.
    Prefetch,
}

/// Blacklist and whitelist deltas for one campaign.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub blacklist: Vec<PublisherId>,
    pub whitelist: Vec<PublisherId>,
    /// Source-scan pages walked.
    pub pages: u64,
}

/// Evaluate one campaign against the counters in `store`.
///
/// # Errors
///
/// A failed scan aborts evaluation of this campaign and is returned as is;
/// no partial verdict is produced.
pub fn evaluate<S: CounterStore + ?Sized>(
    campaign: &Campaign,
    store: &S,
    strategy: MeasuredScan,
) -> Result<Verdict, StoreError> {
    let _span = debug_span!("evaluate_campaign", campaign_id = campaign.id).entered();

    let bucket = bucket_key(campaign.id);
    let source_pattern = field_pattern(&campaign.opt_props.source_event);
    let measured_pattern = field_pattern(&campaign.opt_props.measured_event);

    let mut measured_scan = match strategy {
        MeasuredScan::Lockstep => MeasuredPages::Lockstep {
            cursor: ScanCursor::START,
            done: false,
        },
        MeasuredScan::Prefetch => MeasuredPages::Prefetched(measured_counts(&scan_all(
            store,
            &bucket,
            &measured_pattern,
        )?)),
    };

    let mut verdict = Verdict::default();
    let mut source_cursor = ScanCursor::START;
    loop {
        let source_page = store.scan(&bucket, source_cursor, &source_pattern)?;
        let measured = measured_scan.next_page(store, &bucket, &measured_pattern)?;

        debug!(
            page = verdict.pages,
            source_fields = source_page.entries.len(),
            measured_fields = measured.len(),
            "scanned counter page"
        );
        judge_page(campaign, &source_page.entries, &measured, &mut verdict);
        verdict.pages += 1;

        source_cursor = source_page.next;
        if source_cursor.is_sentinel() {
            return Ok(verdict);
        }
    }
}

enum MeasuredPages {
    Lockstep { cursor: ScanCursor, done: bool },
    Prefetched(HashMap<PublisherId, u64>),
}

impl MeasuredPages {
    fn next_page<S: CounterStore + ?Sized>(
        &mut self,
        store: &S,
        bucket: &str,
        pattern: &str,
    ) -> Result<HashMap<PublisherId, u64>, StoreError> {
        match self {
            Self::Lockstep { done: true, .. } => Ok(HashMap::new()),
            Self::Lockstep { cursor, done } => {
                let page = store.scan(bucket, *cursor, pattern)?;
                *cursor = page.next;
                *done = page.next.is_sentinel();
                Ok(measured_counts(&page.entries))
            }
            Self::Prefetched(all) => Ok(all.clone()),
        }
    }
}

fn measured_counts(entries: &[(String, u64)]) -> HashMap<PublisherId, u64> {
    let mut counts = HashMap::with_capacity(entries.len());
    for (field, count) in entries {
        match publisher_from_field(field) {
            Some(publisher) => {
                counts.insert(publisher, *count);
            }
            None => warn!(field = %field, "skipping measured counter without publisher id"),
        }
    }
    counts
}

fn judge_page(
    campaign: &Campaign,
    source: &[(String, u64)],
    measured: &HashMap<PublisherId, u64>,
    verdict: &mut Verdict,
) {
    let props = &campaign.opt_props;
    for &(ref field, source_count) in source {
        if source_count < props.threshold {
            continue;
        }
        let Some(publisher) = publisher_from_field(field) else {
            warn!(field = %field, "skipping source counter without publisher id");
            continue;
        };

        let Some(&measured_count) = measured.get(&publisher) else {
            verdict.blacklist.push(publisher);
            continue;
        };

        match conversion_ratio(measured_count, source_count) {
            Some(ratio) if props.ratio_threshold.is_above(ratio) => {
                verdict.blacklist.push(publisher);
            }
            Some(_) if campaign.is_blacklisted(publisher) => verdict.whitelist.push(publisher),
            Some(_) => {}
            None => warn!(publisher, "zero source count with measured events; no ratio"),
        }
    }
}
