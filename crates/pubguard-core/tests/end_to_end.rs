//! End-to-end runs over the CSV fixtures with the in-memory store.
//!
//! Fixtures:
//! - `recovery`: campaign 1 gains publishers 20 and 40, keeps 100 and
//!   releases 200; purchases before the start cutoff must not count.
//! - `threshold`: campaign 4 releases 300, publisher 302 sits exactly on the
//!   ratio threshold and 301 is below the sample threshold.

use std::path::{Path, PathBuf};

use chrono::Utc;
use pubguard_core::config::{EvaluationConfig, JobConfig, StoreConfig};
use pubguard_core::evaluate::MeasuredScan;
use pubguard_core::reconcile::{Notification, RecordingBlacklistSink, RecordingNotifier};
use pubguard_core::store::MemoryCounterStore;
use pubguard_core::{JobError, JobReport, OptimizationJob};

// ---------------------------------------------------------------------------
// Test Harness
// ---------------------------------------------------------------------------

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

struct Run {
    report: JobReport,
    notifications: Vec<Notification>,
    saved: RecordingBlacklistSink,
    store: MemoryCounterStore,
}

fn run_fixture(
    name: &str,
    batch_size: usize,
    page_size: usize,
    measured_scan: MeasuredScan,
) -> Result<Run, JobError> {
    let config = JobConfig {
        campaigns_path: fixture(&format!("campaigns_{name}.csv")),
        events_path: fixture(&format!("events_{name}.csv")),
        start: "2024-02-01 00:00:00".into(),
        batch_size,
        clear_on_completion: false,
        store: StoreConfig {
            scan_page_size: page_size,
            ..StoreConfig::default()
        },
        evaluation: EvaluationConfig { measured_scan },
    };
    let job = OptimizationJob::from_config(&config, Utc::now())?;

    let mut store = MemoryCounterStore::with_page_size(page_size);
    let notifier = RecordingNotifier::new();
    let mut saved = RecordingBlacklistSink::new();
    let report = job.run(&mut store, &notifier, &mut saved)?;

    Ok(Run {
        report,
        notifications: notifier.notifications(),
        saved,
        store,
    })
}

fn whitelisted(campaign_id: i64, publishers: &[i64]) -> Notification {
    Notification::Whitelisted {
        campaign_id,
        publishers: publishers.to_vec(),
    }
}

fn blacklisted(campaign_id: i64, publishers: &[i64]) -> Notification {
    Notification::Blacklisted {
        campaign_id,
        publishers: publishers.to_vec(),
    }
}

fn saved(campaign_id: i64, publishers: &[i64]) -> Notification {
    Notification::BlacklistSaved {
        campaign_id,
        publishers: publishers.to_vec(),
    }
}

// ---------------------------------------------------------------------------
// Recovery fixture
// ---------------------------------------------------------------------------

#[test]
fn recovery_fixture_notification_sequence() {
    let run = run_fixture("recovery", 2, 10, MeasuredScan::Lockstep).expect("run");

    assert_eq!(
        run.notifications,
        vec![
            whitelisted(1, &[200]),
            blacklisted(1, &[20, 40]),
            saved(1, &[20, 40, 100]),
        ]
    );
    assert_eq!(run.saved.saved(), &[(1, vec![20, 40, 100])]);

    let sent: Vec<(&str, serde_json::Value)> = run
        .notifications
        .iter()
        .map(|n| (n.name(), n.context()))
        .collect();
    assert_eq!(
        sent,
        vec![
            (
                "sendMailWhitelisted",
                serde_json::json!({"campaign": 1, "publishers": [200]})
            ),
            (
                "sendMailBlacklisted",
                serde_json::json!({"campaign": 1, "publishers": [20, 40]})
            ),
            (
                "saveBlacklist",
                serde_json::json!({"campaign": 1, "publishers": [20, 40, 100]})
            ),
        ]
    );
}

#[test]
fn recovery_fixture_report() {
    let run = run_fixture("recovery", 2, 10, MeasuredScan::Lockstep).expect("run");

    // three purchases predate the cutoff
    assert_eq!(run.report.events_aggregated, 19);
    assert_eq!(run.report.campaigns.len(), 2);

    let first = run.report.campaign(1).expect("campaign 1");
    assert_eq!(first.blacklist_delta, vec![20, 40, 100]);
    assert_eq!(first.whitelist_delta, vec![200]);
    assert_eq!(first.newly_blacklisted, vec![20, 40]);
    assert!(first.persisted);

    let second = run.report.campaign(2).expect("campaign 2");
    assert!(second.blacklist_delta.is_empty());
    assert!(!second.changed);
}

#[test]
fn counters_match_filtered_events() {
    let run = run_fixture("recovery", 2, 10, MeasuredScan::Lockstep).expect("run");

    assert_eq!(run.store.get("ev:1", "install:20"), Some(3));
    assert_eq!(run.store.get("ev:1", "purchase:40"), Some(1));
    assert_eq!(run.store.get("ev:1", "purchase:200"), Some(4));
    assert_eq!(run.store.get("ev:1", "update:200"), Some(1));
    assert_eq!(run.store.get("ev:3", "install:20"), Some(1));
    assert_eq!(run.store.get("ev:1", "install:999"), None);
}

#[test]
fn batch_size_does_not_change_the_outcome() {
    let reference = run_fixture("recovery", 100, 10, MeasuredScan::Lockstep).expect("run");
    for batch_size in [1, 2, 3, 7, 19, 1000] {
        let run = run_fixture("recovery", batch_size, 10, MeasuredScan::Lockstep).expect("run");
        assert_eq!(run.store.snapshot(), reference.store.snapshot(), "batch {batch_size}");
        assert_eq!(
            run.notifications, reference.notifications,
            "batch {batch_size}"
        );
    }
}

#[test]
fn batch_size_changes_write_cadence_only() {
    let one = run_fixture("recovery", 1, 10, MeasuredScan::Lockstep).expect("run");
    let hundred = run_fixture("recovery", 100, 10, MeasuredScan::Lockstep).expect("run");

    assert_eq!(hundred.report.flushes, 1);
    assert!(one.report.flushes > hundred.report.flushes);
    assert_eq!(
        u64::try_from(one.store.batches_submitted()).expect("fits"),
        one.report.flushes
    );
}

#[test]
fn prefetch_is_page_size_invariant() {
    let reference = run_fixture("recovery", 2, 10, MeasuredScan::Prefetch).expect("run");
    assert_eq!(
        reference.notifications,
        vec![
            whitelisted(1, &[200]),
            blacklisted(1, &[20, 40]),
            saved(1, &[20, 40, 100]),
        ]
    );
    for page_size in 1..=9 {
        let run = run_fixture("recovery", 2, page_size, MeasuredScan::Prefetch).expect("run");
        assert_eq!(
            run.notifications, reference.notifications,
            "page size {page_size}"
        );
    }
}

#[test]
fn lockstep_with_single_field_pages_never_joins() {
    // each page holds one field, so no source page carries its measured counter
    let run = run_fixture("recovery", 2, 1, MeasuredScan::Lockstep).expect("run");
    assert_eq!(
        run.notifications,
        vec![
            blacklisted(1, &[20, 40]),
            saved(1, &[20, 40, 100, 200]),
        ]
    );
    assert_eq!(run.report.campaign(1).expect("campaign 1").pages, 9);
}

// ---------------------------------------------------------------------------
// Threshold fixture
// ---------------------------------------------------------------------------

#[test]
fn threshold_fixture_releases_recovered_publisher() {
    let run = run_fixture("threshold", 2, 10, MeasuredScan::Lockstep).expect("run");

    assert_eq!(
        run.notifications,
        vec![whitelisted(4, &[300]), saved(4, &[])]
    );
    assert_eq!(run.saved.latest(4), Some(&[] as &[i64]));
    assert_eq!(run.saved.latest(5), None, "campaign 5 is unchanged");
}

#[test]
fn ratio_exactly_at_threshold_is_kept() {
    let run = run_fixture("threshold", 2, 10, MeasuredScan::Lockstep).expect("run");
    let outcome = run.report.campaign(4).expect("campaign 4");
    assert!(!outcome.blacklist_delta.contains(&302));
    assert!(!outcome.whitelist_delta.contains(&302));
    assert!(!outcome.blacklist_delta.contains(&301));
}

#[test]
fn rerun_gives_identical_results() {
    let first = run_fixture("threshold", 3, 4, MeasuredScan::Lockstep).expect("run");
    let second = run_fixture("threshold", 3, 4, MeasuredScan::Lockstep).expect("run");
    assert_eq!(first.report, second.report);
    assert_eq!(first.notifications, second.notifications);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn missing_event_file_is_source_unavailable() {
    let config = JobConfig {
        campaigns_path: fixture("campaigns_recovery.csv"),
        events_path: fixture("events_missing.csv"),
        ..JobConfig::default()
    };
    let job = OptimizationJob::from_config(&config, Utc::now()).expect("config");
    let notifier = RecordingNotifier::new();
    let err = job
        .run(
            &mut MemoryCounterStore::default(),
            &notifier,
            &mut RecordingBlacklistSink::new(),
        )
        .expect_err("must fail");

    assert!(matches!(err, JobError::SourceUnavailable { .. }));
    assert!(err.to_string().contains("events_missing.csv"));
    assert!(notifier.notifications().is_empty());
}

#[test]
fn malformed_event_row_fails_and_clears() {
    let dir = tempfile::tempdir().expect("tempdir");
    let events = dir.path().join("events.csv");
    std::fs::write(
        &events,
        "type,campaign_id,publisher_id,timestamp\ninstall,1,20,1706800000\ninstall,1,x,1706800001\n",
    )
    .expect("write events");

    let config = JobConfig {
        campaigns_path: fixture("campaigns_recovery.csv"),
        events_path: events,
        start: "2024-02-01".into(),
        batch_size: 1,
        ..JobConfig::default()
    };
    let job = OptimizationJob::from_config(&config, Utc::now()).expect("config");
    let mut store = MemoryCounterStore::default();
    let err = job
        .run(
            &mut store,
            &RecordingNotifier::new(),
            &mut RecordingBlacklistSink::new(),
        )
        .expect_err("must fail");

    assert!(matches!(err, JobError::MalformedRecord { line: 3, .. }));
    assert!(store.is_empty(), "completion clear ran");
}
