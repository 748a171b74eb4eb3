//! `pubguard run`: one full optimization run.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use clap::{Args, ValueEnum};
use pubguard_core::config::{JobConfig, StoreBackend, load_config};
use pubguard_core::reconcile::{
    LogNotifier, Notification, Notifier, RecordingBlacklistSink, RecordingNotifier,
};
use pubguard_core::store::{CounterStore, MemoryCounterStore, SqliteCounterStore};
use pubguard_core::{JobError, JobReport, OptimizationJob};
use serde::Serialize;
use tracing::info;

use crate::output::{OutputMode, emit, id_list, kv, rule, section};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreArg {
    Memory,
    Sqlite,
}

impl From<StoreArg> for StoreBackend {
    fn from(arg: StoreArg) -> Self {
        match arg {
            StoreArg::Memory => Self::Memory,
            StoreArg::Sqlite => Self::Sqlite,
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Config file (default: ./pubguard.toml if present).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Campaign CSV file.
    #[arg(long)]
    pub campaigns: Option<PathBuf>,

    /// Event CSV file.
    #[arg(long)]
    pub events: Option<PathBuf>,

    /// Ignore events before this point, e.g. "2 weeks ago" or "2024-02-01 00:00:00".
    #[arg(long)]
    pub start: Option<String>,

    /// Distinct counters per pipelined store write.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Leave the counters in the store after the run.
    #[arg(long)]
    pub keep_counters: bool,

    /// Counter store backend.
    #[arg(long, value_enum)]
    pub store: Option<StoreArg>,

    /// SQLite store file.
    #[arg(long)]
    pub store_path: Option<PathBuf>,
}

impl RunArgs {
    fn apply(&self, config: &mut JobConfig) {
        if let Some(path) = &self.campaigns {
            config.campaigns_path.clone_from(path);
        }
        if let Some(path) = &self.events {
            config.events_path.clone_from(path);
        }
        if let Some(start) = &self.start {
            config.start.clone_from(start);
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if self.keep_counters {
            config.clear_on_completion = false;
        }
        if let Some(store) = self.store {
            config.store.backend = store.into();
        }
        if let Some(path) = &self.store_path {
            config.store.path.clone_from(path);
        }
    }
}

/// Forwards every notification to the log and keeps it for the report.
#[derive(Default)]
struct RunNotifier {
    log: LogNotifier,
    recorded: RecordingNotifier,
}

impl Notifier for RunNotifier {
    fn notify(&self, notification: &Notification) {
        self.log.notify(notification);
        self.recorded.notify(notification);
    }
}

#[derive(Debug, Serialize)]
struct RunOutput {
    #[serde(flatten)]
    report: JobReport,
    notifications: Vec<Notification>,
}

/// Resolve configuration for `args` relative to `project_root`.
///
/// # Errors
///
/// Returns [`JobError::Config`] if the file cannot be loaded or the merged
/// settings do not validate.
pub fn resolve_config(args: &RunArgs, project_root: &Path) -> Result<JobConfig, JobError> {
    let mut config = load_config(args.config.as_deref(), project_root)
        .map_err(|err| JobError::Config(format!("{err:#}")))?;
    args.apply(&mut config);
    config.validate(Utc::now())?;
    Ok(config)
}

/// Run `pubguard run`.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the job fails.
pub fn run_run(args: &RunArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let config = resolve_config(args, project_root)?;
    let job = OptimizationJob::from_config(&config, Utc::now())?;
    let page_size = config.page_size()?;
    info!(
        backend = ?config.store.backend,
        campaigns = %config.campaigns_path.display(),
        events = %config.events_path.display(),
        start = job.start(),
        "starting optimization run"
    );

    let notifier = RunNotifier::default();
    let mut blacklists = RecordingBlacklistSink::new();
    let mut store: Box<dyn CounterStore> = match config.store.backend {
        StoreBackend::Memory => Box::new(MemoryCounterStore::new(page_size)),
        StoreBackend::Sqlite => Box::new(SqliteCounterStore::open_locked(
            &config.store.path,
            page_size,
            config.store.lock_timeout(),
        )?),
    };

    let report = job.run(store.as_mut(), &notifier, &mut blacklists)?;
    let result = RunOutput {
        report,
        notifications: notifier.recorded.notifications(),
    };
    emit(output, &result, &render_text, &render_pretty)
}

fn render_text(result: &RunOutput, w: &mut dyn Write) -> io::Result<()> {
    let report = &result.report;
    writeln!(
        w,
        "events={} flushes={} increments={} campaigns={}",
        report.events_aggregated,
        report.flushes,
        report.increments,
        report.campaigns.len()
    )?;
    for outcome in &report.campaigns {
        writeln!(
            w,
            "campaign={} blacklist={} whitelist={} new={} saved={}",
            outcome.campaign_id,
            id_list(&outcome.blacklist_delta),
            id_list(&outcome.whitelist_delta),
            id_list(&outcome.newly_blacklisted),
            outcome.changed && outcome.persisted,
        )?;
    }
    for notification in &result.notifications {
        writeln!(
            w,
            "notify={} campaign={} publishers={}",
            notification.name(),
            notification.campaign_id(),
            id_list(notification.publishers())
        )?;
    }
    Ok(())
}

fn render_pretty(result: &RunOutput, w: &mut dyn Write) -> io::Result<()> {
    let report = &result.report;
    section(w, "Optimization run")?;
    kv(w, "Events", report.events_aggregated.to_string())?;
    kv(
        w,
        "Store writes",
        format!("{} batches, {} increments", report.flushes, report.increments),
    )?;
    kv(w, "Campaigns", report.campaigns.len().to_string())?;

    for outcome in &report.campaigns {
        writeln!(w)?;
        section(w, &format!("Campaign {}", outcome.campaign_id))?;
        kv(w, "Blacklist", id_list(&outcome.blacklist_delta))?;
        kv(w, "Whitelisted", id_list(&outcome.whitelist_delta))?;
        kv(w, "Newly blacklisted", id_list(&outcome.newly_blacklisted))?;
        let saved = match (outcome.changed, outcome.persisted) {
            (false, _) => "unchanged",
            (true, true) => "saved",
            (true, false) => "save failed",
        };
        kv(w, "Blacklist state", saved)?;
    }

    if !result.notifications.is_empty() {
        writeln!(w)?;
        section(w, "Notifications")?;
        for notification in &result.notifications {
            writeln!(
                w,
                "{:<16} campaign {:<6} [{}]",
                notification.name(),
                notification.campaign_id(),
                id_list(notification.publishers())
            )?;
        }
    }
    rule(w)
}
