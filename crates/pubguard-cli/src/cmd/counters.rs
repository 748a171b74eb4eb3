//! `pubguard counters`: inspect one campaign bucket of a SQLite store.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;
use pubguard_core::model::CampaignId;
use pubguard_core::store::{SqliteCounterStore, bucket_key, scan_all};
use serde::Serialize;

use crate::cmd::clear::resolve_store_path;
use crate::output::{OutputMode, emit, kv, section};

#[derive(Args, Debug)]
pub struct CountersArgs {
    /// Campaign whose bucket is listed.
    #[arg(long)]
    pub campaign: CampaignId,

    /// Field glob, e.g. "install:*".
    #[arg(long, default_value = "*")]
    pub pattern: String,

    /// SQLite store file (default: store.path from pubguard.toml).
    #[arg(long)]
    pub store_path: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct Counter {
    field: String,
    count: u64,
}

#[derive(Debug, Serialize)]
struct CountersOutput {
    bucket: String,
    counters: Vec<Counter>,
}

/// Run `pubguard counters`.
///
/// The store is opened without the run lock; this is a read-only view.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or scanned.
pub fn run_counters(args: &CountersArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let (path, page_size) = resolve_store_path(args.store_path.as_deref(), project_root)?;
    let store = SqliteCounterStore::open(&path, page_size)?;

    let bucket = bucket_key(args.campaign);
    let counters = scan_all(&store, &bucket, &args.pattern)?
        .into_iter()
        .map(|(field, count)| Counter { field, count })
        .collect();
    let result = CountersOutput { bucket, counters };
    emit(output, &result, &render_text, &render_pretty)
}

fn render_text(result: &CountersOutput, w: &mut dyn Write) -> io::Result<()> {
    for counter in &result.counters {
        writeln!(w, "{} {} {}", result.bucket, counter.field, counter.count)?;
    }
    Ok(())
}

fn render_pretty(result: &CountersOutput, w: &mut dyn Write) -> io::Result<()> {
    section(w, &format!("Counters in {}", result.bucket))?;
    if result.counters.is_empty() {
        return writeln!(w, "(none)");
    }
    for counter in &result.counters {
        kv(w, &counter.field, counter.count.to_string())?;
    }
    Ok(())
}
