//! `pubguard clear`: wipe a SQLite counter store.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;
use pubguard_core::JobError;
use pubguard_core::config::load_config;
use pubguard_core::store::{CounterStore, SqliteCounterStore};
use serde::Serialize;

use crate::output::{OutputMode, emit};

#[derive(Args, Debug)]
pub struct ClearArgs {
    /// SQLite store file (default: store.path from pubguard.toml).
    #[arg(long)]
    pub store_path: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ClearOutput {
    cleared: PathBuf,
}

/// Store file and scan page size from the flag or `pubguard.toml`.
///
/// # Errors
///
/// Returns [`JobError::Config`] if `pubguard.toml` is unreadable or the page
/// size is zero.
pub fn resolve_store_path(
    flag: Option<&Path>,
    project_root: &Path,
) -> Result<(PathBuf, NonZeroUsize), JobError> {
    let config = load_config(None, project_root)
        .map_err(|err| JobError::Config(format!("{err:#}")))?;
    let page_size = config.page_size()?;
    let path = flag.map_or(config.store.path, Path::to_path_buf);
    Ok((path, page_size))
}

/// Run `pubguard clear`.
///
/// Takes the run lock so a store in use by `pubguard run` is never wiped.
///
/// # Errors
///
/// Returns an error if the store is locked, cannot be opened or cleared.
pub fn run_clear(args: &ClearArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let (path, page_size) = resolve_store_path(args.store_path.as_deref(), project_root)?;
    let mut store =
        SqliteCounterStore::open_locked(&path, page_size, std::time::Duration::from_millis(500))?;
    store.clear()?;
    tracing::info!(path = %path.display(), "counter store cleared");

    emit(
        output,
        &ClearOutput { cleared: path },
        &|v, w| writeln!(w, "cleared={}", v.cleared.display()),
        &|v, w| writeln!(w, "Cleared counter store {}", v.cleared.display()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_overrides_configured_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (path, page_size) =
            resolve_store_path(Some(Path::new("other.sqlite3")), dir.path()).expect("resolve");
        assert_eq!(path, PathBuf::from("other.sqlite3"));
        assert_eq!(page_size.get(), 10);
    }

    #[test]
    fn configured_path_is_used_without_flag() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("pubguard.toml"),
            "[store]\npath = \"state/c.sqlite3\"\nscan_page_size = 3\n",
        )
        .expect("write config");
        let (path, page_size) = resolve_store_path(None, dir.path()).expect("resolve");
        assert_eq!(path, PathBuf::from("state/c.sqlite3"));
        assert_eq!(page_size.get(), 3);
    }
}
