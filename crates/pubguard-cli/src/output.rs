//! How commands print: pretty sections for terminals, `key=value` lines for
//! pipes, JSON for tooling.
//!
//! The mode is picked once per invocation. `--format` (or the hidden
//! `--json`) beats the `FORMAT` environment variable, which beats the
//! terminal check: pretty on a TTY, text otherwise. Errors follow the same
//! mode but always go to stderr.

use std::io::{self, IsTerminal, Write};

use clap::ValueEnum;
use pubguard_core::{ErrorCode, JobError, StoreError};
use serde::Serialize;

const RULE_WIDTH: usize = 72;
const KEY_WIDTH: usize = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Headed sections for people at a terminal.
    Pretty,
    /// One fact per line, for scripts.
    Text,
    /// Pretty-printed JSON on stdout.
    Json,
}

impl OutputMode {
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }

    /// Parse a `FORMAT` value; anything unknown is ignored.
    fn from_env(value: &str) -> Option<Self> {
        Self::from_str(value.trim(), true).ok()
    }

    fn resolve(flag: Option<Self>, json: bool, env: Option<&str>, tty: bool) -> Self {
        flag.or_else(|| json.then_some(Self::Json))
            .or_else(|| env.and_then(Self::from_env))
            .unwrap_or(if tty { Self::Pretty } else { Self::Text })
    }
}

/// Pick the mode for this process from flags, `FORMAT` and stdout.
pub fn resolve_output_mode(flag: Option<OutputMode>, json: bool) -> OutputMode {
    let env = std::env::var("FORMAT").ok();
    OutputMode::resolve(flag, json, env.as_deref(), io::stdout().is_terminal())
}

type Render<'a, T> = &'a dyn Fn(&T, &mut dyn Write) -> io::Result<()>;

/// Print `value` to stdout: serialized in JSON mode, otherwise through the
/// matching renderer.
pub fn emit<T: Serialize>(
    mode: OutputMode,
    value: &T,
    text: Render<'_, T>,
    pretty: Render<'_, T>,
) -> anyhow::Result<()> {
    emit_to(&mut io::stdout().lock(), mode, value, text, pretty)
}

fn emit_to<T: Serialize>(
    out: &mut dyn Write,
    mode: OutputMode,
    value: &T,
    text: Render<'_, T>,
    pretty: Render<'_, T>,
) -> anyhow::Result<()> {
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut *out, value)?;
            writeln!(out)?;
        }
        OutputMode::Text => text(value, out)?,
        OutputMode::Pretty => pretty(value, out)?,
    }
    out.flush()?;
    Ok(())
}

pub fn rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{}", "-".repeat(RULE_WIDTH))
}

/// Title line underlined by a rule.
pub fn section(w: &mut dyn Write, title: &str) -> io::Result<()> {
    writeln!(w, "{title}")?;
    rule(w)
}

pub fn kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    let key = format!("{key}:");
    writeln!(w, "{key:<KEY_WIDTH$} {}", value.as_ref())
}

/// Comma-joined ids; `-` for none so text lines keep a fixed shape.
pub fn id_list(ids: &[i64]) -> String {
    if ids.is_empty() {
        return "-".to_string();
    }
    ids.iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// What a failed command prints on stderr.
#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub error_code: &'static str,
    /// Fixed one-line description of the code.
    pub summary: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'static str>,
}

impl From<&anyhow::Error> for ErrorReport {
    fn from(err: &anyhow::Error) -> Self {
        let code = err
            .downcast_ref::<JobError>()
            .map(JobError::code)
            .or_else(|| err.downcast_ref::<StoreError>().map(StoreError::code))
            .unwrap_or(ErrorCode::InternalUnexpected);
        Self {
            error_code: code.code(),
            summary: code.message(),
            message: format!("{err:#}"),
            hint: code.hint(),
        }
    }
}

/// Print `report` to stderr in `mode`.
pub fn emit_error(mode: OutputMode, report: &ErrorReport) -> anyhow::Result<()> {
    emit_error_to(&mut io::stderr().lock(), mode, report)
}

fn emit_error_to(
    out: &mut dyn Write,
    mode: OutputMode,
    report: &ErrorReport,
) -> anyhow::Result<()> {
    if mode.is_json() {
        serde_json::to_writer_pretty(&mut *out, &serde_json::json!({ "error": report }))?;
        writeln!(out)?;
        return Ok(());
    }
    writeln!(out, "{}: {}", report.error_code, report.message)?;
    if let Some(hint) = report.hint {
        writeln!(out, "  hint: {hint}")?;
    }
    Ok(())
}
