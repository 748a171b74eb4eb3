//! Campaign and event sources backed by CSV files.
//!
//! Both files start with a header row that is skipped. Rows are read lazily
//! and handed out one at a time; a row that does not parse ends the
//! iteration with [`JobError::MalformedRecord`] carrying its 1-based line
//! number.
//!
//! ```text
//! campaigns: id,sourceEvent,measuredEvent,threshold,ratio,"blacklist,ids"
//! events:    type,campaignId,publisherId,timestamp
//! ```
//!
//! Quoted fields may contain commas and `""` escapes but not line breaks.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};

use crate::error::JobError;
use crate::model::{Campaign, Event, OptimizationProps, PublisherId, RatioThreshold};

// ---------------------------------------------------------------------------
// Row parsing
// ---------------------------------------------------------------------------

/// Split one CSV line into its fields.
///
/// # Errors
///
/// Returns a reason string for an unterminated quote or stray characters
/// after a closing quote.
pub fn split_row(line: &str) -> Result<Vec<String>, String> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut quoted = false;
    let mut closed = false;

    while let Some(c) = chars.next() {
        if quoted {
            if c != '"' {
                field.push(c);
            } else if chars.peek() == Some(&'"') {
                chars.next();
                field.push('"');
            } else {
                quoted = false;
                closed = true;
            }
            continue;
        }
        match c {
            ',' => {
                fields.push(std::mem::take(&mut field));
                closed = false;
            }
            '"' if field.is_empty() && !closed => quoted = true,
            _ if closed => return Err(format!("unexpected {c:?} after closing quote")),
            _ => field.push(c),
        }
    }
    if quoted {
        return Err("unterminated quoted field".to_string());
    }
    fields.push(field);
    Ok(fields)
}

fn int_field<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, String> {
    raw.trim()
        .parse()
        .map_err(|_| format!("{name} is not an integer: {raw:?}"))
}

/// Parse the fields of one campaign row.
///
/// A missing trailing blacklist column reads as an empty blacklist.
///
/// # Errors
///
/// Returns a reason string for a wrong column count or a bad value.
pub fn parse_campaign_row(fields: &[String]) -> Result<Campaign, String> {
    let (id, source, measured, threshold, ratio, blacklist) = match fields {
        [id, source, measured, threshold, ratio] => (id, source, measured, threshold, ratio, ""),
        [id, source, measured, threshold, ratio, blacklist] => {
            (id, source, measured, threshold, ratio, blacklist.as_str())
        }
        _ => return Err(format!("expected 6 columns, found {}", fields.len())),
    };

    let ratio = ratio
        .parse::<RatioThreshold>()
        .map_err(|err| format!("ratio threshold: {err}"))?;
    let props = OptimizationProps::new(
        source.trim(),
        measured.trim(),
        int_field("threshold", threshold)?,
        ratio,
    );
    let blacklist = parse_id_list(blacklist)?;
    Ok(Campaign::new(int_field("id", id)?, props, blacklist))
}

fn parse_id_list(raw: &str) -> Result<Vec<PublisherId>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| int_field("blacklist id", part))
        .collect()
}

/// Parse the fields of one event row.
///
/// # Errors
///
/// Returns a reason string for a wrong column count or a bad value.
pub fn parse_event_row(fields: &[String]) -> Result<Event, String> {
    let [event_type, campaign, publisher, timestamp] = fields else {
        return Err(format!("expected 4 columns, found {}", fields.len()));
    };
    let event_type = event_type.trim();
    if event_type.is_empty() {
        return Err("empty event type".to_string());
    }
    Ok(Event::new(
        event_type,
        int_field("campaign id", campaign)?,
        int_field("publisher id", publisher)?,
        int_field("timestamp", timestamp)?,
    ))
}

// ---------------------------------------------------------------------------
// Line reader
// ---------------------------------------------------------------------------

/// Non-blank data lines of a CSV file, header skipped.
struct Rows<R> {
    path: PathBuf,
    reader: R,
    line: usize,
    buf: String,
    failed: bool,
}

impl<R: BufRead> Rows<R> {
    const fn new(path: PathBuf, reader: R) -> Self {
        Self {
            path,
            reader,
            line: 0,
            buf: String::new(),
            failed: false,
        }
    }

    fn next_fields(&mut self) -> Option<Result<(usize, Vec<String>), JobError>> {
        if self.failed {
            return None;
        }
        loop {
            self.buf.clear();
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(source) if source.kind() == io::ErrorKind::InvalidData => {
                    self.line += 1;
                    let line = self.line;
                    return Some(Err(self.malformed(line, source.to_string())));
                }
                Err(source) => {
                    self.failed = true;
                    return Some(Err(JobError::SourceRead {
                        path: self.path.clone(),
                        line: self.line,
                        source,
                    }));
                }
            }
            self.line += 1;
            if self.line == 1 || self.buf.trim().is_empty() {
                continue;
            }
            let line = self.line;
            return Some(match split_row(self.buf.trim_end_matches('\n')) {
                Ok(fields) => Ok((line, fields)),
                Err(reason) => Err(self.malformed(line, reason)),
            });
        }
    }

    fn malformed(&mut self, line: usize, reason: String) -> JobError {
        self.failed = true;
        JobError::MalformedRecord {
            path: self.path.clone(),
            line,
            reason,
        }
    }
}

fn open(path: &Path) -> Result<BufReader<File>, JobError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| JobError::SourceUnavailable {
            path: path.to_path_buf(),
            source,
        })
}

// ---------------------------------------------------------------------------
// Campaign registry
// ---------------------------------------------------------------------------

/// Lazy, single-pass sequence of campaigns.
pub struct CampaignSource<R = BufReader<File>> {
    rows: Rows<R>,
}

impl CampaignSource {
    /// Open a campaign file.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::SourceUnavailable`] if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self, JobError> {
        Ok(Self::from_reader(path, open(path)?))
    }
}

impl<R: BufRead> CampaignSource<R> {
    /// Read campaigns from any buffered reader; `path` labels errors.
    pub fn from_reader(path: impl Into<PathBuf>, reader: R) -> Self {
        Self {
            rows: Rows::new(path.into(), reader),
        }
    }
}

impl<R: BufRead> Iterator for CampaignSource<R> {
    type Item = Result<Campaign, JobError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (line, fields) = match self.rows.next_fields()? {
            Ok(row) => row,
            Err(err) => return Some(Err(err)),
        };
        Some(parse_campaign_row(&fields).map_err(|reason| self.rows.malformed(line, reason)))
    }
}

// ---------------------------------------------------------------------------
// Event source
// ---------------------------------------------------------------------------

/// Lazy, single-pass sequence of events at or after a start timestamp.
pub struct EventSource<R = BufReader<File>> {
    rows: Rows<R>,
    start: i64,
    skipped: u64,
}

impl EventSource {
    /// Open an event file, yielding only events with `timestamp >= start`.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::SourceUnavailable`] if the file cannot be opened.
    pub fn open(path: &Path, start: i64) -> Result<Self, JobError> {
        Ok(Self::from_reader(path, open(path)?, start))
    }
}

impl<R: BufRead> EventSource<R> {
    /// Read events from any buffered reader; `path` labels errors.
    pub fn from_reader(path: impl Into<PathBuf>, reader: R, start: i64) -> Self {
        Self {
            rows: Rows::new(path.into(), reader),
            start,
            skipped: 0,
        }
    }

    /// Well-formed events dropped so far for predating the start.
    #[must_use]
    pub const fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl<R: BufRead> Iterator for EventSource<R> {
    type Item = Result<Event, JobError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (line, fields) = match self.rows.next_fields()? {
                Ok(row) => row,
                Err(err) => return Some(Err(err)),
            };
            match parse_event_row(&fields) {
                Ok(event) if event.timestamp >= self.start => return Some(Ok(event)),
                Ok(_) => self.skipped += 1,
                Err(reason) => return Some(Err(self.rows.malformed(line, reason))),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Start cutoff
// ---------------------------------------------------------------------------

/// Start expression that could not be resolved to a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartParseError {
    #[error("unrecognized start expression {0:?}")]
    Unrecognized(String),
    #[error("start expression {0:?} is out of range")]
    OutOfRange(String),
}

/// Resolve a start expression to unix seconds relative to `now`.
///
/// Accepted forms: RFC 3339, `YYYY-MM-DD HH:MM:SS` and `YYYY-MM-DD` (UTC),
/// integer unix seconds, `now`, `today`, and
/// `N second|minute|hour|day|week[s] ago`.
///
/// # Errors
///
/// Returns [`StartParseError`] for anything else.
pub fn parse_start(expr: &str, now: DateTime<Utc>) -> Result<i64, StartParseError> {
    let trimmed = expr.trim();
    let lower = trimmed.to_ascii_lowercase();
    let out_of_range = || StartParseError::OutOfRange(trimmed.to_string());

    match lower.as_str() {
        "now" => return Ok(now.timestamp()),
        "today" => {
            return now
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|midnight| midnight.and_utc().timestamp())
                .ok_or_else(out_of_range);
        }
        _ => {}
    }

    if let Ok(secs) = trimmed.parse::<i64>() {
        return Ok(secs);
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(at.timestamp());
    }
    if let Ok(at) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Ok(at.and_utc().timestamp());
    }
    if let Ok(day) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return day
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc().timestamp())
            .ok_or_else(out_of_range);
    }

    let ago = relative_ago(&lower).ok_or_else(|| StartParseError::Unrecognized(trimmed.into()))?;
    let delta = ago.ok_or_else(out_of_range)?;
    now.checked_sub_signed(delta)
        .map(|at| at.timestamp())
        .ok_or_else(out_of_range)
}

/// `Some(None)` when the form matches but the amount overflows.
fn relative_ago(lower: &str) -> Option<Option<TimeDelta>> {
    let mut words = lower.split_whitespace();
    let amount: i64 = words.next()?.parse().ok()?;
    let unit = words.next()?;
    if words.next()? != "ago" || words.next().is_some() || amount < 0 {
        return None;
    }
    let unit_secs: i64 = match unit.strip_suffix('s').unwrap_or(unit) {
        "second" | "sec" => 1,
        "minute" | "min" => 60,
        "hour" => 3_600,
        "day" => 86_400,
        "week" => 604_800,
        _ => return None,
    };
    Some(
        amount
            .checked_mul(unit_secs)
            .and_then(TimeDelta::try_seconds),
    )
}
