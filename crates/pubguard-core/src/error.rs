use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::lock::LockError;

/// Machine-readable error codes surfaced by the CLI and in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    SourceUnavailable,
    ConfigParseError,
    MalformedRecord,
    StoreOperationFailed,
    LockContention,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::SourceUnavailable => "E1001",
            Self::ConfigParseError => "E1002",
            Self::MalformedRecord => "E2001",
            Self::StoreOperationFailed => "E3001",
            Self::LockContention => "E3002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::SourceUnavailable => "Input source unavailable",
            Self::ConfigParseError => "Invalid configuration",
            Self::MalformedRecord => "Malformed input record",
            Self::StoreOperationFailed => "Counter store operation failed",
            Self::LockContention => "Counter store is locked by another run",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::SourceUnavailable => {
                Some("Check --campaigns/--events paths or campaigns_path/events_path in pubguard.toml.")
            }
            Self::ConfigParseError => Some("Fix pubguard.toml or the offending flag and retry."),
            Self::MalformedRecord => Some("Fix the reported CSV row and rerun; the run stops at the first bad row."),
            Self::StoreOperationFailed => {
                Some("The run is safe to repeat from scratch once the store is reachable.")
            }
            Self::LockContention => Some("Retry after the other `pubguard run` releases its lock."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Failures raised by a [`crate::store::CounterStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// SQLite backend failure.
    #[error("sqlite counter store: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The store's backing directory could not be prepared.
    #[error("counter store I/O: {0}")]
    Io(#[from] io::Error),

    /// The run lock guarding a file-backed store could not be taken.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// An increment would push a counter past `u64::MAX`.
    #[error("counter overflow at {bucket} / {field}")]
    Overflow { bucket: String, field: String },

    /// The cursor does not belong to any scan this store handed out.
    #[error("invalid scan cursor {0}")]
    InvalidCursor(u64),
}

impl StoreError {
    /// Machine-readable code associated with this store error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Lock(err) => err.code(),
            Self::Sqlite(_) | Self::Io(_) | Self::Overflow { .. } | Self::InvalidCursor(_) => {
                ErrorCode::StoreOperationFailed
            }
        }
    }
}

/// Errors that abort an optimization run.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// An event or campaign source could not be opened.
    #[error("File not found: {}: {source}", path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An opened source failed mid-stream.
    #[error("failed reading {} after line {line}: {source}", path.display())]
    SourceRead {
        path: PathBuf,
        line: usize,
        #[source]
        source: io::Error,
    },

    /// A tabular row could not be turned into an event or campaign.
    #[error("malformed record at {}:{line}: {reason}", path.display())]
    MalformedRecord {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// Job configuration rejected before the run started.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Counter store increment, scan or clear failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl JobError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::SourceUnavailable { .. } | Self::SourceRead { .. } => {
                ErrorCode::SourceUnavailable
            }
            Self::MalformedRecord { .. } => ErrorCode::MalformedRecord,
            Self::Config(_) => ErrorCode::ConfigParseError,
            Self::Store(err) => err.code(),
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}
