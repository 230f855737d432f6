//! Error types for chapter store operations.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Structured classification for SQLite failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// `SQLite` returned busy/locked under concurrent access.
    BusyOrLocked,
    /// Constraint failure (unique/not-null/check).
    ConstraintViolation,
    /// The file is not a database or is malformed.
    Corrupt,
    /// Connection pool timed out waiting for a free connection.
    PoolTimeout,
    /// Connection pool is closed.
    PoolClosed,
    /// Filesystem or transport IO failure.
    Io,
    /// SQL protocol/driver error.
    Protocol,
    /// Unclassified database failure.
    Other,
}

impl StorageErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed => Self::PoolClosed,
            sqlx::Error::Io(_) => Self::Io,
            sqlx::Error::Protocol(_) => Self::Protocol,
            sqlx::Error::Database(database_error) => {
                classify_database_error(database_error.as_ref())
            }
            _ => Self::Other,
        }
    }
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BusyOrLocked => "busy_or_locked",
            Self::ConstraintViolation => "constraint_violation",
            Self::Corrupt => "corrupt",
            Self::PoolTimeout => "pool_timeout",
            Self::PoolClosed => "pool_closed",
            Self::Io => "io",
            Self::Protocol => "protocol",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

fn classify_database_error(
    database_error: &(dyn sqlx::error::DatabaseError + 'static),
) -> StorageErrorKind {
    let code = database_error.code();
    // Primary result codes: 5 BUSY, 6 LOCKED, 11 CORRUPT, 26 NOTADB.
    match code.as_deref() {
        Some("SQLITE_BUSY" | "SQLITE_LOCKED" | "5" | "6") => {
            return StorageErrorKind::BusyOrLocked;
        }
        Some("SQLITE_CORRUPT" | "SQLITE_NOTADB" | "11" | "26") => {
            return StorageErrorKind::Corrupt;
        }
        _ => {}
    }

    if database_error.is_unique_violation()
        || database_error.is_check_violation()
        || code
            .as_deref()
            .is_some_and(|value| value.starts_with("SQLITE_CONSTRAINT"))
    {
        return StorageErrorKind::ConstraintViolation;
    }

    let message = database_error.message().to_ascii_lowercase();
    if message.contains("database is locked") || message.contains("database is busy") {
        return StorageErrorKind::BusyOrLocked;
    }
    if message.contains("not a database") || message.contains("malformed") {
        return StorageErrorKind::Corrupt;
    }

    StorageErrorKind::Other
}

/// Errors that can occur during chapter store operations.
///
/// Write failures are always surfaced to the caller; the store never retries
/// a failed batch.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("database error ({kind}) in {path}: {message}")]
    Database {
        /// Typed classification of the failure.
        kind: StorageErrorKind,
        /// Store file the error came from.
        path: PathBuf,
        /// Human-readable database error text.
        message: String,
    },

    /// A stored row could not be decoded.
    #[error("corrupt chapter row '{id}' in {path}: {message}")]
    CorruptRow {
        /// Chapter id of the row.
        id: String,
        /// Store file the row came from.
        path: PathBuf,
        /// Decoder error text.
        message: String,
    },

    /// Filesystem error around the store file.
    #[error("IO error at {path}: {message}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying IO error text.
        message: String,
    },

    /// A record could not be serialized for storage.
    #[error("failed to encode chapter '{id}': {message}")]
    Encode {
        /// Chapter id being written.
        id: String,
        /// Serializer error text.
        message: String,
    },
}

impl StorageError {
    /// Wraps a sqlx error with the store path it occurred on.
    pub fn database(path: impl Into<PathBuf>, error: &sqlx::Error) -> Self {
        Self::Database {
            kind: StorageErrorKind::from_sqlx(error),
            path: path.into(),
            message: error.to_string(),
        }
    }

    /// Wraps an IO error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: error.to_string(),
        }
    }

    /// Returns the database classification, if this is a database error.
    #[must_use]
    pub fn kind(&self) -> Option<StorageErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
