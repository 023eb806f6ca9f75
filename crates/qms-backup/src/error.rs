//! Error types for `qms-backup`.

use std::path::PathBuf;

use thiserror::Error;

/// Why an uploaded artifact was rejected. Checks run in declaration order;
/// the first failure wins and no state is mutated.
#[derive(Debug, Error)]
pub enum ValidationError {
  #[error("file does not exist: {0}")]
  Missing(PathBuf),

  #[error("only .sqlite3 files are accepted")]
  WrongExtension,

  #[error("file exceeds the 1 GiB size limit ({0} bytes)")]
  TooLarge(u64),

  #[error("not a valid SQLite database file")]
  BadMagic,
}

#[derive(Debug, Error)]
pub enum Error {
  /// A referenced file (live database or artifact) is absent. Never retried.
  #[error("file not found: {0}")]
  NotFound(PathBuf),

  #[error(transparent)]
  Validation(#[from] ValidationError),

  /// An I/O failure that survived the retry loop (or was not retriable).
  #[error("storage error while {op}: {source}")]
  Storage {
    op:     String,
    #[source]
    source: std::io::Error,
  },

  #[error("database error: {0}")]
  Database(#[from] rusqlite::Error),
}

impl Error {
  pub(crate) fn storage(op: impl Into<String>, source: std::io::Error) -> Self {
    Self::Storage { op: op.into(), source }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
