//! Backup, restore, reconciliation, retention, and scheduling engines for
//! the QMS platform.
//!
//! Everything here operates on one live SQLite file plus a directory of
//! timestamped artifact copies. The engines are independent of the storage
//! backend — catalog and record access go through the `qms-core` traits.

use std::{path::PathBuf, time::Duration};

use qms_core::retry::RetryPolicy;

pub mod error;
pub mod jobs;
pub mod restore;
pub mod retention;
pub mod scheduler;
pub mod snapshot;
pub mod sync;

pub use error::{Error, Result, ValidationError};
pub use restore::RestoreEngine;
pub use scheduler::{Job, RunOutcome, RunRecord, Scheduler, SchedulerHandle, Trigger};
pub use snapshot::{Snapshot, SnapshotEngine, validate_artifact};
pub use sync::SyncEngine;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Paths and timing knobs shared by the engines.
#[derive(Debug, Clone)]
pub struct BackupConfig {
  /// The live database file.
  pub db_path:       PathBuf,
  /// Directory holding artifact copies and upload staging files.
  pub backup_dir:    PathBuf,
  /// Retry policy for file operations that can hit transient locks.
  pub retry:         RetryPolicy,
  /// Pause after quiescing connections, letting the OS release handles.
  pub quiesce_pause: Duration,
}

impl BackupConfig {
  pub fn new(db_path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
    Self {
      db_path:       db_path.into(),
      backup_dir:    backup_dir.into(),
      retry:         RetryPolicy::default(),
      quiesce_pause: Duration::from_secs(1),
    }
  }

  /// Variant with zero waits everywhere — used in tests.
  pub fn without_waits(db_path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
    Self {
      retry:         RetryPolicy::immediate(3),
      quiesce_pause: Duration::ZERO,
      ..Self::new(db_path, backup_dir)
    }
  }
}
