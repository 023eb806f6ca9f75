//! Backup artifact — the catalog entry for one point-in-time database copy.
//!
//! An artifact row records metadata only; the copy itself lives on disk at
//! `storage_path`. The reconciliation engine repairs drift between the two.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How an artifact came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
  /// Created by the scheduler (or discovered on disk by reconciliation).
  Scheduled,
  /// Created by an operator through the API.
  Manual,
}

/// A catalog entry for a single backup file.
///
/// Rows are immutable after creation; the only lifecycle event is deletion
/// (retention pruning, operator delete, or orphan cleanup).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupArtifact {
  pub artifact_id:  Uuid,
  pub captured_at:  DateTime<Utc>,
  pub size_bytes:   u64,
  pub kind:         ArtifactKind,
  /// Path of the file on disk — the join key to the filesystem.
  pub storage_path: String,
  /// The acting user; `None` for scheduler-initiated captures.
  pub initiated_by: Option<Uuid>,
  pub note:         String,
}

/// Input for registering a new artifact in the catalog.
#[derive(Debug, Clone)]
pub struct NewArtifact {
  pub size_bytes:   u64,
  pub kind:         ArtifactKind,
  pub storage_path: String,
  pub initiated_by: Option<Uuid>,
  pub note:         String,
}
