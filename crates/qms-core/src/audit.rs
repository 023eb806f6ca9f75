//! Audit ledger types.
//!
//! Every mutating backup operation emits exactly one entry to an append-only
//! audit log. Entries are write-only from this subsystem's point of view;
//! only the retention engine ever deletes them (1-year cutoff).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of operation an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
  Capture,
  Restore,
  DeleteArtifact,
  Sync,
  Archive,
}

impl AuditAction {
  /// Stable string form used in the database and in log lines.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Capture        => "capture",
      Self::Restore        => "restore",
      Self::DeleteArtifact => "delete_artifact",
      Self::Sync           => "sync",
      Self::Archive        => "archive",
    }
  }
}

/// One append-only audit ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
  pub entry_id:   Uuid,
  /// The acting user; `None` for system-initiated operations.
  pub actor:      Option<Uuid>,
  pub action:     AuditAction,
  /// Identifier of the thing acted on (artifact id, file name, ...).
  pub target:     Option<String>,
  pub detail:     String,
  /// Client address, or `"system"` for scheduler-initiated work.
  pub origin:     String,
  pub created_at: DateTime<Utc>,
}

/// Input for appending a new audit entry.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
  pub actor:  Option<Uuid>,
  pub action: AuditAction,
  pub target: Option<String>,
  pub detail: String,
  pub origin: String,
}

impl NewAuditEntry {
  /// An entry attributed to the system rather than a user.
  pub fn system(action: AuditAction, target: Option<String>, detail: impl Into<String>) -> Self {
    Self {
      actor: None,
      action,
      target,
      detail: detail.into(),
      origin: "system".to_string(),
    }
  }
}
