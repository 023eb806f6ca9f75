//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings, dates as `YYYY-MM-DD`. Both
//! forms compare lexicographically in the same order as their values, so SQL
//! range predicates work directly on the text columns. UUIDs are stored as
//! hyphenated lowercase strings.

use chrono::{DateTime, NaiveDate, Utc};
use qms_core::{
  artifact::{ArtifactKind, BackupArtifact},
  audit::{AuditAction, AuditEntry},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── NaiveDate ───────────────────────────────────────────────────────────────

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

// ─── ArtifactKind ────────────────────────────────────────────────────────────

pub fn encode_kind(k: ArtifactKind) -> &'static str {
  match k {
    ArtifactKind::Scheduled => "scheduled",
    ArtifactKind::Manual => "manual",
  }
}

pub fn decode_kind(s: &str) -> Result<ArtifactKind> {
  match s {
    "scheduled" => Ok(ArtifactKind::Scheduled),
    "manual" => Ok(ArtifactKind::Manual),
    other => Err(Error::Decode(format!("unknown artifact kind: {other:?}"))),
  }
}

// ─── AuditAction ─────────────────────────────────────────────────────────────

pub fn decode_action(s: &str) -> Result<AuditAction> {
  match s {
    "capture" => Ok(AuditAction::Capture),
    "restore" => Ok(AuditAction::Restore),
    "delete_artifact" => Ok(AuditAction::DeleteArtifact),
    "sync" => Ok(AuditAction::Sync),
    "archive" => Ok(AuditAction::Archive),
    other => Err(Error::Decode(format!("unknown audit action: {other:?}"))),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from an `artifacts` row.
pub struct RawArtifact {
  pub artifact_id:  String,
  pub captured_at:  String,
  pub size_bytes:   i64,
  pub kind:         String,
  pub storage_path: String,
  pub initiated_by: Option<String>,
  pub note:         String,
}

impl RawArtifact {
  pub fn into_artifact(self) -> Result<BackupArtifact> {
    Ok(BackupArtifact {
      artifact_id:  decode_uuid(&self.artifact_id)?,
      captured_at:  decode_dt(&self.captured_at)?,
      size_bytes:   self.size_bytes.max(0) as u64,
      kind:         decode_kind(&self.kind)?,
      storage_path: self.storage_path,
      initiated_by: self.initiated_by.as_deref().map(decode_uuid).transpose()?,
      note:         self.note,
    })
  }
}

/// Raw strings read directly from an `audit_log` row.
pub struct RawAuditEntry {
  pub entry_id:   String,
  pub actor:      Option<String>,
  pub action:     String,
  pub target:     Option<String>,
  pub detail:     String,
  pub origin:     String,
  pub created_at: String,
}

impl RawAuditEntry {
  pub fn into_entry(self) -> Result<AuditEntry> {
    Ok(AuditEntry {
      entry_id:   decode_uuid(&self.entry_id)?,
      actor:      self.actor.as_deref().map(decode_uuid).transpose()?,
      action:     decode_action(&self.action)?,
      target:     self.target,
      detail:     self.detail,
      origin:     self.origin,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}
