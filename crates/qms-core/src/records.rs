//! The `RecordStore` trait — the archival engine's view of the business
//! record collections, plus the audit ledger.
//!
//! Full CRUD on these collections lives elsewhere in the platform; this
//! subsystem only needs to count, purge by age, and append audit entries.

use std::future::Future;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditEntry, NewAuditEntry};

// ─── Reports ─────────────────────────────────────────────────────────────────

/// Outcome of one archival run: rows deleted per collection.
///
/// Archival is best-effort per collection — each deletion runs in its own
/// transaction, and a failure in one collection is recorded in `errors`
/// without undoing the others.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveReport {
  pub performance_deleted:     u64,
  pub nonconformances_deleted: u64,
  pub complaints_deleted:      u64,
  pub audit_entries_deleted:   u64,
  pub errors:                  Vec<String>,
}

impl ArchiveReport {
  pub fn total_deleted(&self) -> u64 {
    self.performance_deleted
      + self.nonconformances_deleted
      + self.complaints_deleted
      + self.audit_entries_deleted
  }
}

/// Rows currently eligible for deletion under the retention thresholds,
/// per collection. Read-only; nothing is deleted to produce this.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchivableCounts {
  pub performance_records: u64,
  pub nonconformances:     u64,
  pub customer_complaints: u64,
  pub audit_entries:       u64,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Storage operations the retention/archival engine needs.
///
/// Each `delete_*` method is atomic on its own: it either deletes all
/// matching rows and returns the count, or fails having deleted none.
pub trait RecordStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Performance records (cutoff on creation time) ─────────────────────

  fn count_performance_before(
    &self,
    cutoff: DateTime<Utc>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  fn delete_performance_before(
    &self,
    cutoff: DateTime<Utc>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  // ── Nonconformances (cutoff on occurrence date) ───────────────────────

  fn count_nonconformances_before(
    &self,
    cutoff: NaiveDate,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  fn delete_nonconformances_before(
    &self,
    cutoff: NaiveDate,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  // ── Customer complaints (cutoff on occurrence date) ───────────────────

  fn count_complaints_before(
    &self,
    cutoff: NaiveDate,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  fn delete_complaints_before(
    &self,
    cutoff: NaiveDate,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  // ── Audit ledger ──────────────────────────────────────────────────────

  fn count_audit_entries_before(
    &self,
    cutoff: DateTime<Utc>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  fn delete_audit_entries_before(
    &self,
    cutoff: DateTime<Utc>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Append one entry to the audit ledger. `created_at` is set by the store.
  fn append_audit(
    &self,
    entry: NewAuditEntry,
  ) -> impl Future<Output = Result<AuditEntry, Self::Error>> + Send + '_;
}
