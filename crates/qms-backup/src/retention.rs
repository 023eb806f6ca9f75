//! Retention engine — snapshot pruning, temp-file purging, and archival of
//! aged business records.
//!
//! All deletion here is destructive and final; there is no archive tier.
//! Thresholds are fixed: the ten newest snapshots are kept, business
//! records older than seven years and audit entries older than one year are
//! eligible for deletion.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use chrono::{DateTime, Utc};
use qms_core::{
  audit::{AuditAction, NewAuditEntry},
  records::{ArchivableCounts, ArchiveReport, RecordStore},
};

use crate::snapshot::is_artifact_name;

/// How many snapshot artifacts survive a pruning pass.
pub const SNAPSHOTS_TO_KEEP: usize = 10;

/// Business records older than this are eligible for archival deletion.
pub const BUSINESS_RETENTION_DAYS: i64 = 7 * 365;

/// Audit entries older than this are eligible for archival deletion.
pub const AUDIT_RETENTION_DAYS: i64 = 365;

// ─── Snapshot pruning ────────────────────────────────────────────────────────

/// Delete snapshot files beyond the `keep` newest, judged by modification
/// time. Files that fail to delete are logged and skipped; the count of
/// files actually removed is returned.
pub async fn prune_snapshots(backup_dir: &Path, keep: usize) -> u32 {
  let mut snapshots: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();

  let mut entries = match tokio::fs::read_dir(backup_dir).await {
    Ok(entries) => entries,
    Err(e) => {
      tracing::warn!(dir = %backup_dir.display(), error = %e, "cannot read backup directory");
      return 0;
    }
  };
  while let Ok(Some(entry)) = entries.next_entry().await {
    let name = entry.file_name();
    let Some(name) = name.to_str() else { continue };
    if !is_artifact_name(name) {
      continue;
    }
    if let Ok(meta) = entry.metadata().await
      && let Ok(mtime) = meta.modified()
    {
      snapshots.push((entry.path(), mtime));
    }
  }

  // Newest first; everything past `keep` goes.
  snapshots.sort_by(|a, b| b.1.cmp(&a.1));

  let mut removed = 0;
  for (path, _) in snapshots.into_iter().skip(keep) {
    match tokio::fs::remove_file(&path).await {
      Ok(()) => {
        tracing::info!(path = %path.display(), "pruned old snapshot");
        removed += 1;
      }
      Err(e) => {
        tracing::warn!(path = %path.display(), error = %e, "failed to prune snapshot");
      }
    }
  }
  removed
}

// ─── Temp-file purging ───────────────────────────────────────────────────────

/// True for upload-staging files, safety copies, and anything else that
/// looks transient rather than like a kept artifact.
fn is_temp_name(name: &str) -> bool {
  let lower = name.to_lowercase();
  lower.contains("temp")
    || lower.contains("tmp")
    || lower.ends_with(".pre_restore")
    || lower.starts_with("uploaded_")
}

/// Delete transient files in `backup_dir` older than `max_age`. Individual
/// failures are logged and skipped. Returns how many files were removed.
pub async fn purge_stale_temp_files(backup_dir: &Path, max_age: Duration) -> u32 {
  let mut entries = match tokio::fs::read_dir(backup_dir).await {
    Ok(entries) => entries,
    Err(e) => {
      tracing::warn!(dir = %backup_dir.display(), error = %e, "cannot read backup directory");
      return 0;
    }
  };

  let mut removed = 0;
  while let Ok(Some(entry)) = entries.next_entry().await {
    let name = entry.file_name();
    let Some(name) = name.to_str() else { continue };
    if !is_temp_name(name) {
      continue;
    }

    let stale = entry
      .metadata()
      .await
      .ok()
      .and_then(|meta| meta.modified().ok())
      .and_then(|mtime| mtime.elapsed().ok())
      .is_some_and(|age| age >= max_age);
    if !stale {
      continue;
    }

    match tokio::fs::remove_file(entry.path()).await {
      Ok(()) => {
        tracing::info!(path = %entry.path().display(), "purged stale temp file");
        removed += 1;
      }
      Err(e) => {
        tracing::warn!(path = %entry.path().display(), error = %e, "failed to purge temp file");
      }
    }
  }
  removed
}

// ─── Archival ────────────────────────────────────────────────────────────────

fn business_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
  now - chrono::Duration::days(BUSINESS_RETENTION_DAYS)
}

fn audit_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
  now - chrono::Duration::days(AUDIT_RETENTION_DAYS)
}

/// Delete business records and audit entries past their retention windows.
///
/// Each collection is handled independently; a failure in one is recorded
/// in the report and the rest still run. One summary audit entry is
/// appended afterwards (its own failure is only logged, since the deletions
/// already happened).
pub async fn archive_old_records<S: RecordStore>(store: &S) -> ArchiveReport {
  archive_old_records_at(store, Utc::now()).await
}

/// [`archive_old_records`] with an explicit clock, for deterministic tests.
pub async fn archive_old_records_at<S: RecordStore>(
  store: &S,
  now: DateTime<Utc>,
) -> ArchiveReport {
  let business = business_cutoff(now);
  let audit = audit_cutoff(now);
  let mut report = ArchiveReport::default();

  match store.delete_performance_before(business).await {
    Ok(n) => report.performance_deleted = n,
    Err(e) => report.errors.push(format!("performance records: {e}")),
  }
  match store.delete_nonconformances_before(business.date_naive()).await {
    Ok(n) => report.nonconformances_deleted = n,
    Err(e) => report.errors.push(format!("nonconformances: {e}")),
  }
  match store.delete_complaints_before(business.date_naive()).await {
    Ok(n) => report.complaints_deleted = n,
    Err(e) => report.errors.push(format!("customer complaints: {e}")),
  }
  match store.delete_audit_entries_before(audit).await {
    Ok(n) => report.audit_entries_deleted = n,
    Err(e) => report.errors.push(format!("audit entries: {e}")),
  }

  tracing::info!(
    total_deleted = report.total_deleted(),
    errors = report.errors.len(),
    "archival run finished"
  );

  let summary = NewAuditEntry::system(
    AuditAction::Archive,
    None,
    format!(
      "archived {} records ({} performance, {} nonconformances, {} complaints, {} audit entries)",
      report.total_deleted(),
      report.performance_deleted,
      report.nonconformances_deleted,
      report.complaints_deleted,
      report.audit_entries_deleted,
    ),
  );
  if let Err(e) = store.append_audit(summary).await {
    tracing::warn!(error = %e, "failed to record archival audit entry");
  }

  report
}

/// Count rows currently past their retention windows without deleting
/// anything.
pub async fn archivable_counts<S: RecordStore>(
  store: &S,
) -> Result<ArchivableCounts, S::Error> {
  archivable_counts_at(store, Utc::now()).await
}

pub async fn archivable_counts_at<S: RecordStore>(
  store: &S,
  now: DateTime<Utc>,
) -> Result<ArchivableCounts, S::Error> {
  let business = business_cutoff(now);
  let audit = audit_cutoff(now);

  Ok(ArchivableCounts {
    performance_records: store.count_performance_before(business).await?,
    nonconformances: store
      .count_nonconformances_before(business.date_naive())
      .await?,
    customer_complaints: store
      .count_complaints_before(business.date_naive())
      .await?,
    audit_entries: store.count_audit_entries_before(audit).await?,
  })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
