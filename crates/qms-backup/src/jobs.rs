//! The standard job table: the four recurring maintenance jobs every
//! deployment runs.
//!
//! | id                  | schedule             | work                        |
//! |---------------------|----------------------|-----------------------------|
//! | `monthly_backup`    | 1st of month, 00:00  | capture + register + prune  |
//! | `yearly_archive`    | Jan 1st, 00:00       | archive aged records        |
//! | `prune_job_history` | Mondays, 00:00       | drop run records > 7 days   |
//! | `cleanup_temp_files`| daily, 00:00         | purge stale temp files      |
//!
//! Jobs never fail upward — every error is logged and the job waits for its
//! next fire time.

use std::time::Duration;

use chrono::{Utc, Weekday};
use qms_core::{
  artifact::{ArtifactKind, NewArtifact},
  audit::{AuditAction, NewAuditEntry},
  catalog::ArtifactCatalog,
  records::RecordStore,
};

use crate::{
  BackupConfig,
  retention::{self, SNAPSHOTS_TO_KEEP},
  scheduler::{Job, Scheduler, Trigger},
  snapshot::SnapshotEngine,
};

/// Run records older than this many days are dropped by the history
/// pruning job.
const HISTORY_RETENTION_DAYS: i64 = 7;

/// Temp files older than this are purged by the cleanup job.
const TEMP_MAX_AGE: Duration = Duration::from_secs(3600);

/// Register the standard maintenance jobs on `scheduler`. Safe to call more
/// than once — registration replaces by job id.
pub fn register_standard_jobs<S>(scheduler: &mut Scheduler, config: &BackupConfig, store: S)
where
  S: ArtifactCatalog + RecordStore + Clone + Send + Sync + 'static,
{
  let snapshots = SnapshotEngine::new(config);
  let backup_dir = config.backup_dir.clone();

  {
    let snapshots = snapshots.clone();
    let backup_dir = backup_dir.clone();
    let store = store.clone();
    scheduler.register(Job::new(
      "monthly_backup",
      "Monthly scheduled backup",
      Trigger::Monthly { day: 1, hour: 0 },
      move || {
        let snapshots = snapshots.clone();
        let backup_dir = backup_dir.clone();
        let store = store.clone();
        async move {
          let snap = match snapshots.capture(ArtifactKind::Scheduled, None).await {
            Ok(snap) => snap,
            Err(e) => {
              tracing::error!(error = %e, "scheduled backup capture failed");
              return;
            }
          };

          let input = NewArtifact {
            size_bytes:   snap.size_bytes,
            kind:         ArtifactKind::Scheduled,
            storage_path: snap.path.to_string_lossy().into_owned(),
            initiated_by: None,
            note:         String::new(),
          };
          let artifact = match store.add_artifact(input).await {
            Ok(artifact) => artifact,
            Err(e) => {
              // The file stays on disk; reconciliation will register it.
              tracing::error!(error = %e, "failed to register scheduled backup");
              return;
            }
          };

          let audit = NewAuditEntry::system(
            AuditAction::Capture,
            Some(artifact.artifact_id.to_string()),
            format!("scheduled backup captured ({} bytes)", snap.size_bytes),
          );
          if let Err(e) = store.append_audit(audit).await {
            tracing::warn!(error = %e, "failed to audit scheduled backup");
          }

          retention::prune_snapshots(&backup_dir, SNAPSHOTS_TO_KEEP).await;
        }
      },
    ));
  }

  {
    let store = store.clone();
    scheduler.register(Job::new(
      "yearly_archive",
      "Yearly record archival",
      Trigger::Yearly { month: 1, day: 1, hour: 0 },
      move || {
        let store = store.clone();
        async move {
          let report = retention::archive_old_records(&store).await;
          for error in &report.errors {
            tracing::error!(error, "archival collection failed");
          }
        }
      },
    ));
  }

  {
    let history = scheduler.history_handle();
    scheduler.register(Job::new(
      "prune_job_history",
      "Weekly job history pruning",
      Trigger::Weekly { weekday: Weekday::Mon, hour: 0 },
      move || {
        let history = history.clone();
        async move {
          history.prune_before(Utc::now() - chrono::Duration::days(HISTORY_RETENTION_DAYS));
        }
      },
    ));
  }

  scheduler.register(Job::new(
    "cleanup_temp_files",
    "Daily temp file cleanup",
    Trigger::Daily { hour: 0 },
    move || {
      let backup_dir = backup_dir.clone();
      async move {
        retention::purge_stale_temp_files(&backup_dir, TEMP_MAX_AGE).await;
      }
    },
  ));
}

// ─── Tests ───────────────────────────────────────────────────────────────────
