//! Reconciliation engine — repairs drift between the artifact catalog and
//! the backup directory.
//!
//! Every per-item operation is independent; one failure is appended to the
//! report's `errors` and processing continues. The result is a best-effort
//! reconciliation report, not a transaction.

use std::{collections::HashSet, path::PathBuf, time::Duration};

use qms_core::{
  artifact::{ArtifactKind, NewArtifact},
  catalog::{ArtifactCatalog, ArtifactQuery, CatalogStats, SyncReport},
};

use crate::{retention, snapshot::is_artifact_name};

/// Note attached to catalog entries created for files found on disk.
const DISCOVERED_NOTE: &str = "registered by reconciliation";

/// Stale temp files older than this are purged during a sync run.
const TEMP_MAX_AGE: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct SyncEngine {
  backup_dir: PathBuf,
}

impl SyncEngine {
  pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
    Self { backup_dir: backup_dir.into() }
  }

  /// Artifact files currently in the backup directory, excluding staging and
  /// safety leftovers.
  async fn files_on_disk(&self) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !self.backup_dir.exists() {
      return Ok(files);
    }

    let mut entries = tokio::fs::read_dir(&self.backup_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
      let name = entry.file_name();
      let Some(name) = name.to_str() else { continue };
      if is_artifact_name(name) {
        files.push(entry.path());
      }
    }
    Ok(files)
  }

  /// Reconcile the catalog with the filesystem.
  ///
  /// Pass 1 deletes catalog entries whose file vanished (they can never be
  /// restored from). Pass 2 registers files no catalog entry references, as
  /// scheduler-kind artifacts with a discovery note. Pass 3 purges stale
  /// temp files, best-effort.
  pub async fn sync<C: ArtifactCatalog>(&self, catalog: &C) -> SyncReport {
    let mut report = SyncReport::default();

    let artifacts = match catalog.list_artifacts(ArtifactQuery::default()).await {
      Ok(artifacts) => artifacts,
      Err(e) => {
        report.errors.push(format!("listing catalog entries: {e}"));
        return report;
      }
    };

    // Pass 1: catalog entries without a file.
    let mut registered: HashSet<String> = HashSet::new();
    for artifact in artifacts {
      if PathBuf::from(&artifact.storage_path).exists() {
        registered.insert(artifact.storage_path);
        continue;
      }
      tracing::warn!(
        artifact_id = %artifact.artifact_id,
        path = %artifact.storage_path,
        "backup file missing; deleting catalog entry"
      );
      match catalog.delete_artifact(artifact.artifact_id).await {
        Ok(_) => report.orphaned_records_deleted += 1,
        Err(e) => report.errors.push(format!(
          "deleting orphaned entry {}: {e}",
          artifact.artifact_id
        )),
      }
    }

    // Pass 2: files without a catalog entry.
    let files = match self.files_on_disk().await {
      Ok(files) => files,
      Err(e) => {
        report.errors.push(format!("listing backup directory: {e}"));
        return report;
      }
    };

    for file in files {
      let path_str = file.to_string_lossy().into_owned();
      if registered.contains(&path_str) {
        continue;
      }

      let size_bytes = match tokio::fs::metadata(&file).await {
        Ok(meta) => meta.len(),
        Err(e) => {
          report.errors.push(format!("reading {}: {e}", file.display()));
          continue;
        }
      };

      let input = NewArtifact {
        size_bytes,
        kind: ArtifactKind::Scheduled,
        storage_path: path_str,
        initiated_by: None,
        note: DISCOVERED_NOTE.to_string(),
      };
      match catalog.add_artifact(input).await {
        Ok(_) => {
          tracing::info!(path = %file.display(), "registered uncatalogued backup file");
          report.orphaned_files_registered += 1;
        }
        Err(e) => report.errors.push(format!("registering {}: {e}", file.display())),
      }
    }

    // Pass 3: stale temp files. Errors are swallowed inside the purge.
    let purged = retention::purge_stale_temp_files(&self.backup_dir, TEMP_MAX_AGE).await;
    if purged > 0 {
      tracing::info!(purged, "stale temp files removed during sync");
    }

    tracing::info!(
      orphaned_records_deleted = report.orphaned_records_deleted,
      orphaned_files_registered = report.orphaned_files_registered,
      errors = report.errors.len(),
      "backup reconciliation finished"
    );
    report
  }

  /// Aggregate catalog/filesystem health. Pure read, no mutation.
  pub async fn stats<C: ArtifactCatalog>(
    &self,
    catalog: &C,
  ) -> Result<CatalogStats, C::Error> {
    let artifacts = catalog.list_artifacts(ArtifactQuery::default()).await?;

    let mut stats = CatalogStats {
      total_artifacts: artifacts.len() as u32,
      ..Default::default()
    };

    let mut registered: HashSet<&str> = HashSet::new();
    for artifact in &artifacts {
      match artifact.kind {
        ArtifactKind::Scheduled => stats.scheduled_artifacts += 1,
        ArtifactKind::Manual => stats.manual_artifacts += 1,
      }
      registered.insert(artifact.storage_path.as_str());
      if !PathBuf::from(&artifact.storage_path).exists() {
        stats.orphaned_records += 1;
      }
    }

    if let Ok(files) = self.files_on_disk().await {
      for file in files {
        stats.total_files_on_disk += 1;
        if let Ok(meta) = tokio::fs::metadata(&file).await {
          stats.total_bytes_on_disk += meta.len();
        }
        if !registered.contains(file.to_string_lossy().as_ref()) {
          stats.orphaned_files += 1;
        }
      }
    }

    stats.is_synced = stats.orphaned_records == 0 && stats.orphaned_files == 0;
    Ok(stats)
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;
  use qms_store_sqlite::SqliteStore;
  use tempfile::TempDir;

  async fn setup() -> (TempDir, SyncEngine, SqliteStore) {
    let dir = TempDir::new().unwrap();
    let backup_dir = dir.path().join("backups");
    tokio::fs::create_dir_all(&backup_dir).await.unwrap();
    let engine = SyncEngine::new(&backup_dir);
    let store = SqliteStore::open_in_memory().await.unwrap();
    (dir, engine, store)
  }

  async fn write_file(dir: &TempDir, name: &str) -> PathBuf {
    let path = dir.path().join("backups").join(name);
    tokio::fs::write(&path, b"artifact bytes").await.unwrap();
    path
  }

  fn catalog_entry(path: &PathBuf) -> NewArtifact {
    NewArtifact {
      size_bytes:   14,
      kind:         ArtifactKind::Manual,
      storage_path: path.to_string_lossy().into_owned(),
      initiated_by: None,
      note:         String::new(),
    }
  }

  #[tokio::test]
  async fn sync_deletes_entries_for_missing_files() {
    let (dir, engine, store) = setup().await;

    let ghost = dir.path().join("backups").join("db_backup_gone.sqlite3");
    store.add_artifact(catalog_entry(&ghost)).await.unwrap();

    let report = engine.sync(&store).await;
    assert_eq!(report.orphaned_records_deleted, 1);
    assert_eq!(report.orphaned_files_registered, 0);
    assert!(report.errors.is_empty());

    let remaining = store.list_artifacts(ArtifactQuery::default()).await.unwrap();
    assert!(remaining.is_empty());
  }

  #[tokio::test]
  async fn sync_registers_uncatalogued_files() {
    let (dir, engine, store) = setup().await;

    let file = write_file(&dir, "db_backup_20240101_000000_abcd1234.sqlite3").await;

    let report = engine.sync(&store).await;
    assert_eq!(report.orphaned_files_registered, 1);

    let entries = store.list_artifacts(ArtifactQuery::default()).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, ArtifactKind::Scheduled);
    assert!(entries[0].initiated_by.is_none());
    assert_eq!(entries[0].note, DISCOVERED_NOTE);
    assert_eq!(entries[0].storage_path, file.to_string_lossy());
  }

  #[tokio::test]
  async fn sync_ignores_temp_and_foreign_files() {
    let (dir, engine, store) = setup().await;

    write_file(&dir, "temp_upload_something.sqlite3").await;
    write_file(&dir, "db_backup_x.sqlite3.tmp").await;
    write_file(&dir, "readme.txt").await;

    let report = engine.sync(&store).await;
    assert_eq!(report.orphaned_files_registered, 0);
    assert_eq!(report.orphaned_records_deleted, 0);
  }

  #[tokio::test]
  async fn sync_is_idempotent() {
    let (dir, engine, store) = setup().await;

    write_file(&dir, "db_backup_a.sqlite3").await;
    let ghost = dir.path().join("backups").join("db_backup_ghost.sqlite3");
    store.add_artifact(catalog_entry(&ghost)).await.unwrap();

    let first = engine.sync(&store).await;
    assert_eq!(first.orphaned_records_deleted, 1);
    assert_eq!(first.orphaned_files_registered, 1);

    // No filesystem changes in between: the second run finds nothing to do.
    let second = engine.sync(&store).await;
    assert_eq!(second.orphaned_records_deleted, 0);
    assert_eq!(second.orphaned_files_registered, 0);
    assert!(second.errors.is_empty());
  }

  #[tokio::test]
  async fn stats_reports_orphans_and_sync_health() {
    let (dir, engine, store) = setup().await;

    // One healthy pair, one orphaned record, one orphaned file.
    let healthy = write_file(&dir, "db_backup_ok.sqlite3").await;
    store.add_artifact(catalog_entry(&healthy)).await.unwrap();

    let ghost = dir.path().join("backups").join("db_backup_gone.sqlite3");
    store.add_artifact(catalog_entry(&ghost)).await.unwrap();

    write_file(&dir, "db_backup_stray.sqlite3").await;

    let stats = engine.stats(&store).await.unwrap();
    assert_eq!(stats.total_artifacts, 2);
    assert_eq!(stats.manual_artifacts, 2);
    assert_eq!(stats.total_files_on_disk, 2);
    assert_eq!(stats.total_bytes_on_disk, 28);
    assert_eq!(stats.orphaned_records, 1);
    assert_eq!(stats.orphaned_files, 1);
    assert!(!stats.is_synced);

    // After a sync the store and disk agree again.
    engine.sync(&store).await;
    let stats = engine.stats(&store).await.unwrap();
    assert_eq!(stats.orphaned_records, 0);
    assert_eq!(stats.orphaned_files, 0);
    assert!(stats.is_synced);
  }
}
