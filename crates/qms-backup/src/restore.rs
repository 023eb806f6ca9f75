//! Restore engine — atomically-as-possible replacement of the live database
//! file with a chosen artifact.
//!
//! The live file and its WAL/SHM journals are treated as a unit. The engine
//! copies the old files to safety paths, clears the journals, copies the
//! source over the live file, and rolls back from the safety copies if the
//! swap fails. Copy-then-overwrite is used instead of rename because the
//! target filesystem may not guarantee atomic rename across the paths
//! involved; the retry loop absorbs transient locks from a competing process
//! such as an antivirus scanner.
//!
//! Restore quiesces connections but takes no exclusive lock, so it belongs
//! in a maintenance window — requests arriving mid-restore may observe a
//! transiently missing or half-copied file.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use qms_core::{live::LiveConnections, retry::RetryPolicy};

use crate::{BackupConfig, Error, Result};

/// Suffix of the temporary safety copy taken before the swap.
const SAFETY_SUFFIX: &str = ".pre_restore";

/// `path` with `suffix` appended to the file name (`db.sqlite3` →
/// `db.sqlite3-wal`).
fn sibling(path: &Path, suffix: &str) -> PathBuf {
  let mut os = path.as_os_str().to_owned();
  os.push(suffix);
  PathBuf::from(os)
}

/// Force a WAL checkpoint (TRUNCATE mode) on the database at `path` via a
/// short-lived blocking connection.
async fn checkpoint(path: &Path) -> Result<()> {
  let path = path.to_path_buf();
  tokio::task::spawn_blocking(move || -> Result<()> {
    let conn = rusqlite::Connection::open(&path)?;
    conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
    Ok(())
  })
  .await
  .map_err(|e| Error::storage("joining checkpoint task", std::io::Error::other(e)))?
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// Replaces the live database file with a restore source.
#[derive(Debug, Clone)]
pub struct RestoreEngine {
  db_path:       PathBuf,
  retry:         RetryPolicy,
  quiesce_pause: Duration,
}

impl RestoreEngine {
  pub fn new(config: &BackupConfig) -> Self {
    Self {
      db_path:       config.db_path.clone(),
      retry:         config.retry,
      quiesce_pause: config.quiesce_pause,
    }
  }

  /// Replace the live database with the file at `source`.
  ///
  /// On success the caller must reopen its connections — `live` has been
  /// quiesced. On failure the pre-restore state has been rolled back where
  /// possible, and the original error is returned even if rollback itself
  /// partially failed; the caller must treat that as requiring manual
  /// inspection.
  pub async fn restore(
    &self,
    source: &Path,
    live: &impl LiveConnections,
  ) -> Result<()> {
    if !source.exists() {
      return Err(Error::NotFound(source.to_path_buf()));
    }

    // 1. Quiesce: release pooled connections, then give the OS a moment to
    //    drop the file handles.
    if let Err(e) = live.quiesce().await {
      tracing::warn!(error = %e, "quiesce failed; continuing with restore");
    }
    tokio::time::sleep(self.quiesce_pause).await;

    // 2. Checkpoint the current live database so its WAL is merged before we
    //    copy it aside. The live DB is about to be discarded, so a failure
    //    here is only worth a warning.
    if let Err(e) = checkpoint(&self.db_path).await {
      tracing::warn!(error = %e, "pre-restore checkpoint failed; ignored");
    }

    let wal        = sibling(&self.db_path, "-wal");
    let shm        = sibling(&self.db_path, "-shm");
    let safety     = sibling(&self.db_path, SAFETY_SUFFIX);
    let safety_wal = sibling(&safety, "-wal");
    let safety_shm = sibling(&safety, "-shm");

    // 3. Safety copy of the current live file and journals. Exhausting the
    //    retries here aborts the restore with nothing changed.
    self
      .copy_with_retry(&self.db_path, &safety, "copying pre-restore safety file")
      .await?;
    if wal.exists() {
      self
        .copy_with_retry(&wal, &safety_wal, "copying pre-restore WAL file")
        .await?;
    }
    if shm.exists() {
      self
        .copy_with_retry(&shm, &safety_shm, "copying pre-restore SHM file")
        .await?;
    }

    // 4. Clear the live journals. Failure is downgraded to a warning — the
    //    files are recreated or ignored on next open.
    for journal in [&wal, &shm] {
      if let Err(e) = self.remove_with_retry(journal, "removing live journal file").await {
        tracing::warn!(path = %journal.display(), error = %e, "journal removal failed; continuing");
      }
    }

    // 5. Swap the source over the live file. Exhausting the retries here
    //    transfers control to rollback; the swap error is re-raised
    //    regardless of how rollback fares.
    if let Err(swap_err) = self
      .copy_with_retry(source, &self.db_path, "swapping restore source over live database")
      .await
    {
      tracing::error!(error = %swap_err, "swap failed; rolling back to pre-restore state");
      self
        .rollback(&safety, &safety_wal, &safety_shm, &wal, &shm)
        .await;
      return Err(swap_err);
    }

    // 6. Checkpoint the freshly-swapped database (best effort).
    if let Err(e) = checkpoint(&self.db_path).await {
      tracing::warn!(error = %e, "post-restore checkpoint failed; ignored");
    }

    // 7. Cleanup of the safety copies affects disk usage only.
    for leftover in [&safety, &safety_wal, &safety_shm] {
      if leftover.exists()
        && let Err(e) = tokio::fs::remove_file(leftover).await
      {
        tracing::warn!(path = %leftover.display(), error = %e, "safety copy cleanup failed; ignored");
      }
    }

    tracing::info!(source = %source.display(), "database restore complete");
    Ok(())
  }

  /// Put the pre-restore files back. Errors are logged only; the caller
  /// re-raises the swap error that got us here.
  async fn rollback(
    &self,
    safety:     &Path,
    safety_wal: &Path,
    safety_shm: &Path,
    wal:        &Path,
    shm:        &Path,
  ) {
    let restores: [(&Path, &Path); 3] = [
      (safety, self.db_path.as_path()),
      (safety_wal, wal),
      (safety_shm, shm),
    ];

    for (from, to) in restores {
      if !from.exists() {
        continue;
      }
      // Journals are only restored if their directory still exists.
      if to.parent().is_some_and(|p| !p.exists()) {
        continue;
      }
      match tokio::fs::copy(from, to).await {
        Ok(_) => {
          if let Err(e) = tokio::fs::remove_file(from).await {
            tracing::warn!(path = %from.display(), error = %e, "rollback cleanup failed");
          }
        }
        Err(e) => {
          tracing::error!(
            from = %from.display(),
            to = %to.display(),
            error = %e,
            "rollback copy failed; state may need manual inspection"
          );
        }
      }
    }
  }

  // ── Retry loops ───────────────────────────────────────────────────────

  async fn copy_with_retry(&self, from: &Path, to: &Path, op: &str) -> Result<()> {
    let mut attempt = 1;
    loop {
      match tokio::fs::copy(from, to).await {
        Ok(_) => return Ok(()),
        Err(e) if attempt < self.retry.attempts => {
          tracing::warn!(
            attempt,
            max = self.retry.attempts,
            error = %e,
            "{op} failed; retrying"
          );
          attempt += 1;
          tokio::time::sleep(self.retry.backoff).await;
        }
        Err(e) => return Err(Error::storage(op, e)),
      }
    }
  }

  /// Remove `path` if it exists, retrying on failure.
  async fn remove_with_retry(&self, path: &Path, op: &str) -> Result<()> {
    let mut attempt = 1;
    loop {
      if !path.exists() {
        return Ok(());
      }
      match tokio::fs::remove_file(path).await {
        Ok(()) => return Ok(()),
        Err(e) if attempt < self.retry.attempts => {
          tracing::warn!(
            attempt,
            max = self.retry.attempts,
            error = %e,
            "{op} failed; retrying"
          );
          attempt += 1;
          tokio::time::sleep(self.retry.backoff).await;
        }
        Err(e) => return Err(Error::storage(op, e)),
      }
    }
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;
  use qms_core::artifact::ArtifactKind;
  use tempfile::TempDir;

  use crate::snapshot::{SQLITE_MAGIC, SnapshotEngine};

  /// A quiesce target with nothing to quiesce.
  struct NoopLive;

  impl LiveConnections for NoopLive {
    type Error = std::convert::Infallible;

    async fn quiesce(&self) -> Result<(), Self::Error> { Ok(()) }
  }

  fn config(dir: &TempDir) -> BackupConfig {
    BackupConfig::without_waits(dir.path().join("live.sqlite3"), dir.path().join("backups"))
  }

  fn fake_db(payload: &[u8]) -> Vec<u8> {
    let mut data = SQLITE_MAGIC.to_vec();
    data.extend_from_slice(payload);
    data
  }

  #[tokio::test]
  async fn restore_missing_source_is_not_found() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir);
    tokio::fs::write(&cfg.db_path, fake_db(b"live")).await.unwrap();

    let engine = RestoreEngine::new(&cfg);
    let err = engine
      .restore(&dir.path().join("absent.sqlite3"), &NoopLive)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
  }

  #[tokio::test]
  async fn restore_swaps_live_file_and_cleans_up() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir);
    tokio::fs::write(&cfg.db_path, fake_db(b"old state")).await.unwrap();

    let source = dir.path().join("incoming.sqlite3");
    tokio::fs::write(&source, fake_db(b"new state")).await.unwrap();

    let engine = RestoreEngine::new(&cfg);
    engine.restore(&source, &NoopLive).await.unwrap();

    let live = tokio::fs::read(&cfg.db_path).await.unwrap();
    assert_eq!(live, fake_db(b"new state"));

    // Safety copies are gone after a successful restore.
    assert!(!sibling(&cfg.db_path, SAFETY_SUFFIX).exists());
  }

  #[tokio::test]
  async fn restore_clears_stale_journals() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir);
    tokio::fs::write(&cfg.db_path, fake_db(b"old")).await.unwrap();
    let wal = sibling(&cfg.db_path, "-wal");
    let shm = sibling(&cfg.db_path, "-shm");
    tokio::fs::write(&wal, b"wal bytes").await.unwrap();
    tokio::fs::write(&shm, b"shm bytes").await.unwrap();

    let source = dir.path().join("incoming.sqlite3");
    tokio::fs::write(&source, fake_db(b"new")).await.unwrap();

    let engine = RestoreEngine::new(&cfg);
    engine.restore(&source, &NoopLive).await.unwrap();

    assert!(!wal.exists());
    assert!(!shm.exists());
  }

  #[tokio::test]
  async fn failed_swap_rolls_back_and_surfaces_error() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir);
    let before = fake_db(b"precious state");
    tokio::fs::write(&cfg.db_path, &before).await.unwrap();
    let wal = sibling(&cfg.db_path, "-wal");
    tokio::fs::write(&wal, b"wal bytes").await.unwrap();

    // A directory with an artifact-looking name: exists() passes, but every
    // copy attempt fails, exhausting the swap retries.
    let source = dir.path().join("bad.sqlite3");
    tokio::fs::create_dir(&source).await.unwrap();

    let engine = RestoreEngine::new(&cfg);
    let err = engine.restore(&source, &NoopLive).await.unwrap_err();
    assert!(matches!(err, Error::Storage { .. }));

    // The live file is byte-identical to its pre-restore state and the
    // journal came back from the safety copy.
    let after = tokio::fs::read(&cfg.db_path).await.unwrap();
    assert_eq!(after, before);
    assert_eq!(tokio::fs::read(&wal).await.unwrap(), b"wal bytes");

    // Rollback consumed the safety copies.
    assert!(!sibling(&cfg.db_path, SAFETY_SUFFIX).exists());
  }

  #[tokio::test]
  async fn capture_then_restore_round_trips_bytes() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir);
    let original = fake_db(b"round trip payload");
    tokio::fs::write(&cfg.db_path, &original).await.unwrap();

    let snap = SnapshotEngine::new(&cfg)
      .capture(ArtifactKind::Manual, None)
      .await
      .unwrap();

    // Mutate the live file, then restore the capture.
    tokio::fs::write(&cfg.db_path, fake_db(b"divergent")).await.unwrap();
    RestoreEngine::new(&cfg)
      .restore(&snap.path, &NoopLive)
      .await
      .unwrap();

    let live = tokio::fs::read(&cfg.db_path).await.unwrap();
    assert_eq!(live, original);
  }
}
