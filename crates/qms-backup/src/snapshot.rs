//! Snapshot engine — copies the live database to a timestamped artifact and
//! validates uploaded artifacts before they are accepted as restore sources.

use std::path::{Path, PathBuf};

use chrono::Utc;
use qms_core::artifact::ArtifactKind;
use tokio::io::AsyncReadExt as _;
use uuid::Uuid;

use crate::{BackupConfig, Error, Result, ValidationError};

/// Artifact file names look like `db_backup_20250301_142509_a1b2c3d4.sqlite3`.
/// The random suffix keeps two captures within the same second from
/// overwriting each other.
pub const ARTIFACT_PREFIX: &str = "db_backup_";
pub const ARTIFACT_SUFFIX: &str = ".sqlite3";

/// First 16 bytes of every SQLite database file.
pub const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Largest artifact accepted for upload: 1 GiB.
pub const MAX_ARTIFACT_BYTES: u64 = 1024 * 1024 * 1024;

/// The outcome of a capture: where the copy landed and how big it is.
#[derive(Debug, Clone)]
pub struct Snapshot {
  pub path:       PathBuf,
  pub size_bytes: u64,
}

// ─── Capture ─────────────────────────────────────────────────────────────────

/// Copies the live database file into the backup directory.
///
/// Capture does not checkpoint the source and does not copy WAL/SHM files;
/// SQLite's own recovery reconciles the copy on next open. Capture and the
/// catalog insert are separate steps — the caller registers the artifact
/// after a successful copy, and the reconciliation engine repairs any gap
/// left by a crash between the two.
#[derive(Debug, Clone)]
pub struct SnapshotEngine {
  db_path:    PathBuf,
  backup_dir: PathBuf,
}

impl SnapshotEngine {
  pub fn new(config: &BackupConfig) -> Self {
    Self {
      db_path:    config.db_path.clone(),
      backup_dir: config.backup_dir.clone(),
    }
  }

  /// Copy the live database to a fresh artifact file.
  ///
  /// `initiator` is the acting user for log attribution; the caller also
  /// records it on the catalog row. Fails with [`Error::NotFound`] if the
  /// live file is missing, and with [`Error::Storage`] on any I/O failure.
  /// No partial file is left behind beyond the OS's own copy semantics.
  pub async fn capture(
    &self,
    kind: ArtifactKind,
    initiator: Option<Uuid>,
  ) -> Result<Snapshot> {
    if !self.db_path.exists() {
      return Err(Error::NotFound(self.db_path.clone()));
    }

    tokio::fs::create_dir_all(&self.backup_dir)
      .await
      .map_err(|e| Error::storage("creating backup directory", e))?;

    let path = self.backup_dir.join(Self::artifact_file_name());

    tokio::fs::copy(&self.db_path, &path)
      .await
      .map_err(|e| Error::storage(format!("copying live database to {}", path.display()), e))?;

    let size_bytes = tokio::fs::metadata(&path)
      .await
      .map_err(|e| Error::storage("reading artifact metadata", e))?
      .len();

    tracing::info!(
      kind = ?kind,
      initiator = ?initiator,
      path = %path.display(),
      size_bytes,
      "backup artifact captured"
    );

    Ok(Snapshot { path, size_bytes })
  }

  /// Move a staged file (an upload, already validated) into the backup
  /// directory under a fresh artifact name.
  pub async fn adopt(&self, staged: &Path) -> Result<Snapshot> {
    tokio::fs::create_dir_all(&self.backup_dir)
      .await
      .map_err(|e| Error::storage("creating backup directory", e))?;

    let path = self.backup_dir.join(Self::artifact_file_name());
    tokio::fs::rename(staged, &path)
      .await
      .map_err(|e| Error::storage(format!("adopting staged file as {}", path.display()), e))?;

    let size_bytes = tokio::fs::metadata(&path)
      .await
      .map_err(|e| Error::storage("reading artifact metadata", e))?
      .len();

    tracing::info!(path = %path.display(), size_bytes, "staged file adopted as artifact");
    Ok(Snapshot { path, size_bytes })
  }

  fn artifact_file_name() -> String {
    let stamp  = Utc::now().format("%Y%m%d_%H%M%S");
    let unique = Uuid::new_v4().simple().to_string();
    format!("{ARTIFACT_PREFIX}{stamp}_{}{ARTIFACT_SUFFIX}", &unique[..8])
  }
}

/// True if `name` follows the artifact naming convention and is not an
/// upload-staging or safety-copy leftover.
pub fn is_artifact_name(name: &str) -> bool {
  let lower = name.to_lowercase();
  lower.ends_with(ARTIFACT_SUFFIX)
    && !lower.contains("temp")
    && !lower.contains("tmp")
}

// ─── Validation ──────────────────────────────────────────────────────────────

/// Check that `path` looks like a restorable SQLite database.
///
/// Checks run in order: existence, extension, size, magic header. The first
/// failure is returned; nothing beyond the 16-byte header is parsed.
pub async fn validate_artifact(path: &Path) -> Result<(), ValidationError> {
  if !path.exists() {
    return Err(ValidationError::Missing(path.to_path_buf()));
  }

  let extension_ok = path
    .extension()
    .and_then(|e| e.to_str())
    .is_some_and(|e| e.eq_ignore_ascii_case("sqlite3"));
  if !extension_ok {
    return Err(ValidationError::WrongExtension);
  }

  let size = match tokio::fs::metadata(path).await {
    Ok(meta) => meta.len(),
    Err(_) => return Err(ValidationError::Missing(path.to_path_buf())),
  };
  if size > MAX_ARTIFACT_BYTES {
    return Err(ValidationError::TooLarge(size));
  }

  let mut header = [0u8; 16];
  let mut file = match tokio::fs::File::open(path).await {
    Ok(f) => f,
    Err(_) => return Err(ValidationError::Missing(path.to_path_buf())),
  };
  // A file shorter than the header is rejected the same way as a forged one.
  if file.read_exact(&mut header).await.is_err() || &header != SQLITE_MAGIC {
    return Err(ValidationError::BadMagic);
  }

  Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
