//! The `ArtifactCatalog` trait and supporting query/report types.
//!
//! The trait is implemented by storage backends (e.g. `qms-store-sqlite`).
//! The engines (`qms-backup`) and the service layer depend on this
//! abstraction, not on any concrete backend.

use std::future::Future;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::{ArtifactKind, BackupArtifact, NewArtifact};

// ─── Query type ──────────────────────────────────────────────────────────────

/// Filters for [`ArtifactCatalog::list_artifacts`].
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ArtifactQuery {
  pub kind:         Option<ArtifactKind>,
  pub initiated_by: Option<Uuid>,
}

// ─── Reports ─────────────────────────────────────────────────────────────────

/// Outcome of one reconciliation run.
///
/// Reconciliation is best-effort: per-item failures land in `errors` and do
/// not undo work already done. A non-empty `errors` does not imply zero
/// useful work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
  /// Catalog entries deleted because their file no longer exists.
  pub orphaned_records_deleted: u32,
  /// On-disk files registered because no catalog entry referenced them.
  pub orphaned_files_registered: u32,
  pub errors: Vec<String>,
}

/// Aggregate catalog/filesystem health, returned by the stats endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogStats {
  pub total_artifacts:     u32,
  pub scheduled_artifacts: u32,
  pub manual_artifacts:    u32,
  pub total_files_on_disk: u32,
  pub total_bytes_on_disk: u64,
  /// Catalog entries whose file is missing.
  pub orphaned_records:    u32,
  /// On-disk files with no catalog entry.
  pub orphaned_files:      u32,
  /// True iff both orphan counts are zero.
  pub is_synced:           bool,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the persisted artifact catalog.
///
/// Artifact rows are immutable after creation; there is deliberately no
/// update operation. All methods return `Send` futures so the trait can be
/// used in multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait ArtifactCatalog: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Register a new artifact. `captured_at` is set by the store.
  fn add_artifact(
    &self,
    input: NewArtifact,
  ) -> impl Future<Output = Result<BackupArtifact, Self::Error>> + Send + '_;

  /// Retrieve an artifact by id. Returns `None` if not found.
  fn get_artifact(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<BackupArtifact>, Self::Error>> + Send + '_;

  /// List artifacts, newest first, optionally filtered.
  fn list_artifacts(
    &self,
    query: ArtifactQuery,
  ) -> impl Future<Output = Result<Vec<BackupArtifact>, Self::Error>> + Send + '_;

  /// Delete a catalog entry. Returns `false` if no row matched.
  ///
  /// Deletes the row only — callers that also want the file gone must
  /// remove it themselves.
  fn delete_artifact(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;
}
