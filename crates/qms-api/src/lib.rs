//! JSON REST API for the QMS backup subsystem.
//!
//! Exposes an axum [`Router`] over a [`SqliteStore`] plus the backup
//! engines. Auth, TLS, and transport concerns are the caller's
//! responsibility; handlers accept an optional `X-Actor-Id` header for
//! audit attribution.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", qms_api::api_router(state.clone()))
//! ```

pub mod archive;
pub mod backups;
pub mod error;

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use axum::{
  Router,
  extract::DefaultBodyLimit,
  routing::{delete, get, post},
};
use qms_backup::{BackupConfig, RestoreEngine, snapshot::MAX_ARTIFACT_BYTES};
use qms_store_sqlite::SqliteStore;
use serde::Deserialize;
use tokio::sync::RwLock;

pub use error::ApiError;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml`.
#[derive(Deserialize, Clone)]
pub struct ServerConfig {
  pub host:       String,
  pub port:       u16,
  pub db_path:    PathBuf,
  pub backup_dir: PathBuf,
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
///
/// The store sits behind an `RwLock` because a restore must quiesce every
/// database connection and reopen afterwards: the restore path takes the
/// write lock, swaps the file, and replaces the store in place. All other
/// handlers take read access.
#[derive(Clone)]
pub struct AppState {
  pub store:  Arc<RwLock<SqliteStore>>,
  pub backup: Arc<BackupConfig>,
}

impl AppState {
  pub fn new(store: SqliteStore, backup: BackupConfig) -> Self {
    Self {
      store:  Arc::new(RwLock::new(store)),
      backup: Arc::new(backup),
    }
  }

  /// Restore the live database from `source` and reopen the store.
  ///
  /// The store is reopened whether or not the restore succeeded — after a
  /// failed swap the engine has rolled the file back, and the platform must
  /// keep serving from it.
  pub(crate) async fn restore_from(&self, source: &Path) -> Result<(), ApiError> {
    let mut guard = self.store.write().await;

    let engine = RestoreEngine::new(&self.backup);
    let result = engine.restore(source, &*guard).await;

    *guard = SqliteStore::open(&self.backup.db_path)
      .await
      .map_err(ApiError::store)?;

    result?;
    Ok(())
  }
}

// ─── Shared store ─────────────────────────────────────────────────────────────

/// A store view that always resolves to the current store behind the lock.
///
/// Scheduler jobs hold this instead of a raw [`SqliteStore`] clone: a
/// restore quiesces and replaces the store, which would leave a raw clone
/// pointing at a closed connection.
#[derive(Clone)]
pub struct SharedStore(Arc<RwLock<SqliteStore>>);

impl SharedStore {
  pub fn new(inner: Arc<RwLock<SqliteStore>>) -> Self {
    Self(inner)
  }
}

impl qms_core::catalog::ArtifactCatalog for SharedStore {
  type Error = qms_store_sqlite::Error;

  async fn add_artifact(
    &self,
    input: qms_core::artifact::NewArtifact,
  ) -> Result<qms_core::artifact::BackupArtifact, Self::Error> {
    self.0.read().await.add_artifact(input).await
  }

  async fn get_artifact(
    &self,
    id: uuid::Uuid,
  ) -> Result<Option<qms_core::artifact::BackupArtifact>, Self::Error> {
    self.0.read().await.get_artifact(id).await
  }

  async fn list_artifacts(
    &self,
    query: qms_core::catalog::ArtifactQuery,
  ) -> Result<Vec<qms_core::artifact::BackupArtifact>, Self::Error> {
    self.0.read().await.list_artifacts(query).await
  }

  async fn delete_artifact(&self, id: uuid::Uuid) -> Result<bool, Self::Error> {
    self.0.read().await.delete_artifact(id).await
  }
}

impl qms_core::records::RecordStore for SharedStore {
  type Error = qms_store_sqlite::Error;

  async fn count_performance_before(
    &self,
    cutoff: chrono::DateTime<chrono::Utc>,
  ) -> Result<u64, Self::Error> {
    self.0.read().await.count_performance_before(cutoff).await
  }

  async fn delete_performance_before(
    &self,
    cutoff: chrono::DateTime<chrono::Utc>,
  ) -> Result<u64, Self::Error> {
    self.0.read().await.delete_performance_before(cutoff).await
  }

  async fn count_nonconformances_before(
    &self,
    cutoff: chrono::NaiveDate,
  ) -> Result<u64, Self::Error> {
    self.0.read().await.count_nonconformances_before(cutoff).await
  }

  async fn delete_nonconformances_before(
    &self,
    cutoff: chrono::NaiveDate,
  ) -> Result<u64, Self::Error> {
    self.0.read().await.delete_nonconformances_before(cutoff).await
  }

  async fn count_complaints_before(
    &self,
    cutoff: chrono::NaiveDate,
  ) -> Result<u64, Self::Error> {
    self.0.read().await.count_complaints_before(cutoff).await
  }

  async fn delete_complaints_before(
    &self,
    cutoff: chrono::NaiveDate,
  ) -> Result<u64, Self::Error> {
    self.0.read().await.delete_complaints_before(cutoff).await
  }

  async fn count_audit_entries_before(
    &self,
    cutoff: chrono::DateTime<chrono::Utc>,
  ) -> Result<u64, Self::Error> {
    self.0.read().await.count_audit_entries_before(cutoff).await
  }

  async fn delete_audit_entries_before(
    &self,
    cutoff: chrono::DateTime<chrono::Utc>,
  ) -> Result<u64, Self::Error> {
    self.0.read().await.delete_audit_entries_before(cutoff).await
  }

  async fn append_audit(
    &self,
    entry: qms_core::audit::NewAuditEntry,
  ) -> Result<qms_core::audit::AuditEntry, Self::Error> {
    self.0.read().await.append_audit(entry).await
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build a fully-materialised API router for `state`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router(state: AppState) -> Router<()> {
  Router::new()
    // Backups
    .route("/backups", get(backups::list).post(backups::create))
    .route("/backups/upload", post(backups::upload))
    .route("/backups/sync", post(backups::sync))
    .route("/backups/stats", get(backups::stats))
    .route("/backups/{id}", delete(backups::delete_one))
    .route("/backups/{id}/download", get(backups::download))
    // Archive
    .route("/archive/stats", get(archive::stats))
    .layer(DefaultBodyLimit::max(MAX_ARTIFACT_BYTES as usize))
    .with_state(state)
}

// ─── Integration tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use qms_backup::snapshot::SQLITE_MAGIC;
  use qms_core::artifact::{ArtifactKind, BackupArtifact};
  use qms_core::audit::AuditAction;
  use qms_core::catalog::{CatalogStats, SyncReport};
  use qms_core::records::ArchivableCounts;
  use tempfile::TempDir;
  use tower::ServiceExt as _;
  use uuid::Uuid;

  async fn make_state(dir: &TempDir) -> AppState {
    let db_path = dir.path().join("live.sqlite3");
    let store = SqliteStore::open(&db_path).await.unwrap();
    let backup =
      BackupConfig::without_waits(db_path, dir.path().join("backups"));
    AppState::new(store, backup)
  }

  async fn oneshot_raw(
    state:   AppState,
    method:  &str,
    uri:     &str,
    headers: Vec<(header::HeaderName, &str)>,
    body:    Body,
  ) -> axum::response::Response {
    let mut builder = Request::builder().method(method).uri(uri);
    for (k, v) in headers {
      builder = builder.header(k, v);
    }
    let req = builder.body(body).unwrap();
    api_router(state).oneshot(req).await.unwrap()
  }

  async fn json_body<T: serde::de::DeserializeOwned>(resp: axum::response::Response) -> T {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
  }

  // ── List / create ───────────────────────────────────────────────────────────

  #[tokio::test]
  async fn list_on_empty_catalog_returns_empty_array() {
    let dir = TempDir::new().unwrap();
    let state = make_state(&dir).await;

    let resp = oneshot_raw(state, "GET", "/backups", vec![], Body::empty()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let artifacts: Vec<BackupArtifact> = json_body(resp).await;
    assert!(artifacts.is_empty());
  }

  #[tokio::test]
  async fn create_captures_registers_and_audits() {
    let dir = TempDir::new().unwrap();
    let state = make_state(&dir).await;
    let actor = Uuid::new_v4();
    let actor_header = actor.to_string();

    let resp = oneshot_raw(
      state.clone(),
      "POST",
      "/backups",
      vec![(header::HeaderName::from_static("x-actor-id"), actor_header.as_str())],
      Body::empty(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let artifact: BackupArtifact = json_body(resp).await;
    assert_eq!(artifact.kind, ArtifactKind::Manual);
    assert_eq!(artifact.initiated_by, Some(actor));
    assert!(std::path::Path::new(&artifact.storage_path).exists());

    let store = state.store.read().await;
    let entries = store.recent_audit_entries(10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, AuditAction::Capture);
    assert_eq!(entries[0].actor, Some(actor));
  }

  #[tokio::test]
  async fn list_filters_by_kind() {
    let dir = TempDir::new().unwrap();
    let state = make_state(&dir).await;

    oneshot_raw(state.clone(), "POST", "/backups", vec![], Body::empty()).await;

    let resp =
      oneshot_raw(state.clone(), "GET", "/backups?kind=manual", vec![], Body::empty()).await;
    let manual: Vec<BackupArtifact> = json_body(resp).await;
    assert_eq!(manual.len(), 1);

    let resp =
      oneshot_raw(state, "GET", "/backups?kind=scheduled", vec![], Body::empty()).await;
    let scheduled: Vec<BackupArtifact> = json_body(resp).await;
    assert!(scheduled.is_empty());
  }

  // ── Download ────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn download_returns_artifact_bytes() {
    let dir = TempDir::new().unwrap();
    let state = make_state(&dir).await;

    let resp = oneshot_raw(state.clone(), "POST", "/backups", vec![], Body::empty()).await;
    let artifact: BackupArtifact = json_body(resp).await;

    let resp = oneshot_raw(
      state,
      "GET",
      &format!("/backups/{}/download", artifact.artifact_id),
      vec![],
      Body::empty(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let disposition = resp
      .headers()
      .get(header::CONTENT_DISPOSITION)
      .unwrap()
      .to_str()
      .unwrap();
    assert!(disposition.contains(".sqlite3"), "disposition: {disposition}");
    let declared: u64 = resp
      .headers()
      .get(header::CONTENT_LENGTH)
      .unwrap()
      .to_str()
      .unwrap()
      .parse()
      .unwrap();

    // The streamed body delivers exactly the declared number of bytes.
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(bytes.len() as u64, declared);
    assert_eq!(&bytes[..16], SQLITE_MAGIC);
  }

  #[tokio::test]
  async fn download_unknown_id_returns_404() {
    let dir = TempDir::new().unwrap();
    let state = make_state(&dir).await;

    let resp = oneshot_raw(
      state,
      "GET",
      &format!("/backups/{}/download", Uuid::new_v4()),
      vec![],
      Body::empty(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn download_orphaned_record_returns_404() {
    let dir = TempDir::new().unwrap();
    let state = make_state(&dir).await;

    let resp = oneshot_raw(state.clone(), "POST", "/backups", vec![], Body::empty()).await;
    let artifact: BackupArtifact = json_body(resp).await;
    tokio::fs::remove_file(&artifact.storage_path).await.unwrap();

    let resp = oneshot_raw(
      state,
      "GET",
      &format!("/backups/{}/download", artifact.artifact_id),
      vec![],
      Body::empty(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
  }

  // ── Delete ──────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn delete_removes_file_and_record() {
    let dir = TempDir::new().unwrap();
    let state = make_state(&dir).await;

    let resp = oneshot_raw(state.clone(), "POST", "/backups", vec![], Body::empty()).await;
    let artifact: BackupArtifact = json_body(resp).await;

    let resp = oneshot_raw(
      state.clone(),
      "DELETE",
      &format!("/backups/{}", artifact.artifact_id),
      vec![],
      Body::empty(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(!std::path::Path::new(&artifact.storage_path).exists());

    let resp = oneshot_raw(state, "GET", "/backups", vec![], Body::empty()).await;
    let remaining: Vec<BackupArtifact> = json_body(resp).await;
    assert!(remaining.is_empty());
  }

  #[tokio::test]
  async fn delete_unknown_id_returns_404() {
    let dir = TempDir::new().unwrap();
    let state = make_state(&dir).await;

    let resp = oneshot_raw(
      state,
      "DELETE",
      &format!("/backups/{}", Uuid::new_v4()),
      vec![],
      Body::empty(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
  }

  // ── Upload + restore ────────────────────────────────────────────────────────

  #[tokio::test]
  async fn upload_invalid_file_returns_400_and_mutates_nothing() {
    let dir = TempDir::new().unwrap();
    let state = make_state(&dir).await;

    let resp = oneshot_raw(
      state.clone(),
      "POST",
      "/backups/upload",
      vec![],
      Body::from("definitely not a database"),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = json_body(resp).await;
    assert!(body["error"].as_str().unwrap().contains("SQLite"));

    // Nothing was catalogued and no staging file was left behind.
    let resp = oneshot_raw(state.clone(), "GET", "/backups", vec![], Body::empty()).await;
    let artifacts: Vec<BackupArtifact> = json_body(resp).await;
    assert!(artifacts.is_empty());
    let mut entries = tokio::fs::read_dir(&state.backup.backup_dir).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
  }

  #[tokio::test]
  async fn upload_valid_artifact_catalogues_and_restores() {
    let dir = TempDir::new().unwrap();
    let state = make_state(&dir).await;

    // A structurally valid SQLite file: copy the live database itself.
    let upload = tokio::fs::read(&state.backup.db_path).await.unwrap();

    let resp = oneshot_raw(
      state.clone(),
      "POST",
      "/backups/upload",
      vec![],
      Body::from(upload),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let artifact: BackupArtifact = json_body(resp).await;
    assert_eq!(artifact.kind, ArtifactKind::Manual);
    assert!(std::path::Path::new(&artifact.storage_path).exists());

    // The store was reopened after the restore and still answers queries.
    let store = state.store.read().await;
    let entries = store.recent_audit_entries(10).await.unwrap();
    assert!(entries.iter().any(|e| e.action == AuditAction::Restore));
  }

  // ── Sync + stats ────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn sync_repairs_catalog_drift() {
    let dir = TempDir::new().unwrap();
    let state = make_state(&dir).await;

    let resp = oneshot_raw(state.clone(), "POST", "/backups", vec![], Body::empty()).await;
    let artifact: BackupArtifact = json_body(resp).await;
    tokio::fs::remove_file(&artifact.storage_path).await.unwrap();

    let resp = oneshot_raw(state, "POST", "/backups/sync", vec![], Body::empty()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let report: SyncReport = json_body(resp).await;
    assert_eq!(report.orphaned_records_deleted, 1);
  }

  #[tokio::test]
  async fn stats_reflects_catalog_state() {
    let dir = TempDir::new().unwrap();
    let state = make_state(&dir).await;

    oneshot_raw(state.clone(), "POST", "/backups", vec![], Body::empty()).await;

    let resp = oneshot_raw(state, "GET", "/backups/stats", vec![], Body::empty()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let stats: CatalogStats = json_body(resp).await;
    assert_eq!(stats.total_artifacts, 1);
    assert_eq!(stats.manual_artifacts, 1);
    assert_eq!(stats.total_files_on_disk, 1);
    assert!(stats.is_synced);
  }

  // ── Archive stats ───────────────────────────────────────────────────────────

  #[tokio::test]
  async fn archive_stats_counts_without_deleting() {
    let dir = TempDir::new().unwrap();
    let state = make_state(&dir).await;

    {
      let store = state.store.read().await;
      store
        .add_performance_record("decade old", chrono::Utc::now() - chrono::Duration::days(3650))
        .await
        .unwrap();
    }

    let resp = oneshot_raw(state.clone(), "GET", "/archive/stats", vec![], Body::empty()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let counts: ArchivableCounts = json_body(resp).await;
    assert_eq!(counts.performance_records, 1);

    // Still counted on a second read.
    let resp = oneshot_raw(state, "GET", "/archive/stats", vec![], Body::empty()).await;
    let counts: ArchivableCounts = json_body(resp).await;
    assert_eq!(counts.performance_records, 1);
  }
}
