//! Handlers for `/backups` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/backups` | Optional `?kind=scheduled\|manual` and `?initiated_by=<uuid>` |
//! | `POST`   | `/backups` | Manual capture; `X-Actor-Id` header attributes it |
//! | `GET`    | `/backups/:id/download` | 404 if the record or its file is gone |
//! | `DELETE` | `/backups/:id` | Removes the file and the catalog entry |
//! | `POST`   | `/backups/upload` | Raw body; validate, catalogue, restore |
//! | `POST`   | `/backups/sync` | Run reconciliation |
//! | `GET`    | `/backups/stats` | Catalog/filesystem health |

use axum::{
  Json,
  body::Body,
  extract::{Path, Query, State},
  http::{HeaderMap, StatusCode, header},
  response::IntoResponse,
};
use bytes::Bytes;
use qms_backup::{SnapshotEngine, SyncEngine, validate_artifact};
use qms_core::{
  artifact::{ArtifactKind, BackupArtifact, NewArtifact},
  audit::{AuditAction, NewAuditEntry},
  catalog::{ArtifactCatalog, ArtifactQuery, CatalogStats, SyncReport},
  records::RecordStore,
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::{AppState, error::ApiError};

/// Origin recorded when the client address cannot be determined.
const API_ORIGIN: &str = "api";

/// The acting user, from the `X-Actor-Id` header if present and parseable.
fn actor_from(headers: &HeaderMap) -> Option<Uuid> {
  headers
    .get("x-actor-id")
    .and_then(|v| v.to_str().ok())
    .and_then(|s| Uuid::parse_str(s).ok())
}

/// Client origin for audit entries: the first `X-Forwarded-For` hop when a
/// proxy supplies one, otherwise a fixed marker.
fn origin_from(headers: &HeaderMap) -> String {
  headers
    .get("x-forwarded-for")
    .and_then(|v| v.to_str().ok())
    .and_then(|s| s.split(',').next())
    .map(|s| s.trim().to_string())
    .filter(|s| !s.is_empty())
    .unwrap_or_else(|| API_ORIGIN.to_string())
}

fn audit_entry(
  headers: &HeaderMap,
  action: AuditAction,
  target: Option<String>,
  detail: impl Into<String>,
) -> NewAuditEntry {
  NewAuditEntry {
    actor: actor_from(headers),
    action,
    target,
    detail: detail.into(),
    origin: origin_from(headers),
  }
}

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub kind:         Option<ArtifactKind>,
  pub initiated_by: Option<Uuid>,
}

/// `GET /backups[?kind=<kind>][&initiated_by=<uuid>]`
pub async fn list(
  State(state): State<AppState>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<BackupArtifact>>, ApiError> {
  let store = state.store.read().await;
  let artifacts = store
    .list_artifacts(ArtifactQuery {
      kind:         params.kind,
      initiated_by: params.initiated_by,
    })
    .await
    .map_err(ApiError::store)?;
  Ok(Json(artifacts))
}

// ─── Create (manual capture) ─────────────────────────────────────────────────

/// `POST /backups` — capture the live database as a manual backup.
pub async fn create(
  State(state): State<AppState>,
  headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
  let actor = actor_from(&headers);

  let snap = SnapshotEngine::new(&state.backup)
    .capture(ArtifactKind::Manual, actor)
    .await?;

  let store = state.store.read().await;
  let artifact = store
    .add_artifact(NewArtifact {
      size_bytes:   snap.size_bytes,
      kind:         ArtifactKind::Manual,
      storage_path: snap.path.to_string_lossy().into_owned(),
      initiated_by: actor,
      note:         String::new(),
    })
    .await
    .map_err(ApiError::store)?;

  let entry = audit_entry(
    &headers,
    AuditAction::Capture,
    Some(artifact.artifact_id.to_string()),
    format!("manual backup captured ({} bytes)", snap.size_bytes),
  );
  if let Err(e) = store.append_audit(entry).await {
    tracing::warn!(error = %e, "failed to audit manual backup");
  }

  Ok((StatusCode::CREATED, Json(artifact)))
}

// ─── Download ────────────────────────────────────────────────────────────────

/// `GET /backups/:id/download`
///
/// The body is streamed from disk rather than buffered — artifacts can run
/// up to the 1 GiB upload limit.
pub async fn download(
  State(state): State<AppState>,
  Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
  let artifact = {
    let store = state.store.read().await;
    store
      .get_artifact(id)
      .await
      .map_err(ApiError::store)?
      .ok_or_else(|| ApiError::NotFound(format!("backup {id} not found")))?
  };

  let file = tokio::fs::File::open(&artifact.storage_path)
    .await
    .map_err(|_| ApiError::NotFound(format!("backup file for {id} is missing on disk")))?;
  let size = file.metadata().await.map_err(ApiError::store)?.len();

  let file_name = std::path::Path::new(&artifact.storage_path)
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| format!("{id}.sqlite3"));

  Ok((
    [
      (header::CONTENT_TYPE, "application/octet-stream".to_string()),
      (header::CONTENT_LENGTH, size.to_string()),
      (
        header::CONTENT_DISPOSITION,
        format!("attachment; filename=\"{file_name}\""),
      ),
    ],
    Body::from_stream(ReaderStream::new(file)),
  ))
}

// ─── Delete ──────────────────────────────────────────────────────────────────

/// `DELETE /backups/:id`
pub async fn delete_one(
  State(state): State<AppState>,
  Path(id): Path<Uuid>,
  headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
  let store = state.store.read().await;

  let artifact = store
    .get_artifact(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("backup {id} not found")))?;

  // An already-missing file is fine — the record is the orphan then.
  match tokio::fs::remove_file(&artifact.storage_path).await {
    Ok(()) => {}
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
      tracing::warn!(path = %artifact.storage_path, "backup file already gone");
    }
    Err(e) => return Err(ApiError::store(e)),
  }

  store.delete_artifact(id).await.map_err(ApiError::store)?;

  let entry = audit_entry(
    &headers,
    AuditAction::DeleteArtifact,
    Some(id.to_string()),
    format!("backup deleted ({})", artifact.storage_path),
  );
  if let Err(e) = store.append_audit(entry).await {
    tracing::warn!(error = %e, "failed to audit backup deletion");
  }

  Ok(StatusCode::NO_CONTENT)
}

// ─── Upload + restore ────────────────────────────────────────────────────────

/// `POST /backups/upload` — raw artifact bytes in the body.
///
/// The body is staged to a temp file and validated before anything is
/// mutated; a validation failure returns 400 with the reason and removes
/// the staging file. On success the file is adopted into the backup
/// directory, catalogued, and restored into place. The catalog entry is
/// written before the restore and so does not survive it — the next
/// reconciliation run re-registers the file.
pub async fn upload(
  State(state): State<AppState>,
  headers: HeaderMap,
  body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
  let actor = actor_from(&headers);
  if body.is_empty() {
    return Err(ApiError::BadRequest("empty upload body".to_string()));
  }

  tokio::fs::create_dir_all(&state.backup.backup_dir)
    .await
    .map_err(|e| ApiError::BadRequest(format!("cannot create backup directory: {e}")))?;

  let staged = state
    .backup
    .backup_dir
    .join(format!("temp_upload_{}.sqlite3", Uuid::new_v4().simple()));
  tokio::fs::write(&staged, &body)
    .await
    .map_err(|e| ApiError::BadRequest(format!("cannot stage upload: {e}")))?;

  if let Err(e) = validate_artifact(&staged).await {
    if let Err(cleanup) = tokio::fs::remove_file(&staged).await {
      tracing::warn!(path = %staged.display(), error = %cleanup, "failed to remove rejected upload");
    }
    return Err(ApiError::InvalidArtifact(e));
  }

  let snap = SnapshotEngine::new(&state.backup).adopt(&staged).await?;

  let artifact = {
    let store = state.store.read().await;
    store
      .add_artifact(NewArtifact {
        size_bytes:   snap.size_bytes,
        kind:         ArtifactKind::Manual,
        storage_path: snap.path.to_string_lossy().into_owned(),
        initiated_by: actor,
        note:         "uploaded via api".to_string(),
      })
      .await
      .map_err(ApiError::store)?
  };

  state.restore_from(&snap.path).await?;

  // The store behind the lock is the reopened, post-restore one.
  let store = state.store.read().await;
  let entry = audit_entry(
    &headers,
    AuditAction::Restore,
    Some(artifact.artifact_id.to_string()),
    format!("database restored from uploaded backup ({} bytes)", snap.size_bytes),
  );
  if let Err(e) = store.append_audit(entry).await {
    tracing::warn!(error = %e, "failed to audit restore");
  }

  Ok((StatusCode::CREATED, Json(artifact)))
}

// ─── Sync ────────────────────────────────────────────────────────────────────

/// `POST /backups/sync`
pub async fn sync(
  State(state): State<AppState>,
  headers: HeaderMap,
) -> Result<Json<SyncReport>, ApiError> {
  let store = state.store.read().await;

  let report = SyncEngine::new(&state.backup.backup_dir).sync(&*store).await;

  let entry = audit_entry(
    &headers,
    AuditAction::Sync,
    None,
    format!(
      "reconciliation: {} records deleted, {} files registered",
      report.orphaned_records_deleted, report.orphaned_files_registered
    ),
  );
  if let Err(e) = store.append_audit(entry).await {
    tracing::warn!(error = %e, "failed to audit reconciliation");
  }

  Ok(Json(report))
}

// ─── Stats ───────────────────────────────────────────────────────────────────

/// `GET /backups/stats`
pub async fn stats(State(state): State<AppState>) -> Result<Json<CatalogStats>, ApiError> {
  let store = state.store.read().await;
  let stats = SyncEngine::new(&state.backup.backup_dir)
    .stats(&*store)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(stats))
}
