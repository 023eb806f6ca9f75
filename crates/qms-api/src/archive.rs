//! Handlers for `/archive` endpoints.

use axum::{Json, extract::State};
use qms_backup::retention;
use qms_core::records::ArchivableCounts;

use crate::{AppState, error::ApiError};

/// `GET /archive/stats` — rows past their retention windows, counted
/// without deleting anything.
pub async fn stats(State(state): State<AppState>) -> Result<Json<ArchivableCounts>, ApiError> {
  let store = state.store.read().await;
  let counts = retention::archivable_counts(&*store)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(counts))
}
