//! Handlers for undo and the batch history.

use axum::{
  Json,
  extract::{Query, State},
};
use marquee_core::{
  audit::{Batch, UndoReport},
  store::CatalogStore,
};
use serde::Deserialize;

use crate::{AppState, error::ApiError};

/// `POST /undo` reverses the most recent action.
pub async fn undo_last<S>(State(state): State<AppState<S>>) -> Result<Json<UndoReport>, ApiError>
where
  S: CatalogStore + 'static,
{
  let report = state
    .service
    .undo_last_action()
    .await
    .map_err(ApiError::store)?;
  Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub limit: Option<usize>,
}

/// `GET /batches[?limit=<n>]`, newest first.
pub async fn list<S>(
  State(state): State<AppState<S>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Batch>>, ApiError>
where
  S: CatalogStore + 'static,
{
  let limit = params
    .limit
    .unwrap_or(state.config.catalog.batch_page_size);
  let batches = state
    .service
    .store()
    .list_batches(limit)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(batches))
}
