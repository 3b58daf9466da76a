//! Handlers for `/aliases` and `/resolve`.

use axum::{
  Json,
  extract::{Path, Query, State},
};
use marquee_core::store::CatalogStore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppState, error::ApiError};

#[derive(Debug, Serialize, Deserialize)]
pub struct IdentityRef {
  pub identity_id: Uuid,
}

/// `POST /aliases/{id}/unlink` returns the new identity's id.
pub async fn unlink<S>(
  State(state): State<AppState<S>>,
  Path(alias_id): Path<Uuid>,
) -> Result<Json<IdentityRef>, ApiError>
where
  S: CatalogStore + 'static,
{
  let identity_id = state
    .service
    .unlink(alias_id)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(IdentityRef { identity_id }))
}

#[derive(Debug, Deserialize)]
pub struct ResolveParams {
  pub name: String,
}

/// `GET /resolve?name=<alias>`
pub async fn resolve<S>(
  State(state): State<AppState<S>>,
  Query(params): Query<ResolveParams>,
) -> Result<Json<IdentityRef>, ApiError>
where
  S: CatalogStore + 'static,
{
  if params.name.trim().is_empty() {
    return Err(ApiError::BadRequest("name must not be empty".into()));
  }
  let identity_id = state
    .service
    .resolve(&params.name)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("no identity is named {:?}", params.name)))?;
  Ok(Json(IdentityRef { identity_id }))
}
