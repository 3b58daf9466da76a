//! Handlers for `/identities` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/identities` | Optional `?kind=person\|group` |
//! | `POST` | `/identities` | Body: `{"kind":"person","name":"Freddie"}`; `kind` is optional |
//! | `GET`  | `/identities/{id}` | 404 if not found |
//! | `POST` | `/identities/{id}/aliases` | Body: `{"name":"Freddie Mercury"}` |
//! | `POST` | `/identities/{id}/merge` | Body: `{"target":"<uuid>"}` |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use marquee_core::{
  identity::{Identity, IdentityKind, MergeOutcome},
  store::CatalogStore,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{AppState, error::ApiError};

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub kind: Option<IdentityKind>,
}

/// `GET /identities[?kind=<kind>]`
pub async fn list<S>(
  State(state): State<AppState<S>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Identity>>, ApiError>
where
  S: CatalogStore + 'static,
{
  let identities = state
    .service
    .store()
    .list_identities(params.kind)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(identities))
}

// ─── Create ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateBody {
  pub kind: Option<IdentityKind>,
  pub name: String,
}

/// `POST /identities`
pub async fn create<S>(
  State(state): State<AppState<S>>,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: CatalogStore + 'static,
{
  let kind = body.kind.unwrap_or(state.config.catalog.default_kind);
  let identity = state
    .service
    .create_identity(kind, &body.name)
    .await
    .map_err(ApiError::store)?;
  Ok((StatusCode::CREATED, Json(identity)))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /identities/{id}`
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Identity>, ApiError>
where
  S: CatalogStore + 'static,
{
  let identity = state
    .service
    .store()
    .get_identity(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("identity {id} not found")))?;
  Ok(Json(identity))
}

// ─── Aliases ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AliasBody {
  pub name: String,
}

/// `POST /identities/{id}/aliases`
pub async fn add_alias<S>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
  Json(body): Json<AliasBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: CatalogStore + 'static,
{
  let alias = state
    .service
    .add_alias(id, &body.name)
    .await
    .map_err(ApiError::store)?;
  Ok((StatusCode::CREATED, Json(alias)))
}

// ─── Merge ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MergeBody {
  pub target: Uuid,
}

/// `POST /identities/{id}/merge` merges `{id}` into the body's target.
pub async fn merge<S>(
  State(state): State<AppState<S>>,
  Path(source): Path<Uuid>,
  Json(body): Json<MergeBody>,
) -> Result<Json<MergeOutcome>, ApiError>
where
  S: CatalogStore + 'static,
{
  let outcome = state
    .service
    .merge(source, body.target)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(outcome))
}
