//! JSON HTTP API for the Marquee catalog.
//!
//! Exposes an axum [`Router`] over an [`IdentityService`] backed by any
//! [`CatalogStore`]. Every request that writes is one user action and so one
//! undoable batch.

pub mod aliases;
pub mod batches;
pub mod error;
pub mod identities;

pub use error::ApiError;

use std::{path::PathBuf, sync::Arc};

use axum::{
  Router,
  routing::{get, post},
};
use marquee_core::{config::CatalogConfig, service::IdentityService, store::CatalogStore};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `MARQUEE_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
  pub host:       String,
  pub port:       u16,
  pub store_path: PathBuf,
  pub catalog:    CatalogConfig,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:       "127.0.0.1".to_string(),
      port:       7171,
      store_path: PathBuf::from("~/.local/share/marquee/catalog.db"),
      catalog:    CatalogConfig::default(),
    }
  }
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<S> {
  pub service: IdentityService<S>,
  pub config:  Arc<ServerConfig>,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self {
      service: self.service.clone(),
      config:  Arc::clone(&self.config),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the API router.
pub fn router<S>(state: AppState<S>) -> Router
where
  S: CatalogStore + 'static,
{
  Router::new()
    .route("/identities",                get(identities::list::<S>).post(identities::create::<S>))
    .route("/identities/{id}",           get(identities::get_one::<S>))
    .route("/identities/{id}/aliases",   post(identities::add_alias::<S>))
    .route("/identities/{id}/merge",     post(identities::merge::<S>))
    .route("/aliases/{id}/unlink",       post(aliases::unlink::<S>))
    .route("/resolve",                   get(aliases::resolve::<S>))
    .route("/undo",                      post(batches::undo_last::<S>))
    .route("/batches",                   get(batches::list::<S>))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}
