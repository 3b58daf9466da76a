//! [`IdentityService`] is the entry point for UI and import collaborators.
//!
//! The service decides transaction boundaries: each public method is one
//! user action and gets its own batch, so it can be undone as a unit.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
  audit::{BatchId, UndoReport},
  error::{Classify, UndoError},
  identity::{Alias, Credit, Identity, IdentityKind, Membership, MergeOutcome},
  store::CatalogStore,
};

const TRANSIENT_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Facade over a [`CatalogStore`].
pub struct IdentityService<S> {
  store: Arc<S>,
}

impl<S> Clone for IdentityService<S> {
  fn clone(&self) -> Self { Self { store: Arc::clone(&self.store) } }
}

impl<S> IdentityService<S>
where
  S: CatalogStore + 'static,
{
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  /// Direct access for read-only queries the facade does not wrap.
  pub fn store(&self) -> &Arc<S> { &self.store }

  pub async fn create_identity(
    &self,
    kind: IdentityKind,
    name: &str,
  ) -> Result<Identity, S::Error> {
    let batch = self.store.begin_batch();
    retry_transient(|| self.store.create_identity(kind, name.to_owned(), batch)).await
  }

  pub async fn add_alias(&self, identity_id: Uuid, name: &str) -> Result<Alias, S::Error> {
    let batch = self.store.begin_batch();
    retry_transient(|| self.store.add_alias(identity_id, name.to_owned(), batch)).await
  }

  pub async fn add_membership(
    &self,
    member_id: Uuid,
    group_id: Uuid,
  ) -> Result<Membership, S::Error> {
    let batch = self.store.begin_batch();
    retry_transient(|| self.store.add_membership(member_id, group_id, batch)).await
  }

  pub async fn add_credit(
    &self,
    source_id: Uuid,
    identity_id: Uuid,
    role_id: &str,
  ) -> Result<Credit, S::Error> {
    let batch = self.store.begin_batch();
    retry_transient(|| {
      self
        .store
        .add_credit(source_id, identity_id, role_id.to_owned(), batch)
    })
    .await
  }

  pub async fn delete_identity(&self, id: Uuid) -> Result<(), S::Error> {
    let batch = self.store.begin_batch();
    retry_transient(|| self.store.delete_identity(id, batch)).await
  }

  /// Absorb `source_id` into `target_id`.
  pub async fn merge(
    &self,
    source_id: Uuid,
    target_id: Uuid,
  ) -> Result<MergeOutcome, S::Error> {
    let batch = self.store.begin_batch();
    retry_transient(|| self.store.merge(source_id, target_id, batch)).await
  }

  /// Detach an alias into a new identity of the owner's kind and return
  /// that identity's id.
  pub async fn unlink(&self, alias_id: Uuid) -> Result<Uuid, S::Error> {
    let batch = self.store.begin_batch();
    let outcome =
      retry_transient(|| self.store.unlink_alias(alias_id, None, batch)).await?;
    if let Some(orphan) = outcome.orphaned {
      warn!(identity = %orphan, %batch, "unlink left identity without any alias");
    }
    Ok(outcome.new_identity)
  }

  pub async fn resolve(&self, name: &str) -> Result<Option<Uuid>, S::Error> {
    self.store.resolve(name.to_owned()).await
  }

  /// Undo the most recent user action that has not been undone yet.
  pub async fn undo_last_action(&self) -> Result<UndoReport, S::Error> {
    let batch = self
      .store
      .last_undoable_batch()
      .await?
      .ok_or(UndoError::NothingToUndo)?;
    self.store.undo(batch).await
  }

  /// Bring a row back out of the recycle bin.
  pub async fn restore(&self, deleted_id: i64) -> Result<(), S::Error> {
    let batch = self.store.begin_batch();
    self.store.restore(deleted_id, batch).await
  }

  /// Run `pairs` of `(source, target)` merges as one batch on a background
  /// task. The returned job can cancel the batch and await its result.
  pub fn spawn_bulk_merge(&self, pairs: Vec<(Uuid, Uuid)>) -> BulkMergeJob<S::Error> {
    let store = Arc::clone(&self.store);
    let batch = store.begin_batch();
    let cancel = CancellationToken::new();
    let job_cancel = cancel.clone();
    let (done_tx, done_rx) = oneshot::channel();

    tokio::spawn(async move {
      let count = pairs.len();
      let result = store.bulk_merge(pairs, batch, job_cancel).await;
      match &result {
        Ok(_) => info!(%batch, merges = count, "bulk merge committed"),
        Err(e) => warn!(%batch, error = %e, "bulk merge rolled back"),
      }
      // The caller may have dropped the job; the batch outcome stands.
      let _ = done_tx.send(result);
    });

    BulkMergeJob { batch, cancel, done: done_rx }
  }
}

// ─── Bulk jobs ───────────────────────────────────────────────────────────────

/// Handle to a background bulk merge.
pub struct BulkMergeJob<E> {
  batch:  BatchId,
  cancel: CancellationToken,
  done:   oneshot::Receiver<Result<Vec<MergeOutcome>, E>>,
}

impl<E> BulkMergeJob<E> {
  pub fn batch(&self) -> BatchId { self.batch }

  /// Request cancellation. Has no effect once the batch has committed.
  pub fn cancel(&self) { self.cancel.cancel() }

  /// Wait for the job to finish. `None` if the task died without reporting.
  pub async fn wait(self) -> Option<Result<Vec<MergeOutcome>, E>> { self.done.await.ok() }
}

// ─── Retry ───────────────────────────────────────────────────────────────────

/// Re-run `op` while it fails with a transient storage error. Each attempt
/// is a whole transaction, so a failed one has left nothing behind.
async fn retry_transient<T, E, F, Fut>(mut op: F) -> Result<T, E>
where
  E: Classify + std::fmt::Display,
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, E>>,
{
  let mut attempt = 1;
  loop {
    match op().await {
      Err(e) if e.is_transient() && attempt < TRANSIENT_RETRIES => {
        warn!(attempt, error = %e, "transient storage error, retrying");
        tokio::time::sleep(RETRY_BACKOFF * attempt).await;
        attempt += 1;
      }
      other => return other,
    }
  }
}
