//! Integration tests for `SqliteStore` against an in-memory database.

use std::sync::Arc;

use marquee_core::{
  Classify, ErrorKind, UndoError, ValidationError,
  audit::{BatchKind, ChangeKind, StepOutcome, UndoAction},
  config::CatalogConfig,
  identity::{Identity, IdentityKind},
  service::IdentityService,
  store::CatalogStore,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory(CatalogConfig::default())
    .await
    .expect("in-memory store")
}

async fn person(s: &SqliteStore, name: &str) -> Identity {
  s.create_identity(IdentityKind::Person, name.into(), s.begin_batch())
    .await
    .unwrap()
}

async fn group(s: &SqliteStore, name: &str) -> Identity {
  s.create_identity(IdentityKind::Group, name.into(), s.begin_batch())
    .await
    .unwrap()
}

fn validation(err: Error) -> ValidationError {
  match err {
    Error::Validation(v) => v,
    other => panic!("expected validation error, got {other:?}"),
  }
}

fn undo_error(err: Error) -> UndoError {
  match err {
    Error::Undo(u) => u,
    other => panic!("expected undo error, got {other:?}"),
  }
}

// ─── Identities and aliases ──────────────────────────────────────────────────

#[tokio::test]
async fn create_identity_owns_its_name() {
  let s = store().await;
  let freddie = person(&s, "  Freddie ").await;
  assert_eq!(freddie.name, "Freddie");

  let aliases = s.aliases_of(freddie.identity_id).await.unwrap();
  assert_eq!(aliases.len(), 1);
  assert_eq!(aliases[0].name, "Freddie");
  assert_eq!(
    s.resolve("FREDDIE".into()).await.unwrap(),
    Some(freddie.identity_id)
  );
}

#[tokio::test]
async fn empty_name_is_rejected() {
  let s = store().await;
  let err = s
    .create_identity(IdentityKind::Person, "   ".into(), s.begin_batch())
    .await
    .unwrap_err();
  assert_eq!(validation(err), ValidationError::EmptyName);
  assert!(s.list_batches(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn add_alias_is_idempotent_for_its_owner() {
  let s = store().await;
  let freddie = person(&s, "Freddie").await;

  let first = s
    .add_alias(freddie.identity_id, "Freddie Mercury".into(), s.begin_batch())
    .await
    .unwrap();
  let batches_before = s.list_batches(100).await.unwrap().len();

  let again = s
    .add_alias(freddie.identity_id, "freddie  mercury".into(), s.begin_batch())
    .await
    .unwrap();
  assert_eq!(first.alias_id, again.alias_id);
  // The no-op wrote nothing, so it left no batch behind.
  assert_eq!(s.list_batches(100).await.unwrap().len(), batches_before);
}

#[tokio::test]
async fn alias_owned_elsewhere_is_rejected() {
  let s = store().await;
  let freddie = person(&s, "Freddie").await;
  let brian = person(&s, "Brian").await;

  let err = s
    .add_alias(brian.identity_id, "freddie".into(), s.begin_batch())
    .await
    .unwrap_err();
  assert_eq!(
    validation(err),
    ValidationError::AliasTaken {
      name:  "freddie".into(),
      owner: freddie.identity_id,
    }
  );
}

#[tokio::test]
async fn list_identities_filtered_by_kind() {
  let s = store().await;
  person(&s, "Freddie").await;
  person(&s, "Brian").await;
  group(&s, "Queen").await;

  assert_eq!(s.list_identities(None).await.unwrap().len(), 3);
  let groups = s.list_identities(Some(IdentityKind::Group)).await.unwrap();
  assert_eq!(groups.len(), 1);
  assert_eq!(groups[0].name, "Queen");
}

// ─── Memberships and credits ─────────────────────────────────────────────────

#[tokio::test]
async fn membership_requires_a_group() {
  let s = store().await;
  let freddie = person(&s, "Freddie").await;
  let brian = person(&s, "Brian").await;

  let err = s
    .add_membership(freddie.identity_id, brian.identity_id, s.begin_batch())
    .await
    .unwrap_err();
  assert_eq!(validation(err), ValidationError::NotAGroup(brian.identity_id));
}

#[tokio::test]
async fn membership_cycles_are_rejected() {
  let s = store().await;
  let p1 = person(&s, "P1").await;
  let g1 = group(&s, "G1").await;
  let g2 = group(&s, "G2").await;
  let g3 = group(&s, "G3").await;

  s.add_membership(p1.identity_id, g1.identity_id, s.begin_batch())
    .await
    .unwrap();
  s.add_membership(g1.identity_id, g2.identity_id, s.begin_batch())
    .await
    .unwrap();
  s.add_membership(g2.identity_id, g3.identity_id, s.begin_batch())
    .await
    .unwrap();
  let before = s.graph_snapshot().await.unwrap();

  let err = s
    .add_membership(g1.identity_id, g1.identity_id, s.begin_batch())
    .await
    .unwrap_err();
  assert!(matches!(validation(err), ValidationError::Cycle { .. }));

  // G3 contains G1 through G2.
  let err = s
    .add_membership(g3.identity_id, g1.identity_id, s.begin_batch())
    .await
    .unwrap_err();
  assert_eq!(
    validation(err),
    ValidationError::Cycle {
      member: g3.identity_id,
      group:  g1.identity_id,
    }
  );

  assert_eq!(s.graph_snapshot().await.unwrap(), before);
}

#[tokio::test]
async fn add_membership_twice_returns_existing_edge() {
  let s = store().await;
  let freddie = person(&s, "Freddie").await;
  let queen = group(&s, "Queen").await;

  let a = s
    .add_membership(freddie.identity_id, queen.identity_id, s.begin_batch())
    .await
    .unwrap();
  let b = s
    .add_membership(freddie.identity_id, queen.identity_id, s.begin_batch())
    .await
    .unwrap();
  assert_eq!(a.membership_id, b.membership_id);
  assert_eq!(s.memberships_of(queen.identity_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn remove_membership_soft_deletes_the_edge() {
  let s = store().await;
  let freddie = person(&s, "Freddie").await;
  let queen = group(&s, "Queen").await;
  s.add_membership(freddie.identity_id, queen.identity_id, s.begin_batch())
    .await
    .unwrap();

  s.remove_membership(freddie.identity_id, queen.identity_id, s.begin_batch())
    .await
    .unwrap();
  assert!(s.memberships_of(freddie.identity_id).await.unwrap().is_empty());

  let deleted = s.list_deleted(false).await.unwrap();
  assert_eq!(deleted.len(), 1);
  assert_eq!(deleted[0].table, "memberships");

  let err = s
    .remove_membership(freddie.identity_id, queen.identity_id, s.begin_batch())
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn credits_validate_roles() {
  let s = store().await;
  let freddie = person(&s, "Freddie").await;
  let track = Uuid::new_v4();

  let err = s
    .add_credit(track, freddie.identity_id, "kazoo".into(), s.begin_batch())
    .await
    .unwrap_err();
  assert_eq!(validation(err), ValidationError::UnknownRole("kazoo".into()));

  let a = s
    .add_credit(track, freddie.identity_id, "performer".into(), s.begin_batch())
    .await
    .unwrap();
  let b = s
    .add_credit(track, freddie.identity_id, "performer".into(), s.begin_batch())
    .await
    .unwrap();
  assert_eq!(a.credit_id, b.credit_id);
  assert_eq!(s.credits_of(freddie.identity_id).await.unwrap().len(), 1);
}

// ─── Merge ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn merge_redirects_aliases_to_the_target() {
  let s = store().await;
  let freddie = person(&s, "Freddie").await;
  s.add_alias(freddie.identity_id, "Freddie Mercury".into(), s.begin_batch())
    .await
    .unwrap();
  let farrokh = person(&s, "Farrokh").await;
  s.add_alias(farrokh.identity_id, "Farrokh Bulsara".into(), s.begin_batch())
    .await
    .unwrap();

  let outcome = s
    .merge(farrokh.identity_id, freddie.identity_id, s.begin_batch())
    .await
    .unwrap();
  assert_eq!(outcome.aliases_moved, 2);

  assert_eq!(
    s.resolve("Farrokh Bulsara".into()).await.unwrap(),
    Some(freddie.identity_id)
  );
  assert!(s.get_identity(farrokh.identity_id).await.unwrap().is_none());

  let deleted = s.list_deleted(false).await.unwrap();
  assert!(
    deleted
      .iter()
      .any(|d| d.table == "identities" && d.record_id == farrokh.identity_id)
  );
  assert_eq!(
    s.resolve_id(farrokh.identity_id).await.unwrap(),
    Some(freddie.identity_id)
  );
}

#[tokio::test]
async fn merge_entries_share_one_batch() {
  let s = store().await;
  let a = person(&s, "A").await;
  let b = person(&s, "B").await;

  let batch = s.begin_batch();
  s.merge(a.identity_id, b.identity_id, batch).await.unwrap();

  let log = s.change_log(batch).await.unwrap();
  assert!(!log.is_empty());
  assert!(log.iter().all(|e| e.batch_id == batch));
  assert!(log.iter().all(|e| e.kind == ChangeKind::Update));

  let batches = s.list_batches(1).await.unwrap();
  assert_eq!(batches[0].batch_id, batch);
  assert_eq!(batches[0].kind, BatchKind::Action);
  assert_eq!(batches[0].label.as_deref(), Some("merge"));
}

#[tokio::test]
async fn merge_rejects_self_and_kind_mismatch() {
  let s = store().await;
  let freddie = person(&s, "Freddie").await;
  let queen = group(&s, "Queen").await;

  let batch = s.begin_batch();
  let err = s
    .merge(freddie.identity_id, freddie.identity_id, batch)
    .await
    .unwrap_err();
  assert_eq!(validation(err), ValidationError::SelfMerge);
  assert!(s.change_log(batch).await.unwrap().is_empty());
  assert!(s.get_batch(batch).await.unwrap().is_none());

  let err = s
    .merge(freddie.identity_id, queen.identity_id, s.begin_batch())
    .await
    .unwrap_err();
  assert!(matches!(validation(err), ValidationError::KindMismatch { .. }));
}

#[tokio::test]
async fn merging_twice_does_not_duplicate_aliases() {
  let s = store().await;
  let freddie = person(&s, "Freddie").await;
  let farrokh = person(&s, "Farrokh").await;
  s.add_alias(farrokh.identity_id, "Farrokh Bulsara".into(), s.begin_batch())
    .await
    .unwrap();

  s.merge(farrokh.identity_id, freddie.identity_id, s.begin_batch())
    .await
    .unwrap();
  let after_first = s.aliases_of(freddie.identity_id).await.unwrap();
  assert_eq!(after_first.len(), 3);

  let batch = s.begin_batch();
  let err = s
    .merge(farrokh.identity_id, freddie.identity_id, batch)
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NotFound);
  assert!(s.change_log(batch).await.unwrap().is_empty());
  assert_eq!(s.aliases_of(freddie.identity_id).await.unwrap(), after_first);
}

#[tokio::test]
async fn resolve_id_follows_merge_of_an_orphan() {
  let s = store().await;
  let freddie = person(&s, "Freddie").await;
  let ghost = person(&s, "Ghost").await;
  let alias = s.aliases_of(ghost.identity_id).await.unwrap().remove(0);
  let outcome = s
    .unlink_alias(alias.alias_id, None, s.begin_batch())
    .await
    .unwrap();
  assert_eq!(outcome.orphaned, Some(ghost.identity_id));

  let batch = s.begin_batch();
  let merged = s
    .merge(ghost.identity_id, freddie.identity_id, batch)
    .await
    .unwrap();
  assert_eq!(merged.aliases_moved, 0);
  assert_eq!(
    s.resolve_id(ghost.identity_id).await.unwrap(),
    Some(freddie.identity_id)
  );

  // Once the merge is undone the identity answers for itself again.
  s.undo(batch).await.unwrap();
  assert_eq!(
    s.resolve_id(ghost.identity_id).await.unwrap(),
    Some(ghost.identity_id)
  );
}

#[tokio::test]
async fn resolve_id_follows_chained_merges() {
  let s = store().await;
  let a = person(&s, "A").await;
  let b = person(&s, "B").await;
  let c = person(&s, "C").await;

  s.merge(a.identity_id, b.identity_id, s.begin_batch())
    .await
    .unwrap();
  s.merge(b.identity_id, c.identity_id, s.begin_batch())
    .await
    .unwrap();
  assert_eq!(s.resolve_id(a.identity_id).await.unwrap(), Some(c.identity_id));
}

#[tokio::test]
async fn merge_drops_duplicate_edges() {
  let s = store().await;
  let queen = group(&s, "Queen").await;
  let freddie = person(&s, "Freddie").await;
  let farrokh = person(&s, "Farrokh").await;
  let track = Uuid::new_v4();

  for id in [freddie.identity_id, farrokh.identity_id] {
    s.add_membership(id, queen.identity_id, s.begin_batch())
      .await
      .unwrap();
    s.add_credit(track, id, "performer".into(), s.begin_batch())
      .await
      .unwrap();
  }
  s.add_credit(track, farrokh.identity_id, "composer".into(), s.begin_batch())
    .await
    .unwrap();

  let outcome = s
    .merge(farrokh.identity_id, freddie.identity_id, s.begin_batch())
    .await
    .unwrap();
  assert_eq!(outcome.memberships_moved, 0);
  assert_eq!(outcome.credits_moved, 1);
  assert_eq!(outcome.duplicates_dropped, 2);

  assert_eq!(s.memberships_of(queen.identity_id).await.unwrap().len(), 1);
  let credits = s.credits_of(freddie.identity_id).await.unwrap();
  assert_eq!(credits.len(), 2);
}

#[tokio::test]
async fn merge_that_would_close_a_cycle_changes_nothing() {
  let s = store().await;
  let g1 = group(&s, "G1").await;
  let g2 = group(&s, "G2").await;
  let g3 = group(&s, "G3").await;
  // Absorbing G2 into G3 would put G1 inside G3 while G3 is inside G1.
  s.add_membership(g1.identity_id, g2.identity_id, s.begin_batch())
    .await
    .unwrap();
  s.add_membership(g3.identity_id, g1.identity_id, s.begin_batch())
    .await
    .unwrap();
  let before = s.graph_snapshot().await.unwrap();
  let batches_before = s.list_batches(100).await.unwrap().len();

  let err = s
    .merge(g2.identity_id, g3.identity_id, s.begin_batch())
    .await
    .unwrap_err();
  assert!(matches!(validation(err), ValidationError::Cycle { .. }));

  assert_eq!(s.graph_snapshot().await.unwrap(), before);
  assert_eq!(s.list_batches(100).await.unwrap().len(), batches_before);
}

#[tokio::test]
async fn undo_after_merge_restores_exact_snapshot() {
  let s = store().await;
  let queen = group(&s, "Queen").await;
  let freddie = person(&s, "Freddie").await;
  let farrokh = person(&s, "Farrokh").await;
  s.add_alias(farrokh.identity_id, "Farrokh Bulsara".into(), s.begin_batch())
    .await
    .unwrap();
  s.add_membership(farrokh.identity_id, queen.identity_id, s.begin_batch())
    .await
    .unwrap();
  s.add_membership(freddie.identity_id, queen.identity_id, s.begin_batch())
    .await
    .unwrap();
  let track = Uuid::new_v4();
  s.add_credit(track, farrokh.identity_id, "performer".into(), s.begin_batch())
    .await
    .unwrap();
  s.add_credit(Uuid::new_v4(), farrokh.identity_id, "composer".into(), s.begin_batch())
    .await
    .unwrap();
  s.add_credit(track, freddie.identity_id, "performer".into(), s.begin_batch())
    .await
    .unwrap();

  let before = s.graph_snapshot().await.unwrap();
  let batch = s.begin_batch();
  s.merge(farrokh.identity_id, freddie.identity_id, batch)
    .await
    .unwrap();
  assert_ne!(s.graph_snapshot().await.unwrap(), before);

  let report = s.undo(batch).await.unwrap();
  assert!(report.is_complete());
  assert_eq!(s.graph_snapshot().await.unwrap(), before);

  let batches = s.list_batches(2).await.unwrap();
  assert_eq!(batches[0].batch_id, report.undo_batch_id);
  assert_eq!(batches[0].kind, BatchKind::Undo);
  assert_eq!(batches[1].batch_id, batch);
  assert_eq!(batches[1].undone_by, Some(report.undo_batch_id));
}

// ─── Unlink ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unlink_sole_alias_leaves_flagged_orphan() {
  let s = store().await;
  let queen = group(&s, "Queen").await;
  let freddie = person(&s, "Freddie").await;
  s.add_membership(freddie.identity_id, queen.identity_id, s.begin_batch())
    .await
    .unwrap();
  let alias = s.aliases_of(freddie.identity_id).await.unwrap().remove(0);

  let outcome = s
    .unlink_alias(alias.alias_id, None, s.begin_batch())
    .await
    .unwrap();
  assert_eq!(outcome.previous_owner, freddie.identity_id);
  assert_eq!(outcome.orphaned, Some(freddie.identity_id));

  let detached = s
    .get_identity(outcome.new_identity)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(detached.kind, IdentityKind::Person);
  assert_eq!(detached.name, "Freddie");
  assert_eq!(
    s.resolve("Freddie".into()).await.unwrap(),
    Some(outcome.new_identity)
  );

  // Queen's edge still points at the original identity.
  let edges = s.memberships_of(queen.identity_id).await.unwrap();
  assert_eq!(edges.len(), 1);
  assert_eq!(edges[0].member_id, freddie.identity_id);

  let orphans = s.list_orphans().await.unwrap();
  assert_eq!(orphans.len(), 1);
  assert_eq!(orphans[0].identity_id, freddie.identity_id);
}

#[tokio::test]
async fn unlink_inherits_the_owner_kind() {
  let s = Arc::new(store().await);
  let service = IdentityService::new(Arc::clone(&s));
  let queen = service
    .create_identity(IdentityKind::Group, "Queen")
    .await
    .unwrap();
  let alias = service
    .add_alias(queen.identity_id, "The Queen")
    .await
    .unwrap();

  let detached = service.unlink(alias.alias_id).await.unwrap();
  let detached = s.get_identity(detached).await.unwrap().unwrap();
  assert_eq!(detached.kind, IdentityKind::Group);

  // An explicit kind wins over the owner's.
  let alias = service
    .add_alias(queen.identity_id, "Queen II")
    .await
    .unwrap();
  let outcome = s
    .unlink_alias(alias.alias_id, Some(IdentityKind::Person), s.begin_batch())
    .await
    .unwrap();
  let detached = s.get_identity(outcome.new_identity).await.unwrap().unwrap();
  assert_eq!(detached.kind, IdentityKind::Person);
}

#[tokio::test]
async fn unlink_display_name_falls_back_to_remaining_alias() {
  let s = store().await;
  let freddie = person(&s, "Freddie").await;
  s.add_alias(freddie.identity_id, "Freddie Mercury".into(), s.begin_batch())
    .await
    .unwrap();
  let track = Uuid::new_v4();
  s.add_credit(track, freddie.identity_id, "performer".into(), s.begin_batch())
    .await
    .unwrap();
  let alias = s
    .aliases_of(freddie.identity_id)
    .await
    .unwrap()
    .into_iter()
    .find(|a| a.name == "Freddie")
    .unwrap();

  let outcome = s
    .unlink_alias(alias.alias_id, Some(IdentityKind::Person), s.begin_batch())
    .await
    .unwrap();
  assert_eq!(outcome.orphaned, None);

  let owner = s.get_identity(freddie.identity_id).await.unwrap().unwrap();
  assert_eq!(owner.name, "Freddie Mercury");
  // Credits stay with the original identity.
  assert_eq!(s.credits_of(freddie.identity_id).await.unwrap().len(), 1);
  assert!(s.credits_of(outcome.new_identity).await.unwrap().is_empty());
}

#[tokio::test]
async fn undo_unlink_rebinds_alias() {
  let s = store().await;
  let freddie = person(&s, "Freddie").await;
  s.add_alias(freddie.identity_id, "Freddie Mercury".into(), s.begin_batch())
    .await
    .unwrap();
  let before = s.graph_snapshot().await.unwrap();
  let alias = s
    .aliases_of(freddie.identity_id)
    .await
    .unwrap()
    .into_iter()
    .find(|a| a.name == "Freddie")
    .unwrap();

  let batch = s.begin_batch();
  s.unlink_alias(alias.alias_id, None, batch).await.unwrap();
  s.undo(batch).await.unwrap();

  assert_eq!(s.graph_snapshot().await.unwrap(), before);
}

// ─── Undo ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn undo_stops_at_conflicting_later_change() {
  let s = store().await;
  let target = person(&s, "Target").await;
  let source = person(&s, "Source").await;
  let before_merge = s.graph_snapshot().await.unwrap();
  let alias = s.aliases_of(source.identity_id).await.unwrap().remove(0);

  let merge_batch = s.begin_batch();
  s.merge(source.identity_id, target.identity_id, merge_batch)
    .await
    .unwrap();
  // A later action moves the merged alias again.
  let unlink_batch = s.begin_batch();
  s.unlink_alias(alias.alias_id, None, unlink_batch)
    .await
    .unwrap();

  let report = match undo_error(s.undo(merge_batch).await.unwrap_err()) {
    UndoError::Partial(report) => report,
    other => panic!("expected partial undo, got {other:?}"),
  };
  assert_eq!(report.applied().count(), 1);
  assert!(matches!(
    report.steps[0].action,
    UndoAction::RestoreDeleted { .. }
  ));
  let failed = report.failed_step().unwrap();
  assert_eq!(failed.table, "aliases");
  assert_eq!(failed.record_id, alias.alias_id);

  // The applied step stands; the batch is not marked undone.
  assert!(s.get_identity(source.identity_id).await.unwrap().is_some());
  let merge = s
    .list_batches(100)
    .await
    .unwrap()
    .into_iter()
    .find(|b| b.batch_id == merge_batch)
    .unwrap();
  assert!(merge.undone_at.is_none());

  // Clearing the conflict lets a retry finish the job.
  s.undo(unlink_batch).await.unwrap();
  let report = s.undo(merge_batch).await.unwrap();
  assert_eq!(report.steps[0].outcome, StepOutcome::AlreadyReverted);
  assert_eq!(s.graph_snapshot().await.unwrap(), before_merge);
}

#[tokio::test]
async fn undo_twice_is_rejected() {
  let s = store().await;
  let batch = s.begin_batch();
  s.create_identity(IdentityKind::Person, "Roger".into(), batch)
    .await
    .unwrap();

  s.undo(batch).await.unwrap();
  assert!(s.list_identities(None).await.unwrap().is_empty());

  let err = undo_error(s.undo(batch).await.unwrap_err());
  assert_eq!(err, UndoError::AlreadyUndone(batch));

  let unknown = s.begin_batch();
  let err = undo_error(s.undo(unknown).await.unwrap_err());
  assert_eq!(err, UndoError::BatchNotFound(unknown));
}

#[tokio::test]
async fn undoing_an_undo_redoes_the_action() {
  let s = store().await;
  let batch = s.begin_batch();
  let roger = s
    .create_identity(IdentityKind::Person, "Roger".into(), batch)
    .await
    .unwrap();
  let after_create = s.graph_snapshot().await.unwrap();

  let report = s.undo(batch).await.unwrap();
  assert!(s.get_identity(roger.identity_id).await.unwrap().is_none());

  s.undo(report.undo_batch_id).await.unwrap();
  assert_eq!(s.graph_snapshot().await.unwrap(), after_create);
}

#[tokio::test]
async fn redo_makes_the_action_undoable_again() {
  let s = Arc::new(store().await);
  let service = IdentityService::new(Arc::clone(&s));
  let older = person(&s, "Older").await;
  let batch = s.begin_batch();
  let roger = s
    .create_identity(IdentityKind::Person, "Roger".into(), batch)
    .await
    .unwrap();

  let undo = s.undo(batch).await.unwrap();
  s.undo(undo.undo_batch_id).await.unwrap();
  assert!(s.get_identity(roger.identity_id).await.unwrap().is_some());

  let original = s.get_batch(batch).await.unwrap().unwrap();
  assert!(original.undone_at.is_none());
  assert!(original.undone_by.is_none());
  assert_eq!(s.last_undoable_batch().await.unwrap(), Some(batch));

  let report = service.undo_last_action().await.unwrap();
  assert_eq!(report.batch_id, batch);
  assert!(s.get_identity(roger.identity_id).await.unwrap().is_none());
  assert!(s.get_identity(older.identity_id).await.unwrap().is_some());
}

#[tokio::test]
async fn undo_failing_at_first_step_leaves_no_batch() {
  let s = store().await;
  let batch = s.begin_batch();
  let roger = s
    .create_identity(IdentityKind::Person, "Roger".into(), batch)
    .await
    .unwrap();
  let alias = s.aliases_of(roger.identity_id).await.unwrap().remove(0);
  // Moving the alias makes the latest step of the batch irreversible.
  s.unlink_alias(alias.alias_id, None, s.begin_batch())
    .await
    .unwrap();
  let batches_before = s.list_batches(100).await.unwrap();

  let report = match undo_error(s.undo(batch).await.unwrap_err()) {
    UndoError::Partial(report) => report,
    other => panic!("expected partial undo, got {other:?}"),
  };
  assert_eq!(report.steps.len(), 1);
  assert_eq!(report.applied().count(), 0);
  assert!(s.get_batch(report.undo_batch_id).await.unwrap().is_none());
  assert_eq!(s.list_batches(100).await.unwrap(), batches_before);
}

#[tokio::test]
async fn undo_batch_is_tagged_and_labelled() {
  let s = store().await;
  let batch = s.begin_batch();
  s.create_identity(IdentityKind::Person, "Brian".into(), batch)
    .await
    .unwrap();

  let report = s.undo(batch).await.unwrap();
  let undo = s.get_batch(report.undo_batch_id).await.unwrap().unwrap();
  assert_eq!(undo.kind, BatchKind::Undo);
  assert_eq!(undo.label, Some(format!("undo {batch}")));
}

#[tokio::test]
async fn delete_identity_cascades_and_undoes() {
  let s = store().await;
  let queen = group(&s, "Queen").await;
  let john = person(&s, "John").await;
  s.add_alias(john.identity_id, "Deacy".into(), s.begin_batch())
    .await
    .unwrap();
  s.add_membership(john.identity_id, queen.identity_id, s.begin_batch())
    .await
    .unwrap();
  s.add_credit(Uuid::new_v4(), john.identity_id, "performer".into(), s.begin_batch())
    .await
    .unwrap();
  let before = s.graph_snapshot().await.unwrap();

  let batch = s.begin_batch();
  s.delete_identity(john.identity_id, batch).await.unwrap();
  assert!(s.resolve("Deacy".into()).await.unwrap().is_none());
  assert!(s.memberships_of(queen.identity_id).await.unwrap().is_empty());
  assert_eq!(s.list_deleted(false).await.unwrap().len(), 5);
  assert_eq!(s.resolve_id(john.identity_id).await.unwrap(), None);

  s.undo(batch).await.unwrap();
  assert_eq!(s.graph_snapshot().await.unwrap(), before);
}

// ─── Recycle bin ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn restore_brings_a_row_back_once() {
  let s = store().await;
  let freddie = person(&s, "Freddie").await;
  let queen = group(&s, "Queen").await;
  s.add_membership(freddie.identity_id, queen.identity_id, s.begin_batch())
    .await
    .unwrap();
  s.remove_membership(freddie.identity_id, queen.identity_id, s.begin_batch())
    .await
    .unwrap();
  let deleted_id = s.list_deleted(false).await.unwrap()[0].deleted_id;

  s.restore(deleted_id, s.begin_batch()).await.unwrap();
  assert_eq!(s.memberships_of(queen.identity_id).await.unwrap().len(), 1);
  assert!(s.list_deleted(false).await.unwrap().is_empty());
  assert_eq!(s.list_deleted(true).await.unwrap().len(), 1);

  let err = s.restore(deleted_id, s.begin_batch()).await.unwrap_err();
  assert!(matches!(err, Error::AlreadyRestored(id) if id == deleted_id));
}

#[tokio::test]
async fn purge_makes_batches_non_undoable() {
  let s = store().await;
  let a = person(&s, "A").await;
  let b = person(&s, "B").await;
  let batch = s.begin_batch();
  s.merge(a.identity_id, b.identity_id, batch).await.unwrap();

  assert_eq!(s.purge_deleted(None).await.unwrap(), 1);
  assert!(s.list_deleted(true).await.unwrap().is_empty());

  let err = undo_error(s.undo(batch).await.unwrap_err());
  assert_eq!(err, UndoError::Purged(batch));
  assert_ne!(s.last_undoable_batch().await.unwrap(), Some(batch));
}

// ─── Bulk merge ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_bulk_merge_leaves_no_trace() {
  let s = store().await;
  let target = person(&s, "Target").await;
  let a = person(&s, "A").await;
  let b = person(&s, "B").await;
  let before = s.graph_snapshot().await.unwrap();

  let cancel = CancellationToken::new();
  cancel.cancel();
  let batch = s.begin_batch();
  let err = s
    .bulk_merge(
      vec![(a.identity_id, target.identity_id), (b.identity_id, target.identity_id)],
      batch,
      cancel,
    )
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Cancelled));
  assert_eq!(err.kind(), ErrorKind::Cancelled);

  assert_eq!(s.graph_snapshot().await.unwrap(), before);
  assert!(s.change_log(batch).await.unwrap().is_empty());
}

#[tokio::test]
async fn failing_pair_rolls_back_whole_bulk_merge() {
  let s = store().await;
  let target = person(&s, "Target").await;
  let a = person(&s, "A").await;
  let before = s.graph_snapshot().await.unwrap();

  let batch = s.begin_batch();
  let err = s
    .bulk_merge(
      vec![(a.identity_id, target.identity_id), (target.identity_id, target.identity_id)],
      batch,
      CancellationToken::new(),
    )
    .await
    .unwrap_err();
  assert_eq!(validation(err), ValidationError::SelfMerge);
  assert_eq!(s.graph_snapshot().await.unwrap(), before);
}

// ─── Service facade ──────────────────────────────────────────────────────────

#[tokio::test]
async fn service_bulk_merge_runs_in_background() {
  let s = Arc::new(store().await);
  let service = IdentityService::new(Arc::clone(&s));
  let target = service
    .create_identity(IdentityKind::Person, "Target")
    .await
    .unwrap();
  let a = service.create_identity(IdentityKind::Person, "A").await.unwrap();
  let b = service.create_identity(IdentityKind::Person, "B").await.unwrap();

  let job = service.spawn_bulk_merge(vec![
    (a.identity_id, target.identity_id),
    (b.identity_id, target.identity_id),
  ]);
  let batch = job.batch();
  let outcomes = job.wait().await.unwrap().unwrap();
  assert_eq!(outcomes.len(), 2);
  assert_eq!(s.aliases_of(target.identity_id).await.unwrap().len(), 3);

  // One undo reverses the whole bulk batch.
  assert_eq!(s.last_undoable_batch().await.unwrap(), Some(batch));
  service.undo_last_action().await.unwrap();
  assert_eq!(s.aliases_of(target.identity_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn service_undo_last_action_walks_back() {
  let s = Arc::new(store().await);
  let service = IdentityService::new(Arc::clone(&s));

  let err = service.undo_last_action().await.unwrap_err();
  assert_eq!(undo_error(err), UndoError::NothingToUndo);

  let freddie = service
    .create_identity(IdentityKind::Person, "Freddie")
    .await
    .unwrap();
  service
    .add_alias(freddie.identity_id, "Freddie Mercury")
    .await
    .unwrap();

  service.undo_last_action().await.unwrap();
  assert_eq!(service.resolve("Freddie Mercury").await.unwrap(), None);
  assert_eq!(
    service.resolve("Freddie").await.unwrap(),
    Some(freddie.identity_id)
  );

  service.undo_last_action().await.unwrap();
  assert!(s.get_identity(freddie.identity_id).await.unwrap().is_none());

  let err = service.undo_last_action().await.unwrap_err();
  assert_eq!(undo_error(err), UndoError::NothingToUndo);
}

#[tokio::test]
async fn service_unlink_returns_new_identity() {
  let s = Arc::new(store().await);
  let service = IdentityService::new(Arc::clone(&s));
  let freddie = service
    .create_identity(IdentityKind::Person, "Freddie")
    .await
    .unwrap();
  let alias = service
    .add_alias(freddie.identity_id, "Mr. Bad Guy")
    .await
    .unwrap();

  let new_id = service.unlink(alias.alias_id).await.unwrap();
  assert_ne!(new_id, freddie.identity_id);
  assert_eq!(service.resolve("mr. bad guy").await.unwrap(), Some(new_id));
}

// ─── File-backed store ───────────────────────────────────────────────────────

#[tokio::test]
async fn file_store_reads_committed_writes() {
  let dir = std::env::temp_dir().join(format!("marquee-test-{}", Uuid::new_v4()));
  std::fs::create_dir_all(&dir).unwrap();
  let path = dir.join("catalog.db");

  let s = SqliteStore::open(&path, CatalogConfig::default()).await.unwrap();
  let freddie = person(&s, "Freddie").await;
  assert_eq!(
    s.resolve("freddie".into()).await.unwrap(),
    Some(freddie.identity_id)
  );
  drop(s);

  let reopened = SqliteStore::open(&path, CatalogConfig::default())
    .await
    .unwrap();
  assert!(
    reopened
      .get_identity(freddie.identity_id)
      .await
      .unwrap()
      .is_some()
  );
  drop(reopened);
  let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn invalid_config_is_rejected_at_open() {
  let cfg = CatalogConfig { roles: Vec::new(), ..Default::default() };
  let err = SqliteStore::open_in_memory(cfg).await.err().unwrap();
  assert!(matches!(err, Error::Core(_)));
}
