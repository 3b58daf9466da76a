//! The identity resolution engine.
//!
//! [`Engine`] runs inside the caller's transaction and routes every change
//! through the audited repository under a single batch. A failed check
//! returns early and the caller's rollback discards any writes already made.

use chrono::Utc;
use marquee_core::{
  ValidationError,
  audit::BatchId,
  config::CatalogConfig,
  identity::{
    Alias, Credit, Identity, IdentityKind, Membership, MergeOutcome, UnlinkOutcome,
    clean_name, name_key,
  },
  record::{Fields, Record},
};
use rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;

use crate::{Error, Result, graph, repository};

pub struct Engine<'a> {
  conn:   &'a Connection,
  config: &'a CatalogConfig,
  batch:  BatchId,
}

impl<'a> Engine<'a> {
  pub fn new(conn: &'a Connection, config: &'a CatalogConfig, batch: BatchId) -> Self {
    Self { conn, config, batch }
  }

  pub fn label(&self, label: &str) -> Result<()> {
    repository::label_batch(self.conn, self.batch, label)
  }

  // ─── Identities and aliases ────────────────────────────────────────────

  pub fn create_identity(&self, kind: IdentityKind, name: &str) -> Result<Identity> {
    let name = clean_name(name)?;
    self.ensure_name_free(&name)?;

    let identity = Identity {
      identity_id: Uuid::new_v4(),
      kind,
      name: name.clone(),
      created_at: Utc::now(),
    };
    repository::insert(self.conn, &identity, self.batch)?;
    self.insert_alias(identity.identity_id, name)?;
    Ok(identity)
  }

  /// Bind `name` to `identity_id`. A name the identity already owns is
  /// returned as is; a name owned elsewhere is rejected.
  pub fn add_alias(&self, identity_id: Uuid, name: &str) -> Result<Alias> {
    repository::require::<Identity>(self.conn, identity_id)?;
    let name = clean_name(name)?;

    if let Some(existing) = graph::alias_by_name(self.conn, &name)? {
      if existing.identity_id == identity_id {
        return Ok(existing);
      }
      return Err(
        ValidationError::AliasTaken { name, owner: existing.identity_id }.into(),
      );
    }
    self.insert_alias(identity_id, name)
  }

  fn ensure_name_free(&self, name: &str) -> Result<()> {
    match graph::alias_by_name(self.conn, name)? {
      Some(existing) => Err(
        ValidationError::AliasTaken {
          name:  name.to_owned(),
          owner: existing.identity_id,
        }
        .into(),
      ),
      None => Ok(()),
    }
  }

  fn insert_alias(&self, identity_id: Uuid, name: String) -> Result<Alias> {
    let alias = Alias {
      alias_id: Uuid::new_v4(),
      identity_id,
      name,
      created_at: Utc::now(),
    };
    repository::insert(self.conn, &alias, self.batch)?;
    Ok(alias)
  }

  /// Soft-delete an identity and everything that references it.
  pub fn delete_identity(&self, id: Uuid) -> Result<()> {
    repository::require::<Identity>(self.conn, id)?;

    for alias in graph::aliases_of(self.conn, id)? {
      repository::delete::<Alias>(self.conn, alias.alias_id, self.batch)?;
    }
    let memberships = graph::memberships_as_member(self.conn, id)?
      .into_iter()
      .chain(graph::memberships_as_group(self.conn, id)?);
    for membership in memberships {
      repository::delete::<Membership>(self.conn, membership.membership_id, self.batch)?;
    }
    for credit in graph::credits_of(self.conn, id)? {
      repository::delete::<Credit>(self.conn, credit.credit_id, self.batch)?;
    }
    repository::delete::<Identity>(self.conn, id, self.batch)?;
    Ok(())
  }

  // ─── Memberships and credits ───────────────────────────────────────────

  pub fn add_membership(&self, member_id: Uuid, group_id: Uuid) -> Result<Membership> {
    if member_id == group_id {
      return Err(ValidationError::Cycle { member: member_id, group: group_id }.into());
    }
    repository::require::<Identity>(self.conn, member_id)?;
    let group = repository::require::<Identity>(self.conn, group_id)?;
    if group.kind != IdentityKind::Group {
      return Err(ValidationError::NotAGroup(group_id).into());
    }

    if let Some(existing) = graph::membership_between(self.conn, member_id, group_id)? {
      return Ok(existing);
    }
    if graph::would_cycle(self.conn, member_id, group_id)? {
      return Err(ValidationError::Cycle { member: member_id, group: group_id }.into());
    }

    let membership = Membership {
      membership_id: Uuid::new_v4(),
      member_id,
      group_id,
      created_at: Utc::now(),
    };
    repository::insert(self.conn, &membership, self.batch)?;
    Ok(membership)
  }

  pub fn remove_membership(&self, member_id: Uuid, group_id: Uuid) -> Result<()> {
    let membership = graph::membership_between(self.conn, member_id, group_id)?
      .ok_or_else(|| Error::not_found("memberships", format!("{member_id} in {group_id}")))?;
    repository::delete::<Membership>(self.conn, membership.membership_id, self.batch)?;
    Ok(())
  }

  pub fn add_credit(&self, source_id: Uuid, identity_id: Uuid, role_id: &str) -> Result<Credit> {
    if !self.config.has_role(role_id) {
      return Err(ValidationError::UnknownRole(role_id.to_owned()).into());
    }
    repository::require::<Identity>(self.conn, identity_id)?;

    if let Some(existing) = graph::matching_credit(self.conn, source_id, identity_id, role_id)? {
      return Ok(existing);
    }
    let credit = Credit {
      credit_id: Uuid::new_v4(),
      source_id,
      identity_id,
      role_id: role_id.to_owned(),
      created_at: Utc::now(),
    };
    repository::insert(self.conn, &credit, self.batch)?;
    Ok(credit)
  }

  // ─── Merge and split ───────────────────────────────────────────────────

  /// Absorb `source_id` into `target_id`.
  ///
  /// Edges the target already has, and edges that would join the target to
  /// itself, are soft-deleted rather than moved. Any moved edge that would
  /// close a membership cycle fails the whole merge.
  pub fn merge(&self, source_id: Uuid, target_id: Uuid) -> Result<MergeOutcome> {
    if source_id == target_id {
      return Err(ValidationError::SelfMerge.into());
    }
    let source = repository::require::<Identity>(self.conn, source_id)?;
    let target = repository::require::<Identity>(self.conn, target_id)?;
    if source.kind != target.kind {
      return Err(
        ValidationError::KindMismatch {
          source_kind: source.kind,
          target_kind: target.kind,
        }
        .into(),
      );
    }

    let mut outcome = MergeOutcome {
      source: source_id,
      target: target_id,
      ..Default::default()
    };

    for alias in graph::aliases_of(self.conn, source_id)? {
      self.reassign::<Alias>(alias.alias_id, "identity_id", target_id)?;
      outcome.aliases_moved += 1;
    }

    // Groups the source belongs to. These move before the source's own
    // members so that the source never has outgoing edges left while the
    // incoming ones are checked.
    for m in graph::memberships_as_member(self.conn, source_id)? {
      if m.group_id == target_id
        || graph::membership_between(self.conn, target_id, m.group_id)?.is_some()
      {
        repository::delete::<Membership>(self.conn, m.membership_id, self.batch)?;
        outcome.duplicates_dropped += 1;
      } else if graph::would_cycle(self.conn, target_id, m.group_id)? {
        return Err(ValidationError::Cycle { member: target_id, group: m.group_id }.into());
      } else {
        self.reassign::<Membership>(m.membership_id, "member_id", target_id)?;
        outcome.memberships_moved += 1;
      }
    }

    for m in graph::memberships_as_group(self.conn, source_id)? {
      if m.member_id == target_id
        || graph::membership_between(self.conn, m.member_id, target_id)?.is_some()
      {
        repository::delete::<Membership>(self.conn, m.membership_id, self.batch)?;
        outcome.duplicates_dropped += 1;
      } else if graph::would_cycle(self.conn, m.member_id, target_id)? {
        return Err(ValidationError::Cycle { member: m.member_id, group: target_id }.into());
      } else {
        self.reassign::<Membership>(m.membership_id, "group_id", target_id)?;
        outcome.memberships_moved += 1;
      }
    }

    for c in graph::credits_of(self.conn, source_id)? {
      if graph::matching_credit(self.conn, c.source_id, target_id, &c.role_id)?.is_some() {
        repository::delete::<Credit>(self.conn, c.credit_id, self.batch)?;
        outcome.duplicates_dropped += 1;
      } else {
        self.reassign::<Credit>(c.credit_id, "identity_id", target_id)?;
        outcome.credits_moved += 1;
      }
    }

    let deleted_id = repository::delete::<Identity>(self.conn, source_id, self.batch)?;
    repository::set_redirect(self.conn, deleted_id, target_id)?;

    debug!(
      source = %source_id,
      target = %target_id,
      batch = %self.batch,
      aliases = outcome.aliases_moved,
      memberships = outcome.memberships_moved,
      credits = outcome.credits_moved,
      dropped = outcome.duplicates_dropped,
      "merged identity"
    );
    Ok(outcome)
  }

  fn reassign<R: Record>(&self, id: Uuid, column: &str, to: Uuid) -> Result<()> {
    repository::update::<R>(self.conn, id, &Fields::new().with(column, to), self.batch)?;
    Ok(())
  }

  /// Move an alias onto a brand-new identity of `kind`, or of the owner's
  /// kind when none is given.
  ///
  /// The previous owner keeps its credits and memberships. If the alias was
  /// its display name, the display name falls back to its oldest remaining
  /// alias; if it was its only alias, the owner is reported as orphaned.
  pub fn unlink_alias(&self, alias_id: Uuid, kind: Option<IdentityKind>) -> Result<UnlinkOutcome> {
    let alias = repository::require::<Alias>(self.conn, alias_id)?;
    let owner = repository::require::<Identity>(self.conn, alias.identity_id)?;

    let detached = Identity {
      identity_id: Uuid::new_v4(),
      kind:        kind.unwrap_or(owner.kind),
      name:        alias.name.clone(),
      created_at:  Utc::now(),
    };
    repository::insert(self.conn, &detached, self.batch)?;
    self.reassign::<Alias>(alias_id, "identity_id", detached.identity_id)?;

    let remaining = graph::aliases_of(self.conn, owner.identity_id)?;
    let orphaned = match remaining.first() {
      None => Some(owner.identity_id),
      Some(fallback) => {
        if name_key(&owner.name) == alias.name_key() {
          repository::update::<Identity>(
            self.conn,
            owner.identity_id,
            &Fields::new().with("name", fallback.name.as_str()),
            self.batch,
          )?;
        }
        None
      }
    };

    Ok(UnlinkOutcome {
      alias_id,
      previous_owner: owner.identity_id,
      new_identity: detached.identity_id,
      orphaned,
    })
  }
}
