//! Read-side queries over the identity graph.

use std::collections::{HashSet, VecDeque};

use marquee_core::{
  identity::{Alias, Credit, GraphSnapshot, Identity, Membership, name_key},
  record::Record,
};
use rusqlite::{Connection, OptionalExtension as _, params};
use uuid::Uuid;

use crate::{
  Result,
  encode::{decode_uuid, encode_uuid},
  repository,
};

/// Upper bound on merge redirects followed by [`resolve_id`].
const MAX_REDIRECTS: usize = 64;

pub fn aliases_of(conn: &Connection, identity_id: Uuid) -> Result<Vec<Alias>> {
  repository::find(conn, "identity_id", identity_id)
}

pub fn alias_by_name(conn: &Connection, name: &str) -> Result<Option<Alias>> {
  Ok(
    repository::find::<Alias>(conn, "name_key", name_key(name))?
      .into_iter()
      .next(),
  )
}

pub fn memberships_as_member(conn: &Connection, identity_id: Uuid) -> Result<Vec<Membership>> {
  repository::find(conn, "member_id", identity_id)
}

pub fn memberships_as_group(conn: &Connection, identity_id: Uuid) -> Result<Vec<Membership>> {
  repository::find(conn, "group_id", identity_id)
}

pub fn membership_between(
  conn: &Connection,
  member_id: Uuid,
  group_id: Uuid,
) -> Result<Option<Membership>> {
  Ok(
    memberships_as_member(conn, member_id)?
      .into_iter()
      .find(|m| m.group_id == group_id),
  )
}

pub fn credits_of(conn: &Connection, identity_id: Uuid) -> Result<Vec<Credit>> {
  repository::find(conn, "identity_id", identity_id)
}

pub fn matching_credit(
  conn: &Connection,
  source_id: Uuid,
  identity_id: Uuid,
  role_id: &str,
) -> Result<Option<Credit>> {
  Ok(
    credits_of(conn, identity_id)?
      .into_iter()
      .find(|c| c.source_id == source_id && c.role_id == role_id),
  )
}

/// Whether adding the edge `member_id → group_id` would close a cycle.
///
/// Walks upward from `group_id` through the groups it belongs to; reaching
/// `member_id` means the group already sits inside the member's closure.
pub fn would_cycle(conn: &Connection, member_id: Uuid, group_id: Uuid) -> Result<bool> {
  if member_id == group_id {
    return Ok(true);
  }

  let mut stmt = conn.prepare_cached("SELECT group_id FROM memberships WHERE member_id = ?1")?;
  let mut seen = HashSet::from([group_id]);
  let mut queue = VecDeque::from([group_id]);

  while let Some(node) = queue.pop_front() {
    let parents = stmt
      .query_map(params![encode_uuid(node)], |r| r.get::<_, String>(0))?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    for parent in parents {
      let parent = decode_uuid(&parent)?;
      if parent == member_id {
        return Ok(true);
      }
      if seen.insert(parent) {
        queue.push_back(parent);
      }
    }
  }
  Ok(false)
}

/// The identity currently owning an alias with this name.
pub fn resolve(conn: &Connection, name: &str) -> Result<Option<Uuid>> {
  Ok(alias_by_name(conn, name)?.map(|a| a.identity_id))
}

/// Follow merges from a possibly stale identity id to the live identity.
///
/// A merged identity survives as a recycle-bin snapshot pointing at the
/// identity that absorbed it. Undoing the merge restores the snapshot, which
/// retires the redirect.
pub fn resolve_id(conn: &Connection, id: Uuid) -> Result<Option<Uuid>> {
  let mut current = id;
  let mut seen = HashSet::new();

  for _ in 0..MAX_REDIRECTS {
    if repository::get::<Identity>(conn, current)?.is_some() {
      return Ok(Some(current));
    }
    if !seen.insert(current) {
      return Ok(None);
    }

    let redirect: Option<String> = conn
      .query_row(
        "SELECT redirect_to FROM deleted_records
         WHERE table_name = ?1
           AND record_id = ?2
           AND restored_at IS NULL
           AND redirect_to IS NOT NULL
         ORDER BY deleted_id DESC
         LIMIT 1",
        params![Identity::SPEC.name, encode_uuid(current)],
        |r| r.get(0),
      )
      .optional()?;

    let Some(target) = redirect else {
      return Ok(None);
    };
    current = decode_uuid(&target)?;
  }
  Ok(None)
}

/// Identities that own no alias.
pub fn orphans(conn: &Connection) -> Result<Vec<Identity>> {
  let ids = {
    let mut stmt = conn.prepare(
      "SELECT i.identity_id FROM identities i
       WHERE NOT EXISTS (SELECT 1 FROM aliases a WHERE a.identity_id = i.identity_id)
       ORDER BY i.created_at, i.identity_id",
    )?;
    stmt
      .query_map([], |r| r.get::<_, String>(0))?
      .collect::<rusqlite::Result<Vec<_>>>()?
  };
  ids
    .iter()
    .map(|id| repository::require::<Identity>(conn, decode_uuid(id)?))
    .collect()
}

pub fn snapshot(conn: &Connection) -> Result<GraphSnapshot> {
  Ok(GraphSnapshot {
    identities:  repository::all(conn)?,
    aliases:     repository::all(conn)?,
    memberships: repository::all(conn)?,
    credits:     repository::all(conn)?,
  })
}
