//! The identity graph: contributors, their names, group memberships and
//! credits on media items.
//!
//! Every row type here is persisted through the audited repository; none of
//! them is ever mutated in place by callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::error::ValidationError;

// ─── Kind ────────────────────────────────────────────────────────────────────

/// Whether a contributor is a single person or a group of members.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum IdentityKind {
  #[default]
  Person,
  Group,
}

// ─── Rows ────────────────────────────────────────────────────────────────────

/// A contributor record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
  pub identity_id: Uuid,
  pub kind:        IdentityKind,
  /// Primary display name. Always matches one of the identity's aliases
  /// unless the identity has been left without any.
  pub name:        String,
  pub created_at:  DateTime<Utc>,
}

/// A name bound to exactly one owning identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
  pub alias_id:    Uuid,
  pub identity_id: Uuid,
  pub name:        String,
  pub created_at:  DateTime<Utc>,
}

impl Alias {
  /// The catalog-wide lookup key for this alias.
  pub fn name_key(&self) -> String { name_key(&self.name) }
}

/// A directed edge: `member_id` belongs to `group_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
  pub membership_id: Uuid,
  pub member_id:     Uuid,
  pub group_id:      Uuid,
  pub created_at:    DateTime<Utc>,
}

/// A contributor credited in a role on a media item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credit {
  pub credit_id:   Uuid,
  /// The media item. Media items live outside the identity graph.
  pub source_id:   Uuid,
  pub identity_id: Uuid,
  /// A role key from [`crate::config::CatalogConfig::roles`].
  pub role_id:     String,
  pub created_at:  DateTime<Utc>,
}

// ─── Operation results ───────────────────────────────────────────────────────

/// What a merge moved from the source identity onto the target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
  pub source:             Uuid,
  pub target:             Uuid,
  pub aliases_moved:      usize,
  pub memberships_moved:  usize,
  pub credits_moved:      usize,
  /// Memberships and credits the target already had (or memberships that
  /// would have pointed at the target itself), soft-deleted instead of moved.
  pub duplicates_dropped: usize,
}

/// The result of detaching an alias into its own identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlinkOutcome {
  pub alias_id:       Uuid,
  pub previous_owner: Uuid,
  pub new_identity:   Uuid,
  /// Set when the previous owner was left owning no alias at all and should
  /// be reviewed for cleanup.
  pub orphaned:       Option<Uuid>,
}

/// The complete identity graph, sorted by primary key. Used to compare the
/// catalog before and after a sequence of operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
  pub identities:  Vec<Identity>,
  pub aliases:     Vec<Alias>,
  pub memberships: Vec<Membership>,
  pub credits:     Vec<Credit>,
}

// ─── Names ───────────────────────────────────────────────────────────────────

/// Trim and collapse internal whitespace, rejecting names that end up empty.
pub fn clean_name(name: &str) -> Result<String, ValidationError> {
  let cleaned = name.split_whitespace().collect::<Vec<_>>().join(" ");
  if cleaned.is_empty() {
    return Err(ValidationError::EmptyName);
  }
  Ok(cleaned)
}

/// Case- and whitespace-insensitive key under which alias names are unique.
pub fn name_key(name: &str) -> String {
  name
    .split_whitespace()
    .map(str::to_lowercase)
    .collect::<Vec<_>>()
    .join(" ")
}
