//! A column-level view of persisted rows.
//!
//! The audited repository works on [`Fields`] rather than concrete types so
//! that the change log, the recycle bin and undo can treat every table the
//! same way. Each entity type maps to and from [`Fields`] through [`Record`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  identity::{Alias, Credit, Identity, IdentityKind, Membership, name_key},
};

// ─── FieldValue ──────────────────────────────────────────────────────────────

/// A single column value. UUIDs and timestamps are carried as text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
  #[default]
  Null,
  Integer(i64),
  Text(String),
}

impl FieldValue {
  /// Columns holding their default are not written to the change log on
  /// insert.
  pub fn is_default(&self) -> bool { matches!(self, Self::Null) }

  pub fn as_text(&self) -> Option<&str> {
    match self {
      Self::Text(s) => Some(s),
      _ => None,
    }
  }
}

impl From<&str> for FieldValue {
  fn from(s: &str) -> Self { Self::Text(s.to_owned()) }
}

impl From<String> for FieldValue {
  fn from(s: String) -> Self { Self::Text(s) }
}

impl From<i64> for FieldValue {
  fn from(n: i64) -> Self { Self::Integer(n) }
}

impl From<Uuid> for FieldValue {
  fn from(id: Uuid) -> Self { Self::Text(id.hyphenated().to_string()) }
}

impl From<DateTime<Utc>> for FieldValue {
  fn from(dt: DateTime<Utc>) -> Self { Self::Text(dt.to_rfc3339()) }
}

impl From<IdentityKind> for FieldValue {
  fn from(kind: IdentityKind) -> Self { Self::Text(kind.to_string()) }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
  fn from(v: Option<T>) -> Self { v.map(Into::into).unwrap_or(Self::Null) }
}

// ─── Fields ──────────────────────────────────────────────────────────────────

/// One row as a column-name → value map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fields(BTreeMap<String, FieldValue>);

/// A field whose value differs between two versions of a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
  pub field: String,
  pub old:   FieldValue,
  pub new:   FieldValue,
}

impl Fields {
  pub fn new() -> Self { Self::default() }

  /// Builder-style insert.
  pub fn with(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
    self.0.insert(field.to_owned(), value.into());
    self
  }

  pub fn set(&mut self, field: &str, value: impl Into<FieldValue>) {
    self.0.insert(field.to_owned(), value.into());
  }

  pub fn get(&self, field: &str) -> Option<&FieldValue> { self.0.get(field) }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v))
  }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  pub fn len(&self) -> usize { self.0.len() }

  /// Compare `changes` against this row and return only the fields whose
  /// value would actually change. Fields absent from the row count as null.
  pub fn diff(&self, changes: &Fields) -> Vec<FieldChange> {
    changes
      .iter()
      .filter_map(|(field, new)| {
        let old = self.get(field).cloned().unwrap_or_default();
        (old != *new).then(|| FieldChange {
          field: field.to_owned(),
          old,
          new: new.clone(),
        })
      })
      .collect()
  }

  pub fn text(&self, field: &str) -> Result<String> {
    match self.get(field) {
      Some(FieldValue::Text(s)) => Ok(s.clone()),
      Some(_) => Err(Error::FieldType { field: field.to_owned(), expected: "text" }),
      None => Err(Error::MissingField(field.to_owned())),
    }
  }

  pub fn uuid(&self, field: &str) -> Result<Uuid> {
    let raw = self.text(field)?;
    Uuid::parse_str(&raw)
      .map_err(|_| Error::FieldType { field: field.to_owned(), expected: "uuid" })
  }

  pub fn datetime(&self, field: &str) -> Result<DateTime<Utc>> {
    let raw = self.text(field)?;
    DateTime::parse_from_rfc3339(&raw)
      .map(|dt| dt.with_timezone(&Utc))
      .map_err(|_| Error::FieldType { field: field.to_owned(), expected: "timestamp" })
  }
}

impl FromIterator<(String, FieldValue)> for Fields {
  fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}

// ─── Table metadata ──────────────────────────────────────────────────────────

/// Static description of one audited table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
  pub name:    &'static str,
  /// Primary-key column; always a UUID.
  pub key:     &'static str,
  /// Every column, key included, in DDL order.
  pub columns: &'static [&'static str],
}

impl TableSpec {
  /// Look up an audited table by name. Change-log and recycle-bin rows name
  /// their table as text; anything not listed here is rejected.
  pub fn by_name(name: &str) -> Option<&'static TableSpec> {
    AUDITED_TABLES.iter().copied().find(|t| t.name == name)
  }

  pub fn has_column(&self, column: &str) -> bool { self.columns.contains(&column) }
}

pub static AUDITED_TABLES: &[&TableSpec] = &[
  &Identity::SPEC,
  &Alias::SPEC,
  &Membership::SPEC,
  &Credit::SPEC,
];

// ─── Record ──────────────────────────────────────────────────────────────────

/// An entity kind the audited repository can persist.
pub trait Record: Sized + Send + 'static {
  const SPEC: TableSpec;

  fn key(&self) -> Uuid;

  fn to_fields(&self) -> Fields;

  fn from_fields(fields: &Fields) -> Result<Self>;
}

impl Record for Identity {
  const SPEC: TableSpec = TableSpec {
    name:    "identities",
    key:     "identity_id",
    columns: &["identity_id", "kind", "name", "created_at"],
  };

  fn key(&self) -> Uuid { self.identity_id }

  fn to_fields(&self) -> Fields {
    Fields::new()
      .with("identity_id", self.identity_id)
      .with("kind", self.kind)
      .with("name", self.name.as_str())
      .with("created_at", self.created_at)
  }

  fn from_fields(fields: &Fields) -> Result<Self> {
    let kind = fields.text("kind")?;
    Ok(Self {
      identity_id: fields.uuid("identity_id")?,
      kind:        kind.parse().map_err(|_| Error::UnknownKind(kind))?,
      name:        fields.text("name")?,
      created_at:  fields.datetime("created_at")?,
    })
  }
}

impl Record for Alias {
  const SPEC: TableSpec = TableSpec {
    name:    "aliases",
    key:     "alias_id",
    columns: &["alias_id", "identity_id", "name", "name_key", "created_at"],
  };

  fn key(&self) -> Uuid { self.alias_id }

  fn to_fields(&self) -> Fields {
    Fields::new()
      .with("alias_id", self.alias_id)
      .with("identity_id", self.identity_id)
      .with("name", self.name.as_str())
      .with("name_key", name_key(&self.name))
      .with("created_at", self.created_at)
  }

  fn from_fields(fields: &Fields) -> Result<Self> {
    Ok(Self {
      alias_id:    fields.uuid("alias_id")?,
      identity_id: fields.uuid("identity_id")?,
      name:        fields.text("name")?,
      created_at:  fields.datetime("created_at")?,
    })
  }
}

impl Record for Membership {
  const SPEC: TableSpec = TableSpec {
    name:    "memberships",
    key:     "membership_id",
    columns: &["membership_id", "member_id", "group_id", "created_at"],
  };

  fn key(&self) -> Uuid { self.membership_id }

  fn to_fields(&self) -> Fields {
    Fields::new()
      .with("membership_id", self.membership_id)
      .with("member_id", self.member_id)
      .with("group_id", self.group_id)
      .with("created_at", self.created_at)
  }

  fn from_fields(fields: &Fields) -> Result<Self> {
    Ok(Self {
      membership_id: fields.uuid("membership_id")?,
      member_id:     fields.uuid("member_id")?,
      group_id:      fields.uuid("group_id")?,
      created_at:    fields.datetime("created_at")?,
    })
  }
}

impl Record for Credit {
  const SPEC: TableSpec = TableSpec {
    name:    "credits",
    key:     "credit_id",
    columns: &["credit_id", "source_id", "identity_id", "role_id", "created_at"],
  };

  fn key(&self) -> Uuid { self.credit_id }

  fn to_fields(&self) -> Fields {
    Fields::new()
      .with("credit_id", self.credit_id)
      .with("source_id", self.source_id)
      .with("identity_id", self.identity_id)
      .with("role_id", self.role_id.as_str())
      .with("created_at", self.created_at)
  }

  fn from_fields(fields: &Fields) -> Result<Self> {
    Ok(Self {
      credit_id:   fields.uuid("credit_id")?,
      source_id:   fields.uuid("source_id")?,
      identity_id: fields.uuid("identity_id")?,
      role_id:     fields.text("role_id")?,
      created_at:  fields.datetime("created_at")?,
    })
  }
}
