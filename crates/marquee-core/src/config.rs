//! Catalog configuration, loaded once at startup and handed to the store.

use serde::{Deserialize, Serialize};

use crate::{Error, Result, identity::IdentityKind};

/// The only configuration layout this build understands.
pub const SCHEMA_VERSION: u32 = 1;

/// Registry of the values the identity graph accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
  pub schema_version:  u32,
  /// Role keys a credit may carry.
  pub roles:           Vec<String>,
  /// Kind given to identities created without an explicit kind.
  pub default_kind:    IdentityKind,
  /// Page size for batch listings.
  pub batch_page_size: usize,
}

impl Default for CatalogConfig {
  fn default() -> Self {
    Self {
      schema_version:  SCHEMA_VERSION,
      roles:           [
        "performer",
        "composer",
        "lyricist",
        "arranger",
        "conductor",
        "producer",
        "engineer",
      ]
      .into_iter()
      .map(str::to_owned)
      .collect(),
      default_kind:    IdentityKind::Person,
      batch_page_size: 50,
    }
  }
}

impl CatalogConfig {
  pub fn validate(&self) -> Result<()> {
    if self.schema_version != SCHEMA_VERSION {
      return Err(Error::Config(format!(
        "unsupported schema_version {} (expected {SCHEMA_VERSION})",
        self.schema_version
      )));
    }
    if self.roles.is_empty() {
      return Err(Error::Config("at least one credit role is required".into()));
    }
    for (i, role) in self.roles.iter().enumerate() {
      if role.trim().is_empty() {
        return Err(Error::Config("credit roles must not be blank".into()));
      }
      if self.roles[..i].contains(role) {
        return Err(Error::Config(format!("duplicate credit role {role:?}")));
      }
    }
    if self.batch_page_size == 0 {
      return Err(Error::Config("batch_page_size must be positive".into()));
    }
    Ok(())
  }

  pub fn has_role(&self, role: &str) -> bool { self.roles.iter().any(|r| r == role) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_config_is_valid() {
    CatalogConfig::default().validate().unwrap();
  }

  #[test]
  fn rejects_other_schema_versions() {
    let cfg = CatalogConfig { schema_version: 2, ..Default::default() };
    assert!(matches!(cfg.validate(), Err(Error::Config(_))));
  }

  #[test]
  fn rejects_duplicate_roles() {
    let cfg = CatalogConfig {
      roles: vec!["performer".into(), "performer".into()],
      ..Default::default()
    };
    assert!(matches!(cfg.validate(), Err(Error::Config(_))));
  }

  #[test]
  fn partial_input_falls_back_to_defaults() {
    let cfg: CatalogConfig =
      serde_json::from_str(r#"{"roles": ["drums"], "default_kind": "group"}"#).unwrap();
    assert_eq!(cfg.roles, vec!["drums".to_string()]);
    assert_eq!(cfg.default_kind, IdentityKind::Group);
    assert_eq!(cfg.schema_version, SCHEMA_VERSION);
    assert!(cfg.has_role("drums"));
    assert!(!cfg.has_role("performer"));
  }
}
