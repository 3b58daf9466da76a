//! Error type for `marquee-store-sqlite`.

use marquee_core::{Classify, ErrorKind, UndoError, ValidationError};
use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error(transparent)]
  Undo(#[from] UndoError),

  #[error("core error: {0}")]
  Core(#[from] marquee_core::Error),

  #[error("{table} record not found: {id}")]
  NotFound { table: &'static str, id: String },

  /// A uniqueness, check or foreign-key constraint rejected the write.
  #[error("constraint violation: {0}")]
  Constraint(String),

  #[error("deleted record {0} has already been restored")]
  AlreadyRestored(i64),

  #[error("operation cancelled; batch rolled back")]
  Cancelled,

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("malformed stored value: {0}")]
  Decode(String),
}

impl Error {
  pub(crate) fn not_found(table: &'static str, id: impl ToString) -> Self {
    Self::NotFound { table, id: id.to_string() }
  }
}

impl From<rusqlite::Error> for Error {
  fn from(e: rusqlite::Error) -> Self {
    match e.sqlite_error_code() {
      Some(ErrorCode::ConstraintViolation) => Self::Constraint(e.to_string()),
      _ => Self::Sqlite(e),
    }
  }
}

fn code_is_transient(code: Option<ErrorCode>) -> bool {
  matches!(
    code,
    Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
  )
}

impl Classify for Error {
  fn kind(&self) -> ErrorKind {
    match self {
      Self::Validation(_) => ErrorKind::Validation,
      Self::Undo(_) => ErrorKind::Undo,
      Self::NotFound { .. } => ErrorKind::NotFound,
      Self::Constraint(_) | Self::AlreadyRestored(_) => ErrorKind::Conflict,
      Self::Cancelled => ErrorKind::Cancelled,
      _ => ErrorKind::Storage,
    }
  }

  fn is_transient(&self) -> bool {
    match self {
      Self::Sqlite(e) => code_is_transient(e.sqlite_error_code()),
      Self::Database(tokio_rusqlite::Error::Rusqlite(e)) => {
        code_is_transient(e.sqlite_error_code())
      }
      _ => false,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
