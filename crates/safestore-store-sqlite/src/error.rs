//! Error type for `safestore-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("unsupported schema version {0}")]
  SchemaVersion(i64),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
