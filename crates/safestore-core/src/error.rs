//! Error types for `safestore-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::preview::FetchFailure;

/// The kind of record a [`Error::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Entity {
  Note,
  File,
  Session,
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("user already exists: {0}")]
  DuplicateUser(String),

  #[error("invalid credentials")]
  InvalidCredentials,

  #[error("{0} not found: {1}")]
  NotFound(Entity, Uuid),

  #[error("stored content of file {0} is not decodable")]
  CorruptContent(Uuid),

  #[error("validation error: {0}")]
  Validation(String),

  #[error("access denied: {0}")]
  AccessDenied(String),

  #[error("remote fetch failed: {0}")]
  RemoteFetchFailed(FetchFailure),

  #[error("storage error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Wrap a backend error from any [`KvStore`](crate::kv::KvStore).
  pub fn storage<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Storage(Box::new(err))
  }

  /// `true` for errors caused by the caller's input or permissions rather
  /// than by the storage backend.
  pub fn is_recoverable(&self) -> bool {
    !matches!(self, Self::Storage(_) | Self::Serialization(_))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
