//! The `KvStore` trait: the durable key/value layer under every component.
//!
//! Values are JSON text. The trait is implemented by storage backends
//! ([`MemoryStore`] here, `safestore-store-sqlite` for a file on disk).
//! Higher layers only ever talk to it through
//! [`Storage`](crate::storage::Storage).

use std::{
  collections::HashMap,
  convert::Infallible,
  future::Future,
  sync::Mutex,
};

// ─── Keys ────────────────────────────────────────────────────────────────────

/// The fixed set of keys the vault persists.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  strum::AsRefStr,
  strum::Display,
  strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum StorageKey {
  /// List of [`Identity`](crate::identity::Identity).
  Users,
  /// List of [`Note`](crate::note::Note).
  Notes,
  /// List of [`FileRecord`](crate::file::FileRecord).
  Files,
  /// A single [`Session`](crate::session::Session), or absent.
  Session,
  /// List of [`AuditEntry`](crate::audit::AuditEntry), newest first.
  Audit,
}

impl StorageKey {
  pub fn as_str(&self) -> &str { self.as_ref() }
}

/// One write inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
  Set(StorageKey, String),
  Remove(StorageKey),
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a durable key/value backend.
///
/// Every read returns an owned copy, so two reads never alias. A batch
/// passed to [`KvStore::apply`] must become visible all at once or not at
/// all.
pub trait KvStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Read the raw value stored under `key`. `None` if absent.
  fn get(
    &self,
    key: StorageKey,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + '_;

  /// Apply every op in `batch` atomically.
  fn apply(
    &self,
    batch: Vec<KvOp>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn set(
    &self,
    key: StorageKey,
    value: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_ {
    self.apply(vec![KvOp::Set(key, value)])
  }

  fn remove(
    &self,
    key: StorageKey,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_ {
    self.apply(vec![KvOp::Remove(key)])
  }
}

// ─── In-memory backend ───────────────────────────────────────────────────────

/// A process-local store, the moral equivalent of browser local storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
  entries: Mutex<HashMap<StorageKey, String>>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }
}

impl KvStore for MemoryStore {
  type Error = Infallible;

  async fn get(&self, key: StorageKey) -> Result<Option<String>, Infallible> {
    let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
    Ok(entries.get(&key).cloned())
  }

  async fn apply(&self, batch: Vec<KvOp>) -> Result<(), Infallible> {
    let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
    for op in batch {
      match op {
        KvOp::Set(key, value) => {
          entries.insert(key, value);
        }
        KvOp::Remove(key) => {
          entries.remove(&key);
        }
      }
    }
    Ok(())
  }
}
