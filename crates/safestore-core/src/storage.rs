//! Typed access to a [`KvStore`] plus the single-writer transaction.
//!
//! Reads are tolerant: a missing key reads as the empty value, unparsable
//! JSON reads as the empty value, and list elements that do not match the
//! record shape are dropped. Every case other than "missing" is logged.
//!
//! Writes go through a [`Transaction`], which holds the writer lock for its
//! whole lifetime and flushes all staged writes in one [`KvStore::apply`].

use std::collections::BTreeMap;

use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

use crate::{
  Error, Result,
  kv::{KvOp, KvStore, StorageKey},
};

// ─── Decoding ────────────────────────────────────────────────────────────────

fn decode_list<T: DeserializeOwned>(key: StorageKey, raw: Option<String>) -> Vec<T> {
  let Some(raw) = raw else { return Vec::new() };

  let items: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
    Ok(items) => items,
    Err(e) => {
      warn!(key = %key, error = %e, "discarding malformed list");
      return Vec::new();
    }
  };

  items
    .into_iter()
    .filter_map(|item| match serde_json::from_value(item) {
      Ok(record) => Some(record),
      Err(e) => {
        warn!(key = %key, error = %e, "dropping record with unexpected shape");
        None
      }
    })
    .collect()
}

fn decode_value<T: DeserializeOwned>(key: StorageKey, raw: Option<String>) -> Option<T> {
  let raw = raw?;
  match serde_json::from_str(&raw) {
    Ok(value) => Some(value),
    Err(e) => {
      warn!(key = %key, error = %e, "discarding malformed value");
      None
    }
  }
}

// ─── Storage ─────────────────────────────────────────────────────────────────

/// A [`KvStore`] with typed reads and serialised writes.
pub struct Storage<S> {
  kv:     S,
  writer: Mutex<()>,
}

impl<S: KvStore> Storage<S> {
  pub fn new(kv: S) -> Self {
    Self { kv, writer: Mutex::new(()) }
  }

  pub fn backend(&self) -> &S { &self.kv }

  async fn raw(&self, key: StorageKey) -> Result<Option<String>> {
    self.kv.get(key).await.map_err(Error::storage)
  }

  /// Read a list of records. Never fails on bad data, only on backend errors.
  pub async fn list<T: DeserializeOwned>(&self, key: StorageKey) -> Result<Vec<T>> {
    Ok(decode_list(key, self.raw(key).await?))
  }

  /// Read a single value, `None` if absent or malformed.
  pub async fn value<T: DeserializeOwned>(&self, key: StorageKey) -> Result<Option<T>> {
    Ok(decode_value(key, self.raw(key).await?))
  }

  /// Take the writer lock. Concurrent callers queue here, so every
  /// read-modify-write inside the transaction is a critical section.
  pub async fn transaction(&self) -> Transaction<'_, S> {
    Transaction {
      storage: self,
      _guard:  self.writer.lock().await,
      staged:  BTreeMap::new(),
    }
  }
}

// ─── Transaction ─────────────────────────────────────────────────────────────

/// Staged writes under the writer lock. Reads see staged values.
///
/// Dropping a transaction without calling [`Transaction::commit`] discards
/// every staged write.
pub struct Transaction<'a, S> {
  storage: &'a Storage<S>,
  _guard:  MutexGuard<'a, ()>,
  staged:  BTreeMap<StorageKey, Option<String>>,
}

impl<S: KvStore> Transaction<'_, S> {
  async fn raw(&self, key: StorageKey) -> Result<Option<String>> {
    match self.staged.get(&key) {
      Some(staged) => Ok(staged.clone()),
      None => self.storage.raw(key).await,
    }
  }

  pub async fn list<T: DeserializeOwned>(&self, key: StorageKey) -> Result<Vec<T>> {
    Ok(decode_list(key, self.raw(key).await?))
  }

  pub async fn value<T: DeserializeOwned>(&self, key: StorageKey) -> Result<Option<T>> {
    Ok(decode_value(key, self.raw(key).await?))
  }

  pub fn put<T: Serialize + ?Sized>(&mut self, key: StorageKey, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    self.staged.insert(key, Some(raw));
    Ok(())
  }

  pub fn remove(&mut self, key: StorageKey) {
    self.staged.insert(key, None);
  }

  /// Flush every staged write in one atomic batch.
  pub async fn commit(self) -> Result<()> {
    if self.staged.is_empty() {
      return Ok(());
    }
    let batch = self
      .staged
      .into_iter()
      .map(|(key, value)| match value {
        Some(raw) => KvOp::Set(key, raw),
        None => KvOp::Remove(key),
      })
      .collect();
    self.storage.kv.apply(batch).await.map_err(Error::storage)
  }
}

#[cfg(test)]
mod tests {
  use serde::Deserialize;

  use super::*;
  use crate::kv::MemoryStore;

  #[derive(Debug, PartialEq, Serialize, Deserialize)]
  #[serde(deny_unknown_fields)]
  struct Row {
    id:   u32,
    name: String,
  }

  fn row(id: u32) -> Row { Row { id, name: format!("row-{id}") } }

  #[tokio::test]
  async fn missing_key_reads_empty() {
    let s = Storage::new(MemoryStore::new());
    let rows: Vec<Row> = s.list(StorageKey::Notes).await.unwrap();
    assert!(rows.is_empty());
    let one: Option<Row> = s.value(StorageKey::Session).await.unwrap();
    assert!(one.is_none());
  }

  #[tokio::test]
  async fn corrupt_json_reads_empty() {
    let kv = MemoryStore::new();
    kv.set(StorageKey::Notes, "{not json".into()).await.unwrap();
    kv.set(StorageKey::Session, "[[[".into()).await.unwrap();
    let s = Storage::new(kv);

    let rows: Vec<Row> = s.list(StorageKey::Notes).await.unwrap();
    assert!(rows.is_empty());
    let one: Option<Row> = s.value(StorageKey::Session).await.unwrap();
    assert!(one.is_none());
  }

  #[tokio::test]
  async fn unknown_shape_records_are_dropped() {
    let kv = MemoryStore::new();
    kv.set(
      StorageKey::Notes,
      r#"[{"id":1,"name":"a"},{"id":2},{"id":3,"name":"c","extra":true},"junk"]"#.into(),
    )
    .await
    .unwrap();
    let s = Storage::new(kv);

    let rows: Vec<Row> = s.list(StorageKey::Notes).await.unwrap();
    assert_eq!(rows, vec![Row { id: 1, name: "a".into() }]);
  }

  #[tokio::test]
  async fn transaction_reads_its_own_writes() {
    let s = Storage::new(MemoryStore::new());
    let mut tx = s.transaction().await;
    tx.put(StorageKey::Notes, &[row(1)]).unwrap();

    let staged: Vec<Row> = tx.list(StorageKey::Notes).await.unwrap();
    assert_eq!(staged, vec![row(1)]);
    tx.commit().await.unwrap();

    let committed: Vec<Row> = s.list(StorageKey::Notes).await.unwrap();
    assert_eq!(committed, vec![row(1)]);
  }

  #[tokio::test]
  async fn dropped_transaction_writes_nothing() {
    let s = Storage::new(MemoryStore::new());
    {
      let mut tx = s.transaction().await;
      tx.put(StorageKey::Notes, &[row(1)]).unwrap();
      tx.remove(StorageKey::Session);
    }
    assert_eq!(s.backend().get(StorageKey::Notes).await.unwrap(), None);
  }

  #[tokio::test]
  async fn staged_remove_hides_committed_value() {
    let s = Storage::new(MemoryStore::new());
    let mut tx = s.transaction().await;
    tx.put(StorageKey::Session, &row(7)).unwrap();
    tx.commit().await.unwrap();

    let mut tx = s.transaction().await;
    tx.remove(StorageKey::Session);
    let seen: Option<Row> = tx.value(StorageKey::Session).await.unwrap();
    assert!(seen.is_none());
    tx.commit().await.unwrap();
    assert_eq!(s.backend().get(StorageKey::Session).await.unwrap(), None);
  }

  #[tokio::test]
  async fn reads_are_independent_copies() {
    let s = Storage::new(MemoryStore::new());
    let mut tx = s.transaction().await;
    tx.put(StorageKey::Notes, &[row(1)]).unwrap();
    tx.commit().await.unwrap();

    let mut first: Vec<Row> = s.list(StorageKey::Notes).await.unwrap();
    first[0].name = "changed".into();
    let second: Vec<Row> = s.list(StorageKey::Notes).await.unwrap();
    assert_eq!(second[0].name, "row-1");
  }
}
