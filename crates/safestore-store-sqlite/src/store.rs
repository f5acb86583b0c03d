//! [`SqliteStore`]: the SQLite implementation of [`KvStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use safestore_core::kv::{KvOp, KvStore, StorageKey};
use tracing::debug;

use crate::{
  Error, Result,
  schema::{SCHEMA, SCHEMA_VERSION},
};

/// A vault store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    let version: i64 = self
      .conn
      .call(|conn| Ok(conn.query_row("PRAGMA user_version", [], |r| r.get(0))?))
      .await?;
    if version > SCHEMA_VERSION {
      return Err(Error::SchemaVersion(version));
    }

    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    debug!(from = version, to = SCHEMA_VERSION, "schema ready");
    Ok(())
  }
}

impl KvStore for SqliteStore {
  type Error = Error;

  async fn get(&self, key: StorageKey) -> Result<Option<String>> {
    let key = key.as_str().to_owned();
    let value = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row("SELECT value FROM kv WHERE key = ?1", rusqlite::params![key], |r| {
              r.get(0)
            })
            .optional()?,
        )
      })
      .await?;
    Ok(value)
  }

  async fn apply(&self, batch: Vec<KvOp>) -> Result<()> {
    let ops = batch.len();
    let updated_at = Utc::now().to_rfc3339();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for op in &batch {
          match op {
            KvOp::Set(key, value) => {
              tx.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE
                 SET value = excluded.value, updated_at = excluded.updated_at",
                rusqlite::params![key.as_str(), value, updated_at],
              )?;
            }
            KvOp::Remove(key) => {
              tx.execute("DELETE FROM kv WHERE key = ?1", rusqlite::params![key.as_str()])?;
            }
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;

    debug!(ops, "batch applied");
    Ok(())
  }
}
