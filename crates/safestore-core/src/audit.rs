//! Append-only audit trail with a fixed retention bound.
//!
//! Entries are stored newest first. Appending past the retention bound
//! evicts from the tail, so the oldest entries go first.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::{
  Result,
  context::Context,
  kv::{KvStore, StorageKey},
  storage::Transaction,
};

/// Actor recorded when no session is present.
pub const ANONYMOUS: &str = "Anonymous";

/// The closed set of auditable actions.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditAction {
  Register,
  Login,
  Logout,
  SessionExpired,
  NoteCreated,
  NoteUpdated,
  NoteDeleted,
  FileUploaded,
  FileDeleted,
  ImagePreviewed,
  ImagePreviewFailed,
  AccessDenied,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuditEntry {
  pub id:          Uuid,
  pub timestamp:   DateTime<Utc>,
  /// Email of the acting session, or [`ANONYMOUS`].
  pub actor_email: String,
  pub action:      AuditAction,
  /// Free-form payload; never carries file content.
  pub details:     serde_json::Value,
}

pub struct AuditLog<S> {
  ctx: Arc<Context<S>>,
}

impl<S> Clone for AuditLog<S> {
  fn clone(&self) -> Self { Self { ctx: self.ctx.clone() } }
}

impl<S: KvStore> AuditLog<S> {
  pub(crate) fn new(ctx: Arc<Context<S>>) -> Self { Self { ctx } }

  fn retention(&self) -> usize { self.ctx.config.audit_retention.max(1) }

  /// Record one entry in its own transaction.
  pub async fn append(
    &self,
    actor_email: &str,
    action: AuditAction,
    details: serde_json::Value,
  ) -> Result<AuditEntry> {
    let mut tx = self.ctx.storage.transaction().await;
    let entry = self.append_in(&mut tx, actor_email, action, details).await?;
    tx.commit().await?;
    Ok(entry)
  }

  /// Record one entry as part of a caller's transaction, so the entry and
  /// the mutation it describes land together.
  pub(crate) async fn append_in(
    &self,
    tx: &mut Transaction<'_, S>,
    actor_email: &str,
    action: AuditAction,
    details: serde_json::Value,
  ) -> Result<AuditEntry> {
    let actor_email = match actor_email.trim() {
      "" => ANONYMOUS,
      email => email,
    };
    let entry = AuditEntry {
      id: Uuid::new_v4(),
      timestamp: self.ctx.now(),
      actor_email: actor_email.to_owned(),
      action,
      details,
    };

    let mut entries: Vec<AuditEntry> = tx.list(StorageKey::Audit).await?;
    entries.insert(0, entry.clone());
    entries.truncate(self.retention());
    tx.put(StorageKey::Audit, &entries)?;

    debug!(action = %action, actor = %entry.actor_email, "audit entry recorded");
    Ok(entry)
  }

  /// Up to `limit` entries, newest first. `None` returns everything retained.
  pub async fn recent(&self, limit: Option<usize>) -> Result<Vec<AuditEntry>> {
    let mut entries: Vec<AuditEntry> = self.ctx.storage.list(StorageKey::Audit).await?;
    if let Some(limit) = limit {
      entries.truncate(limit);
    }
    Ok(entries)
  }
}
