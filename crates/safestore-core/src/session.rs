//! Session Manager: the single current session, persisted under `session`.
//!
//! A session snapshots the identity's email and role at login. Later changes
//! to the identity are not reflected until the next login.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{
  Result,
  audit::{AuditAction, AuditLog},
  context::Context,
  identity::{Identity, Role},
  kv::{KvStore, StorageKey},
  storage::Transaction,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Session {
  pub token:      Uuid,
  pub user_id:    Uuid,
  pub email:      String,
  pub role:       Role,
  pub issued_at:  DateTime<Utc>,
  pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
  pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    self.expires_at.is_some_and(|at| at <= now)
  }

  pub fn is_admin(&self) -> bool { self.role == Role::Admin }
}

pub struct SessionManager<S> {
  ctx:   Arc<Context<S>>,
  audit: AuditLog<S>,
}

impl<S> Clone for SessionManager<S> {
  fn clone(&self) -> Self {
    Self { ctx: self.ctx.clone(), audit: self.audit.clone() }
  }
}

impl<S: KvStore> SessionManager<S> {
  pub(crate) fn new(ctx: Arc<Context<S>>, audit: AuditLog<S>) -> Self {
    Self { ctx, audit }
  }

  /// Replace any existing session with a fresh one for `identity` and record
  /// a `login` entry.
  pub async fn start_session(&self, identity: &Identity) -> Result<Session> {
    let mut tx = self.ctx.storage.transaction().await;
    let session = self.start_in(&mut tx, identity)?;
    self
      .audit
      .append_in(
        &mut tx,
        &identity.email,
        AuditAction::Login,
        json!({ "email": identity.email, "role": identity.role }),
      )
      .await?;
    tx.commit().await?;

    info!(email = %session.email, "session started");
    Ok(session)
  }

  pub(crate) fn start_in(
    &self,
    tx: &mut Transaction<'_, S>,
    identity: &Identity,
  ) -> Result<Session> {
    let now = self.ctx.now();
    let session = Session {
      token:      Uuid::new_v4(),
      user_id:    identity.id,
      email:      identity.email.clone(),
      role:       identity.role,
      issued_at:  now,
      expires_at: self
        .ctx
        .config
        .session_ttl_hours
        .map(|hours| now + Duration::hours(hours)),
    };
    tx.put(StorageKey::Session, &session)?;
    Ok(session)
  }

  /// The live session, if any. An expired session is cleared from the store
  /// and recorded as `session_expired`.
  pub async fn current_session(&self) -> Result<Option<Session>> {
    let Some(session) = self.ctx.storage.value::<Session>(StorageKey::Session).await?
    else {
      return Ok(None);
    };
    if !session.is_expired_at(self.ctx.now()) {
      return Ok(Some(session));
    }

    let mut tx = self.ctx.storage.transaction().await;
    // Re-read under the lock; a concurrent login may have replaced it.
    match tx.value::<Session>(StorageKey::Session).await? {
      Some(stored) if stored.token == session.token => {
        tx.remove(StorageKey::Session);
        self
          .audit
          .append_in(
            &mut tx,
            &stored.email,
            AuditAction::SessionExpired,
            json!({ "email": stored.email, "expiresAt": stored.expires_at }),
          )
          .await?;
        tx.commit().await?;
        info!(email = %stored.email, "session expired");
        Ok(None)
      }
      Some(stored) if !stored.is_expired_at(self.ctx.now()) => Ok(Some(stored)),
      _ => Ok(None),
    }
  }

  /// Clear the session. Returns the ended session; `None` (and no audit
  /// entry) if there was none.
  pub async fn end_session(&self) -> Result<Option<Session>> {
    let mut tx = self.ctx.storage.transaction().await;
    let Some(session) = tx.value::<Session>(StorageKey::Session).await? else {
      return Ok(None);
    };
    tx.remove(StorageKey::Session);
    self
      .audit
      .append_in(
        &mut tx,
        &session.email,
        AuditAction::Logout,
        json!({ "email": session.email }),
      )
      .await?;
    tx.commit().await?;

    info!(email = %session.email, "session ended");
    Ok(Some(session))
  }
}
