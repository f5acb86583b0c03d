//! Identity Registry: registered accounts, unique by normalised email.
//!
//! Credentials are kept exactly as supplied. Nothing here hashes them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{
  Error, Result,
  audit::{AuditAction, AuditLog},
  context::Context,
  kv::{KvStore, StorageKey},
  storage::Transaction,
};

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
  #[default]
  User,
  Admin,
}

/// A registered account. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Identity {
  pub id:         Uuid,
  /// Trimmed and lowercased at registration.
  pub email:      String,
  pub credential: String,
  pub role:       Role,
  pub created_at: DateTime<Utc>,
}

/// Trim and lowercase an email address for storage and comparison.
pub fn normalize_email(email: &str) -> String { email.trim().to_lowercase() }

pub struct IdentityRegistry<S> {
  ctx:   Arc<Context<S>>,
  audit: AuditLog<S>,
}

impl<S> Clone for IdentityRegistry<S> {
  fn clone(&self) -> Self {
    Self { ctx: self.ctx.clone(), audit: self.audit.clone() }
  }
}

impl<S: KvStore> IdentityRegistry<S> {
  pub(crate) fn new(ctx: Arc<Context<S>>, audit: AuditLog<S>) -> Self {
    Self { ctx, audit }
  }

  /// Create an account and record a `register` audit entry.
  ///
  /// Fails with [`Error::DuplicateUser`] if the normalised email is taken.
  pub async fn register(
    &self,
    actor_email: &str,
    email: &str,
    credential: &str,
    role: Role,
  ) -> Result<Identity> {
    let mut tx = self.ctx.storage.transaction().await;
    let identity = self.register_in(&mut tx, email, credential, role).await?;
    self.record_registration(&mut tx, actor_email, &identity).await?;
    tx.commit().await?;
    Ok(identity)
  }

  pub(crate) async fn register_in(
    &self,
    tx: &mut Transaction<'_, S>,
    email: &str,
    credential: &str,
    role: Role,
  ) -> Result<Identity> {
    let email = normalize_email(email);
    if email.is_empty() || credential.is_empty() {
      return Err(Error::Validation("email and password required".into()));
    }

    let mut users: Vec<Identity> = tx.list(StorageKey::Users).await?;
    if users.iter().any(|u| normalize_email(&u.email) == email) {
      return Err(Error::DuplicateUser(email));
    }

    let identity = Identity {
      id: Uuid::new_v4(),
      email,
      credential: credential.to_owned(),
      role,
      created_at: self.ctx.now(),
    };
    users.push(identity.clone());
    tx.put(StorageKey::Users, &users)?;

    info!(email = %identity.email, role = %identity.role, "user registered");
    Ok(identity)
  }

  pub(crate) async fn record_registration(
    &self,
    tx: &mut Transaction<'_, S>,
    actor_email: &str,
    identity: &Identity,
  ) -> Result<()> {
    self
      .audit
      .append_in(
        tx,
        actor_email,
        AuditAction::Register,
        json!({ "email": identity.email, "role": identity.role }),
      )
      .await?;
    Ok(())
  }

  pub async fn find_by_email(&self, email: &str) -> Result<Option<Identity>> {
    let email = normalize_email(email);
    let users: Vec<Identity> = self.ctx.storage.list(StorageKey::Users).await?;
    Ok(users.into_iter().find(|u| normalize_email(&u.email) == email))
  }

  pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>> {
    let users: Vec<Identity> = self.ctx.storage.list(StorageKey::Users).await?;
    Ok(users.into_iter().find(|u| u.id == id))
  }

  /// The identity whose normalised email matches and whose credential is
  /// byte-for-byte equal, else [`Error::InvalidCredentials`].
  pub async fn authenticate(&self, email: &str, credential: &str) -> Result<Identity> {
    match self.find_by_email(email).await? {
      Some(identity) if identity.credential == credential => Ok(identity),
      _ => Err(Error::InvalidCredentials),
    }
  }

  /// Every identity, unfiltered. Callers gate this behind the policy.
  pub async fn all(&self) -> Result<Vec<Identity>> {
    self.ctx.storage.list(StorageKey::Users).await
  }
}
