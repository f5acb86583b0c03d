//! [`Vault`]: the command/query surface a view layer talks to.
//!
//! Every call takes the caller's session explicitly. The vault checks the
//! [`policy`](crate::policy) before touching a component, records denials,
//! and otherwise delegates to the component, which records its own audit
//! entry in the same transaction as the mutation.

use std::{sync::Arc, time::Duration};

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  audit::{ANONYMOUS, AuditAction, AuditEntry, AuditLog},
  clock::{Clock, SystemClock},
  config::VaultConfig,
  context::Context,
  error::Entity,
  file::{DecodedFile, FileRecord, FileStore, NewFile},
  identity::{Identity, IdentityRegistry, Role},
  kv::{KvStore, StorageKey},
  note::{Note, NoteStore},
  policy::{Action, can_access},
  preview::{FetchMode, FetchedImage, ImageSource, PreviewOutcome, fetch_with_fallback},
  session::{Session, SessionManager},
};

/// Result of [`Vault::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
  pub identity: Identity,
  /// Present when `auto_login_on_register` is enabled.
  pub session:  Option<Session>,
}

/// A successful image preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
  pub mode:  FetchMode,
  pub image: FetchedImage,
}

fn actor(session: Option<&Session>) -> &str {
  session.map_or(ANONYMOUS, |s| s.email.as_str())
}

pub struct Vault<S> {
  ctx:        Arc<Context<S>>,
  identities: IdentityRegistry<S>,
  sessions:   SessionManager<S>,
  notes:      NoteStore<S>,
  files:      FileStore<S>,
  audit:      AuditLog<S>,
}

impl<S: KvStore> Vault<S> {
  pub fn new(kv: S, config: VaultConfig) -> Self {
    Self::with_clock(kv, config, Arc::new(SystemClock))
  }

  pub fn with_clock(kv: S, config: VaultConfig, clock: Arc<dyn Clock>) -> Self {
    let ctx = Arc::new(Context::new(kv, clock, config));
    let audit = AuditLog::new(ctx.clone());
    Self {
      identities: IdentityRegistry::new(ctx.clone(), audit.clone()),
      sessions: SessionManager::new(ctx.clone(), audit.clone()),
      notes: NoteStore::new(ctx.clone(), audit.clone()),
      files: FileStore::new(ctx.clone(), audit.clone()),
      audit,
      ctx,
    }
  }

  pub fn config(&self) -> &VaultConfig { &self.ctx.config }

  pub fn backend(&self) -> &S { self.ctx.storage.backend() }

  // ── Policy ────────────────────────────────────────────────────────────────

  async fn deny(
    &self,
    session: Option<&Session>,
    operation: &str,
    resource: Option<Uuid>,
  ) -> Error {
    warn!(actor = actor(session), operation, ?resource, "access denied");
    let recorded = self
      .audit
      .append(
        actor(session),
        AuditAction::AccessDenied,
        json!({ "operation": operation, "resourceId": resource }),
      )
      .await;
    match recorded {
      Ok(_) => Error::AccessDenied(operation.to_owned()),
      Err(e) => e,
    }
  }

  /// `session` if it is still the stored session and has not expired.
  /// A caller holding a copy of an ended or expired session gets `None`.
  async fn live<'a>(&self, session: Option<&'a Session>) -> Result<Option<&'a Session>> {
    let Some(session) = session else { return Ok(None) };
    if session.is_expired_at(self.ctx.now()) {
      return Ok(None);
    }
    let stored = self.ctx.storage.value::<Session>(StorageKey::Session).await?;
    Ok(stored.is_some_and(|s| s.token == session.token).then_some(session))
  }

  async fn authorize(
    &self,
    session: Option<&Session>,
    owner: Option<Uuid>,
    action: Action,
    operation: &str,
    resource: Option<Uuid>,
  ) -> Result<()> {
    if can_access(self.live(session).await?, owner, action) {
      Ok(())
    } else {
      Err(self.deny(session, operation, resource).await)
    }
  }

  async fn require_session<'a>(
    &self,
    session: Option<&'a Session>,
    operation: &str,
  ) -> Result<&'a Session> {
    match self.live(session).await? {
      Some(live) => Ok(live),
      None => Err(self.deny(session, operation, None).await),
    }
  }

  // ── Identity and session ─────────────────────────────────────────────────

  /// Create an account. With `auto_login_on_register` the new session is
  /// started in the same step; either way one `register` entry is recorded.
  pub async fn register(
    &self,
    session: Option<&Session>,
    email: &str,
    credential: &str,
    role: Role,
  ) -> Result<Registration> {
    // Anyone may register; the session only names the actor.
    let session = self.live(session).await?;
    if !self.ctx.config.auto_login_on_register {
      let identity = self
        .identities
        .register(actor(session), email, credential, role)
        .await?;
      return Ok(Registration { identity, session: None });
    }

    let mut tx = self.ctx.storage.transaction().await;
    let identity = self.identities.register_in(&mut tx, email, credential, role).await?;
    let started = self.sessions.start_in(&mut tx, &identity)?;
    self
      .identities
      .record_registration(&mut tx, actor(session), &identity)
      .await?;
    tx.commit().await?;

    info!(email = %identity.email, "registered and logged in");
    Ok(Registration { identity, session: Some(started) })
  }

  pub async fn login(&self, email: &str, credential: &str) -> Result<Session> {
    let identity = self.identities.authenticate(email, credential).await?;
    self.sessions.start_session(&identity).await
  }

  /// End `session`. `None` if it was not the live session, in which case
  /// nothing is recorded.
  pub async fn logout(&self, session: Option<&Session>) -> Result<Option<Session>> {
    if self.live(session).await?.is_none() {
      return Ok(None);
    }
    self.sessions.end_session().await
  }

  pub async fn current_session(&self) -> Result<Option<Session>> {
    self.sessions.current_session().await
  }

  pub async fn all_users(&self, session: Option<&Session>) -> Result<Vec<Identity>> {
    self.authorize(session, None, Action::Read, "user_list_all", None).await?;
    self.identities.all().await
  }

  // ── Notes ────────────────────────────────────────────────────────────────

  pub async fn create_note(
    &self,
    session: Option<&Session>,
    title: &str,
    content: &str,
  ) -> Result<Note> {
    let session = self.require_session(session, "note_create").await?;
    self
      .authorize(Some(session), Some(session.user_id), Action::Write, "note_create", None)
      .await?;
    self.notes.create(&session.email, session.user_id, title, content).await
  }

  async fn existing_note(&self, id: Uuid) -> Result<Note> {
    self.notes.get(id).await?.ok_or(Error::NotFound(Entity::Note, id))
  }

  pub async fn note(&self, session: Option<&Session>, id: Uuid) -> Result<Note> {
    let session = self.require_session(session, "note_read").await?;
    let note = self.existing_note(id).await?;
    self
      .authorize(Some(session), Some(note.owner_id), Action::Read, "note_read", Some(id))
      .await?;
    Ok(note)
  }

  /// Edit a note. Only its owner may; admins have read access only.
  pub async fn update_note(
    &self,
    session: Option<&Session>,
    id: Uuid,
    title: &str,
    content: &str,
  ) -> Result<Note> {
    let session = self.require_session(session, "note_update").await?;
    let note = self.existing_note(id).await?;
    self
      .authorize(Some(session), Some(note.owner_id), Action::Write, "note_update", Some(id))
      .await?;
    self.notes.update(&session.email, id, title, content).await
  }

  /// Delete a note. `None` if it did not exist.
  pub async fn delete_note(&self, session: Option<&Session>, id: Uuid) -> Result<Option<Note>> {
    let session = self.require_session(session, "note_delete").await?;
    let Some(note) = self.notes.get(id).await? else {
      return Ok(None);
    };
    self
      .authorize(Some(session), Some(note.owner_id), Action::Write, "note_delete", Some(id))
      .await?;
    self.notes.delete(&session.email, id).await
  }

  /// The session owner's notes.
  pub async fn notes(&self, session: Option<&Session>) -> Result<Vec<Note>> {
    self.search_notes(session, None).await
  }

  /// The session owner's notes matching `query`; empty matches everything.
  pub async fn search_notes(
    &self,
    session: Option<&Session>,
    query: Option<&str>,
  ) -> Result<Vec<Note>> {
    let session = self.require_session(session, "note_list").await?;
    self
      .authorize(Some(session), Some(session.user_id), Action::Read, "note_list", None)
      .await?;
    self.notes.search(session.user_id, query).await
  }

  /// Every note of every owner. Admin only.
  pub async fn all_notes(&self, session: Option<&Session>) -> Result<Vec<Note>> {
    self.authorize(session, None, Action::Read, "note_list_all", None).await?;
    self.notes.all().await
  }

  // ── Files ────────────────────────────────────────────────────────────────

  pub async fn upload_file(&self, session: Option<&Session>, file: NewFile) -> Result<FileRecord> {
    let session = self.require_session(session, "file_upload").await?;
    self
      .authorize(Some(session), Some(session.user_id), Action::Write, "file_upload", None)
      .await?;
    self.files.upload(&session.email, session.user_id, file).await
  }

  async fn existing_file(&self, id: Uuid) -> Result<FileRecord> {
    self.files.get(id).await?.ok_or(Error::NotFound(Entity::File, id))
  }

  /// Decoded content for a download.
  pub async fn download_file(&self, session: Option<&Session>, id: Uuid) -> Result<DecodedFile> {
    let session = self.require_session(session, "file_download").await?;
    let file = self.existing_file(id).await?;
    self
      .authorize(Some(session), Some(file.owner_id), Action::Read, "file_download", Some(id))
      .await?;
    self.files.decode(id).await
  }

  /// Delete a file. `None` if it did not exist.
  pub async fn delete_file(
    &self,
    session: Option<&Session>,
    id: Uuid,
  ) -> Result<Option<FileRecord>> {
    let session = self.require_session(session, "file_delete").await?;
    let Some(file) = self.files.get(id).await? else {
      return Ok(None);
    };
    self
      .authorize(Some(session), Some(file.owner_id), Action::Write, "file_delete", Some(id))
      .await?;
    self.files.delete(&session.email, id).await
  }

  pub async fn files(&self, session: Option<&Session>) -> Result<Vec<FileRecord>> {
    let session = self.require_session(session, "file_list").await?;
    self
      .authorize(Some(session), Some(session.user_id), Action::Read, "file_list", None)
      .await?;
    self.files.list_by_owner(session.user_id).await
  }

  /// Every file of every owner. Admin only.
  pub async fn all_files(&self, session: Option<&Session>) -> Result<Vec<FileRecord>> {
    self.authorize(session, None, Action::Read, "file_list_all", None).await?;
    self.files.all().await
  }

  // ── Audit ────────────────────────────────────────────────────────────────

  /// Newest-first audit entries. Any signed-in session may read the log.
  pub async fn audit_log(
    &self,
    session: Option<&Session>,
    limit: Option<usize>,
  ) -> Result<Vec<AuditEntry>> {
    self.require_session(session, "audit_read").await?;
    self.audit.recent(limit).await
  }

  // ── Remote image preview ─────────────────────────────────────────────────

  /// Fetch `url` through `source` with the CORS-then-opaque fallback and
  /// record the outcome either way.
  pub async fn preview_image<I: ImageSource>(
    &self,
    session: Option<&Session>,
    url: &str,
    source: &I,
  ) -> Result<Preview> {
    let session = self.require_session(session, "image_preview").await?;
    let url = url.trim();
    if url.is_empty() {
      return Err(Error::Validation("image URL is required".into()));
    }

    let timeout = Duration::from_secs(self.ctx.config.preview_timeout_secs);
    match fetch_with_fallback(source, url, timeout).await {
      PreviewOutcome::Loaded { mode, image } => {
        self
          .audit
          .append(
            &session.email,
            AuditAction::ImagePreviewed,
            json!({
              "url": url,
              "mode": mode,
              "contentType": image.content_type,
              "size": image.bytes.len(),
            }),
          )
          .await?;
        Ok(Preview { mode, image })
      }
      PreviewOutcome::Failed { cors, opaque } => {
        self
          .audit
          .append(
            &session.email,
            AuditAction::ImagePreviewFailed,
            json!({ "url": url, "cors": cors, "opaque": opaque }),
          )
          .await?;
        Err(Error::RemoteFetchFailed(opaque))
      }
    }
  }
}
