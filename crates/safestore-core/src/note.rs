//! Note Store: per-owner notes with rich-text (HTML-capable) content.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::{
  Error, Result,
  audit::{AuditAction, AuditLog},
  context::Context,
  error::Entity,
  kv::{KvStore, StorageKey},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Note {
  pub id:         Uuid,
  /// Fixed at creation.
  pub owner_id:   Uuid,
  pub title:      String,
  pub content:    String,
  pub created_at: DateTime<Utc>,
  /// Never earlier than `created_at`; refreshed on every edit.
  pub updated_at: DateTime<Utc>,
}

impl Note {
  /// Case-insensitive substring match on title or content.
  pub fn matches(&self, query: &str) -> bool {
    let query = query.to_lowercase();
    self.title.to_lowercase().contains(&query)
      || self.content.to_lowercase().contains(&query)
  }
}

fn validated_title(title: &str) -> Result<String> {
  match title.trim() {
    "" => Err(Error::Validation("note title is required".into())),
    title => Ok(title.to_owned()),
  }
}

pub struct NoteStore<S> {
  ctx:   Arc<Context<S>>,
  audit: AuditLog<S>,
}

impl<S> Clone for NoteStore<S> {
  fn clone(&self) -> Self {
    Self { ctx: self.ctx.clone(), audit: self.audit.clone() }
  }
}

impl<S: KvStore> NoteStore<S> {
  pub(crate) fn new(ctx: Arc<Context<S>>, audit: AuditLog<S>) -> Self {
    Self { ctx, audit }
  }

  pub async fn create(
    &self,
    actor_email: &str,
    owner_id: Uuid,
    title: &str,
    content: &str,
  ) -> Result<Note> {
    let title = validated_title(title)?;
    let now = self.ctx.now();
    let note = Note {
      id: Uuid::new_v4(),
      owner_id,
      title,
      content: content.to_owned(),
      created_at: now,
      updated_at: now,
    };

    let mut tx = self.ctx.storage.transaction().await;
    let mut notes: Vec<Note> = tx.list(StorageKey::Notes).await?;
    notes.push(note.clone());
    tx.put(StorageKey::Notes, &notes)?;
    self
      .audit
      .append_in(
        &mut tx,
        actor_email,
        AuditAction::NoteCreated,
        json!({ "noteId": note.id, "title": note.title }),
      )
      .await?;
    tx.commit().await?;

    debug!(note_id = %note.id, "note created");
    Ok(note)
  }

  /// Replace title and content. Ownership is the caller's concern.
  pub async fn update(
    &self,
    actor_email: &str,
    note_id: Uuid,
    title: &str,
    content: &str,
  ) -> Result<Note> {
    let title = validated_title(title)?;

    let mut tx = self.ctx.storage.transaction().await;
    let mut notes: Vec<Note> = tx.list(StorageKey::Notes).await?;
    let note = notes
      .iter_mut()
      .find(|n| n.id == note_id)
      .ok_or(Error::NotFound(Entity::Note, note_id))?;

    note.title = title;
    note.content = content.to_owned();
    note.updated_at = self.ctx.now().max(note.created_at);
    let updated = note.clone();

    tx.put(StorageKey::Notes, &notes)?;
    self
      .audit
      .append_in(
        &mut tx,
        actor_email,
        AuditAction::NoteUpdated,
        json!({ "noteId": updated.id, "title": updated.title }),
      )
      .await?;
    tx.commit().await?;

    debug!(note_id = %note_id, "note updated");
    Ok(updated)
  }

  /// Remove a note. Returns the removed note, or `None` (and records
  /// nothing) if it did not exist.
  pub async fn delete(&self, actor_email: &str, note_id: Uuid) -> Result<Option<Note>> {
    let mut tx = self.ctx.storage.transaction().await;
    let mut notes: Vec<Note> = tx.list(StorageKey::Notes).await?;
    let Some(index) = notes.iter().position(|n| n.id == note_id) else {
      return Ok(None);
    };

    let removed = notes.remove(index);
    tx.put(StorageKey::Notes, &notes)?;
    self
      .audit
      .append_in(
        &mut tx,
        actor_email,
        AuditAction::NoteDeleted,
        json!({ "noteId": removed.id, "title": removed.title }),
      )
      .await?;
    tx.commit().await?;

    debug!(note_id = %note_id, "note deleted");
    Ok(Some(removed))
  }

  pub async fn get(&self, note_id: Uuid) -> Result<Option<Note>> {
    Ok(self.all().await?.into_iter().find(|n| n.id == note_id))
  }

  /// Notes owned by `owner_id`, in storage order.
  pub async fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<Note>> {
    let mut notes = self.all().await?;
    notes.retain(|n| n.owner_id == owner_id);
    Ok(notes)
  }

  /// The owner's notes matching `query`. An empty or absent query returns
  /// the owner's full list.
  pub async fn search(&self, owner_id: Uuid, query: Option<&str>) -> Result<Vec<Note>> {
    let mut notes = self.list_by_owner(owner_id).await?;
    if let Some(query) = query.filter(|q| !q.is_empty()) {
      notes.retain(|n| n.matches(query));
    }
    Ok(notes)
  }

  /// Every note regardless of owner. Callers gate this behind the policy.
  pub async fn all(&self) -> Result<Vec<Note>> {
    self.ctx.storage.list(StorageKey::Notes).await
  }
}

#[cfg(test)]
mod tests {
  use chrono::Duration;

  use super::*;
  use crate::{clock::ManualClock, config::VaultConfig, context::testing, kv::MemoryStore};

  fn store() -> (NoteStore<MemoryStore>, Arc<ManualClock>) {
    let (ctx, clock) = testing::context(VaultConfig::default());
    let audit = AuditLog::new(ctx.clone());
    (NoteStore::new(ctx, audit), clock)
  }

  #[tokio::test]
  async fn create_sets_timestamps_and_owner() {
    let (s, _) = store();
    let owner = Uuid::new_v4();
    let note = s.create("a@x.com", owner, " Todo ", "<b>buy</b> milk").await.unwrap();

    assert_eq!(note.owner_id, owner);
    assert_eq!(note.title, "Todo");
    assert_eq!(note.created_at, note.updated_at);
    assert_eq!(s.get(note.id).await.unwrap(), Some(note));
  }

  #[tokio::test]
  async fn update_refreshes_updated_at_only() {
    let (s, clock) = store();
    let owner = Uuid::new_v4();
    let note = s.create("a@x.com", owner, "Todo", "milk").await.unwrap();

    clock.advance(Duration::minutes(5));
    let updated = s.update("a@x.com", note.id, "Shopping", "eggs").await.unwrap();

    assert_eq!(updated.id, note.id);
    assert_eq!(updated.owner_id, owner);
    assert_eq!(updated.created_at, note.created_at);
    assert_eq!(updated.updated_at, note.created_at + Duration::minutes(5));
    assert_eq!(updated.title, "Shopping");
    assert_eq!(updated.content, "eggs");
  }

  #[tokio::test]
  async fn update_never_moves_updated_at_before_created_at() {
    let (s, clock) = store();
    let note = s.create("a@x.com", Uuid::new_v4(), "Todo", "").await.unwrap();
    clock.advance(Duration::hours(-1));
    let updated = s.update("a@x.com", note.id, "Todo", "x").await.unwrap();
    assert!(updated.updated_at >= updated.created_at);
  }

  #[tokio::test]
  async fn update_missing_note_is_not_found() {
    let (s, _) = store();
    let id = Uuid::new_v4();
    let err = s.update("a@x.com", id, "t", "c").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(Entity::Note, missing) if missing == id));
    assert!(s.audit.recent(None).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn blank_title_is_rejected() {
    let (s, _) = store();
    assert!(matches!(
      s.create("a@x.com", Uuid::new_v4(), "  ", "body").await,
      Err(Error::Validation(_))
    ));
    assert!(s.all().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn delete_records_last_title() {
    let (s, _) = store();
    let note = s.create("a@x.com", Uuid::new_v4(), "Todo", "milk").await.unwrap();

    let removed = s.delete("a@x.com", note.id).await.unwrap().unwrap();
    assert_eq!(removed.id, note.id);
    assert!(s.get(note.id).await.unwrap().is_none());

    let entries = s.audit.recent(None).await.unwrap();
    assert_eq!(entries[0].action, AuditAction::NoteDeleted);
    assert_eq!(entries[0].details["title"], "Todo");
  }

  #[tokio::test]
  async fn delete_missing_note_is_silent() {
    let (s, _) = store();
    assert!(s.delete("a@x.com", Uuid::new_v4()).await.unwrap().is_none());
    assert!(s.audit.recent(None).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn listing_is_per_owner() {
    let (s, _) = store();
    let (u, v) = (Uuid::new_v4(), Uuid::new_v4());
    let n1 = s.create("u@x.com", u, "one", "").await.unwrap();
    let n2 = s.create("u@x.com", u, "two", "").await.unwrap();
    s.create("v@x.com", v, "three", "").await.unwrap();

    let mine: Vec<Uuid> = s.list_by_owner(u).await.unwrap().iter().map(|n| n.id).collect();
    assert_eq!(mine, vec![n1.id, n2.id]);
    assert!(s.list_by_owner(v).await.unwrap().iter().all(|n| n.owner_id == v));
    assert_eq!(s.all().await.unwrap().len(), 3);
  }

  #[tokio::test]
  async fn search_matches_title_or_content_ignoring_case() {
    let (s, _) = store();
    let owner = Uuid::new_v4();
    let todo = s.create("a@x.com", owner, "Todo", "buy MILK").await.unwrap();
    let milk = s.create("a@x.com", owner, "Milk run", "").await.unwrap();
    s.create("a@x.com", owner, "Other", "bread").await.unwrap();
    s.create("b@x.com", Uuid::new_v4(), "milk", "milk").await.unwrap();

    let hits: Vec<Uuid> =
      s.search(owner, Some("milk")).await.unwrap().iter().map(|n| n.id).collect();
    assert_eq!(hits, vec![todo.id, milk.id]);
  }

  #[tokio::test]
  async fn empty_query_is_identity() {
    let (s, _) = store();
    let owner = Uuid::new_v4();
    s.create("a@x.com", owner, "a", "").await.unwrap();
    s.create("a@x.com", owner, "b", "").await.unwrap();

    let all = s.list_by_owner(owner).await.unwrap();
    assert_eq!(s.search(owner, Some("")).await.unwrap(), all);
    assert_eq!(s.search(owner, None).await.unwrap(), all);
  }
}
