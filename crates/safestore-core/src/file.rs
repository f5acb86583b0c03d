//! File Store: per-owner file records with content embedded inline as a
//! `data:` URL.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
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

/// MIME type used when the uploader supplies none.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

// ─── Records ─────────────────────────────────────────────────────────────────

/// An uploaded file. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileRecord {
  pub id:              Uuid,
  pub owner_id:        Uuid,
  pub name:            String,
  pub mime_type:       String,
  pub size_bytes:      u64,
  /// `data:<mime>;base64,<payload>`
  pub encoded_content: String,
  pub uploaded_at:     DateTime<Utc>,
}

/// Input to [`FileStore::upload`].
#[derive(Debug, Clone)]
pub struct NewFile {
  pub name:      String,
  pub mime_type: String,
  pub content:   Vec<u8>,
}

/// Raw content reconstructed for a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFile {
  pub name:      String,
  pub mime_type: String,
  pub bytes:     Vec<u8>,
}

// ─── data: URLs ──────────────────────────────────────────────────────────────

pub fn encode_data_url(mime_type: &str, bytes: &[u8]) -> String {
  format!("data:{mime_type};base64,{}", B64.encode(bytes))
}

/// Split a base64 `data:` URL into its MIME type (if any) and payload bytes.
/// `None` if the text is not a base64 `data:` URL.
pub fn decode_data_url(url: &str) -> Option<(Option<String>, Vec<u8>)> {
  let (header, payload) = url.strip_prefix("data:")?.split_once(',')?;
  let mime = header.strip_suffix(";base64")?;
  let bytes = B64.decode(payload).ok()?;
  let mime = (!mime.is_empty()).then(|| mime.to_owned());
  Some((mime, bytes))
}

// ─── Store ───────────────────────────────────────────────────────────────────

pub struct FileStore<S> {
  ctx:   Arc<Context<S>>,
  audit: AuditLog<S>,
}

impl<S> Clone for FileStore<S> {
  fn clone(&self) -> Self {
    Self { ctx: self.ctx.clone(), audit: self.audit.clone() }
  }
}

impl<S: KvStore> FileStore<S> {
  pub(crate) fn new(ctx: Arc<Context<S>>, audit: AuditLog<S>) -> Self {
    Self { ctx, audit }
  }

  /// Encode and store `file` for `owner_id`. The audit entry carries the
  /// name and size, never the content.
  pub async fn upload(
    &self,
    actor_email: &str,
    owner_id: Uuid,
    file: NewFile,
  ) -> Result<FileRecord> {
    let name = file.name.trim();
    if name.is_empty() {
      return Err(Error::Validation("file name is required".into()));
    }
    let size_bytes = file.content.len() as u64;
    if size_bytes > self.ctx.config.max_file_bytes {
      return Err(Error::Validation(format!(
        "file is {size_bytes} bytes; the limit is {}",
        self.ctx.config.max_file_bytes
      )));
    }
    let mime_type = match file.mime_type.trim() {
      "" => DEFAULT_MIME_TYPE.to_owned(),
      mime => mime.to_owned(),
    };

    let record = FileRecord {
      id: Uuid::new_v4(),
      owner_id,
      name: name.to_owned(),
      encoded_content: encode_data_url(&mime_type, &file.content),
      mime_type,
      size_bytes,
      uploaded_at: self.ctx.now(),
    };

    let mut tx = self.ctx.storage.transaction().await;
    let mut files: Vec<FileRecord> = tx.list(StorageKey::Files).await?;
    files.push(record.clone());
    tx.put(StorageKey::Files, &files)?;
    self
      .audit
      .append_in(
        &mut tx,
        actor_email,
        AuditAction::FileUploaded,
        json!({
          "fileId": record.id,
          "name": record.name,
          "size": record.size_bytes,
          "mimeType": record.mime_type,
        }),
      )
      .await?;
    tx.commit().await?;

    debug!(file_id = %record.id, size = record.size_bytes, "file uploaded");
    Ok(record)
  }

  /// Reconstruct the original bytes and MIME type.
  pub async fn decode(&self, file_id: Uuid) -> Result<DecodedFile> {
    let record = self
      .get(file_id)
      .await?
      .ok_or(Error::NotFound(Entity::File, file_id))?;
    let (mime, bytes) =
      decode_data_url(&record.encoded_content).ok_or(Error::CorruptContent(file_id))?;
    Ok(DecodedFile {
      name: record.name,
      mime_type: mime.unwrap_or(record.mime_type),
      bytes,
    })
  }

  /// Remove a file. `None` (and no audit entry) if it did not exist.
  pub async fn delete(&self, actor_email: &str, file_id: Uuid) -> Result<Option<FileRecord>> {
    let mut tx = self.ctx.storage.transaction().await;
    let mut files: Vec<FileRecord> = tx.list(StorageKey::Files).await?;
    let Some(index) = files.iter().position(|f| f.id == file_id) else {
      return Ok(None);
    };

    let removed = files.remove(index);
    tx.put(StorageKey::Files, &files)?;
    self
      .audit
      .append_in(
        &mut tx,
        actor_email,
        AuditAction::FileDeleted,
        json!({ "fileId": removed.id, "name": removed.name }),
      )
      .await?;
    tx.commit().await?;

    debug!(file_id = %file_id, "file deleted");
    Ok(Some(removed))
  }

  pub async fn get(&self, file_id: Uuid) -> Result<Option<FileRecord>> {
    Ok(self.all().await?.into_iter().find(|f| f.id == file_id))
  }

  pub async fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<FileRecord>> {
    let mut files = self.all().await?;
    files.retain(|f| f.owner_id == owner_id);
    Ok(files)
  }

  /// Every file regardless of owner. Callers gate this behind the policy.
  pub async fn all(&self) -> Result<Vec<FileRecord>> {
    self.ctx.storage.list(StorageKey::Files).await
  }
}
