//! Remote image preview: a two-stage fetch with a per-attempt timeout.
//!
//! The first attempt asks for a cross-origin checked response ([`FetchMode::Cors`]).
//! If that fails for any reason, the second asks for a plain, unchecked
//! response ([`FetchMode::Opaque`]). Only the vault records the outcome;
//! this module decides it.

use std::{future::Future, time::Duration};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FetchMode {
  Cors,
  Opaque,
}

/// Why a single fetch attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FetchFailure {
  #[error("network error: {0}")]
  Network(String),

  #[error("HTTP status {0}")]
  Status(u16),

  #[error("not an image (content type {0:?})")]
  NotAnImage(String),

  #[error("timed out")]
  Timeout,

  #[error("larger than {0} bytes")]
  TooLarge(u64),

  #[error("blocked by cross-origin policy")]
  CrossOriginBlocked,
}

/// A successfully retrieved image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
  pub content_type: String,
  pub bytes:        Vec<u8>,
}

/// Something that can retrieve the bytes behind a URL.
pub trait ImageSource: Send + Sync {
  fn fetch(
    &self,
    url: &str,
    mode: FetchMode,
  ) -> impl Future<Output = Result<FetchedImage, FetchFailure>> + Send;
}

/// The decided outcome of a preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewOutcome {
  Loaded {
    mode:  FetchMode,
    image: FetchedImage,
  },
  Failed {
    cors:   FetchFailure,
    opaque: FetchFailure,
  },
}

async fn attempt<I: ImageSource>(
  source: &I,
  url: &str,
  mode: FetchMode,
  timeout: Duration,
) -> Result<FetchedImage, FetchFailure> {
  let image = tokio::time::timeout(timeout, source.fetch(url, mode))
    .await
    .map_err(|_| FetchFailure::Timeout)??;

  let is_image = image
    .content_type
    .trim()
    .to_ascii_lowercase()
    .starts_with("image/");
  if !is_image {
    return Err(FetchFailure::NotAnImage(image.content_type));
  }
  Ok(image)
}

/// Try [`FetchMode::Cors`], then [`FetchMode::Opaque`], each bounded by
/// `timeout`.
pub async fn fetch_with_fallback<I: ImageSource>(
  source: &I,
  url: &str,
  timeout: Duration,
) -> PreviewOutcome {
  let cors = match attempt(source, url, FetchMode::Cors, timeout).await {
    Ok(image) => return PreviewOutcome::Loaded { mode: FetchMode::Cors, image },
    Err(failure) => failure,
  };
  debug!(url, error = %cors, "cors fetch failed, retrying opaque");

  match attempt(source, url, FetchMode::Opaque, timeout).await {
    Ok(image) => PreviewOutcome::Loaded { mode: FetchMode::Opaque, image },
    Err(opaque) => PreviewOutcome::Failed { cors, opaque },
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use std::sync::Mutex;

  use super::*;

  /// Scripted responses, one per mode, recording which modes were asked for.
  pub struct ScriptedSource {
    pub cors:   Result<FetchedImage, FetchFailure>,
    pub opaque: Result<FetchedImage, FetchFailure>,
    pub delay:  Option<Duration>,
    pub calls:  Mutex<Vec<FetchMode>>,
  }

  impl ScriptedSource {
    pub fn new(
      cors: Result<FetchedImage, FetchFailure>,
      opaque: Result<FetchedImage, FetchFailure>,
    ) -> Self {
      Self { cors, opaque, delay: None, calls: Mutex::new(Vec::new()) }
    }

    pub fn calls(&self) -> Vec<FetchMode> { self.calls.lock().unwrap().clone() }
  }

  impl ImageSource for ScriptedSource {
    async fn fetch(&self, _url: &str, mode: FetchMode) -> Result<FetchedImage, FetchFailure> {
      self.calls.lock().unwrap().push(mode);
      if let Some(delay) = self.delay {
        tokio::time::sleep(delay).await;
      }
      match mode {
        FetchMode::Cors => self.cors.clone(),
        FetchMode::Opaque => self.opaque.clone(),
      }
    }
  }

  pub fn png() -> FetchedImage {
    FetchedImage { content_type: "image/png".into(), bytes: vec![0x89, b'P', b'N', b'G'] }
  }

  const TIMEOUT: Duration = Duration::from_secs(10);

  #[tokio::test]
  async fn cors_success_skips_fallback() {
    let src = ScriptedSource::new(Ok(png()), Err(FetchFailure::Status(500)));
    let outcome = fetch_with_fallback(&src, "http://img", TIMEOUT).await;
    assert_eq!(outcome, PreviewOutcome::Loaded { mode: FetchMode::Cors, image: png() });
    assert_eq!(src.calls(), [FetchMode::Cors]);
  }

  #[tokio::test]
  async fn blocked_cors_falls_back_to_opaque() {
    let src = ScriptedSource::new(Err(FetchFailure::CrossOriginBlocked), Ok(png()));
    let outcome = fetch_with_fallback(&src, "http://img", TIMEOUT).await;
    assert_eq!(outcome, PreviewOutcome::Loaded { mode: FetchMode::Opaque, image: png() });
    assert_eq!(src.calls(), [FetchMode::Cors, FetchMode::Opaque]);
  }

  #[tokio::test]
  async fn non_image_content_is_a_failure() {
    let html = FetchedImage { content_type: "text/html".into(), bytes: b"<html>".to_vec() };
    let src = ScriptedSource::new(Ok(html.clone()), Ok(html));
    let outcome = fetch_with_fallback(&src, "http://page", TIMEOUT).await;
    assert_eq!(
      outcome,
      PreviewOutcome::Failed {
        cors:   FetchFailure::NotAnImage("text/html".into()),
        opaque: FetchFailure::NotAnImage("text/html".into()),
      }
    );
  }

  #[tokio::test(start_paused = true)]
  async fn slow_source_times_out_both_stages() {
    let mut src = ScriptedSource::new(Ok(png()), Ok(png()));
    src.delay = Some(Duration::from_secs(60));
    let outcome = fetch_with_fallback(&src, "http://slow", TIMEOUT).await;
    assert_eq!(
      outcome,
      PreviewOutcome::Failed { cors: FetchFailure::Timeout, opaque: FetchFailure::Timeout }
    );
  }
}
