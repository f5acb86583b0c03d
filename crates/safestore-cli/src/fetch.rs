//! [`HttpImageSource`]: remote image retrieval over HTTP.
//!
//! A [`FetchMode::Cors`] request carries an `Origin` header and only counts
//! if the response grants that origin through `Access-Control-Allow-Origin`.
//! A [`FetchMode::Opaque`] request is a plain GET. Bodies over the byte cap
//! are abandoned as soon as the cap is crossed.

use anyhow::{Context, Result};
use reqwest::{
  Client,
  header::{ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE, ORIGIN},
};
use safestore_core::preview::{FetchFailure, FetchMode, FetchedImage, ImageSource};
use tracing::debug;

/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct HttpImageSource {
  client:    Client,
  origin:    String,
  max_bytes: u64,
}

impl HttpImageSource {
  /// `origin` is what cross-origin checked requests present as their origin.
  /// Responses larger than `max_bytes` fail with [`FetchFailure::TooLarge`].
  pub fn new(origin: impl Into<String>, max_bytes: u64) -> Result<Self> {
    let client = Client::builder()
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client, origin: origin.into(), max_bytes })
  }

  fn allows_origin(&self, granted: Option<&str>) -> bool {
    matches!(granted.map(str::trim), Some(o) if o == "*" || o == self.origin)
  }
}

impl ImageSource for HttpImageSource {
  async fn fetch(&self, url: &str, mode: FetchMode) -> Result<FetchedImage, FetchFailure> {
    let mut req = self.client.get(url);
    if mode == FetchMode::Cors {
      req = req.header(ORIGIN, &self.origin);
    }

    let mut resp = req
      .send()
      .await
      .map_err(|e| FetchFailure::Network(e.to_string()))?;
    debug!(url, %mode, status = %resp.status(), "image response");

    if mode == FetchMode::Cors {
      let granted = resp
        .headers()
        .get(ACCESS_CONTROL_ALLOW_ORIGIN)
        .and_then(|v| v.to_str().ok());
      if !self.allows_origin(granted) {
        return Err(FetchFailure::CrossOriginBlocked);
      }
    }

    let status = resp.status();
    if !status.is_success() {
      return Err(FetchFailure::Status(status.as_u16()));
    }

    let content_type = resp
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .unwrap_or_default()
      .to_owned();
    if resp.content_length().is_some_and(|len| len > self.max_bytes) {
      return Err(FetchFailure::TooLarge(self.max_bytes));
    }

    let mut bytes = Vec::new();
    while let Some(chunk) = resp
      .chunk()
      .await
      .map_err(|e| FetchFailure::Network(e.to_string()))?
    {
      if (bytes.len() + chunk.len()) as u64 > self.max_bytes {
        return Err(FetchFailure::TooLarge(self.max_bytes));
      }
      bytes.extend_from_slice(&chunk);
    }

    Ok(FetchedImage { content_type, bytes })
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use axum::{
    Router,
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
    routing::get,
  };
  use safestore_core::{
    Error, Vault, VaultConfig,
    identity::Role,
    kv::MemoryStore,
    preview::{PreviewOutcome, fetch_with_fallback},
  };
  use tokio::net::TcpListener;

  use super::*;

  const GIF: &[u8] = b"GIF89a\x01\x00\x01\x00";
  const ORIGIN_URL: &str = "http://app.test";
  const TIMEOUT: Duration = Duration::from_secs(5);

  async fn echo_origin(headers: HeaderMap) -> Response {
    let mut resp = ([(header::CONTENT_TYPE, "image/gif")], GIF).into_response();
    if let Some(origin) = headers.get(header::ORIGIN).cloned() {
      resp.headers_mut().insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }
    resp
  }

  async fn serve() -> String {
    let app = Router::new()
      .route("/shared.gif", get(echo_origin))
      .route(
        "/private.gif",
        get(|| async { ([(header::CONTENT_TYPE, "image/gif")], GIF) }),
      )
      .route(
        "/huge.gif",
        get(|| async { ([(header::CONTENT_TYPE, "image/gif")], vec![0u8; 4096]) }),
      )
      .route(
        "/page",
        get(|| async {
          (
            [
              (header::CONTENT_TYPE, "text/html"),
              (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            ],
            "<html></html>",
          )
        }),
      );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
  }

  fn source() -> HttpImageSource { HttpImageSource::new(ORIGIN_URL, 1024).unwrap() }

  #[tokio::test]
  async fn cors_request_presents_origin() {
    let base = serve().await;
    let image = source()
      .fetch(&format!("{base}/shared.gif"), FetchMode::Cors)
      .await
      .unwrap();
    assert_eq!(image.content_type, "image/gif");
    assert_eq!(image.bytes, GIF);
  }

  #[tokio::test]
  async fn missing_grant_blocks_cors_but_not_opaque() {
    let base = serve().await;
    let url = format!("{base}/private.gif");

    let cors = source().fetch(&url, FetchMode::Cors).await;
    assert_eq!(cors, Err(FetchFailure::CrossOriginBlocked));

    let outcome = fetch_with_fallback(&source(), &url, TIMEOUT).await;
    assert!(matches!(outcome, PreviewOutcome::Loaded { mode: FetchMode::Opaque, .. }));
  }

  #[tokio::test]
  async fn missing_resource_fails_both_stages() {
    let base = serve().await;
    let outcome = fetch_with_fallback(&source(), &format!("{base}/nope.png"), TIMEOUT).await;
    assert_eq!(
      outcome,
      PreviewOutcome::Failed {
        cors:   FetchFailure::CrossOriginBlocked,
        opaque: FetchFailure::Status(404),
      }
    );
  }

  #[tokio::test]
  async fn non_image_is_rejected() {
    let base = serve().await;
    let outcome = fetch_with_fallback(&source(), &format!("{base}/page"), TIMEOUT).await;
    assert!(matches!(
      outcome,
      PreviewOutcome::Failed { opaque: FetchFailure::NotAnImage(ref ct), .. } if ct == "text/html"
    ));
  }

  #[tokio::test]
  async fn oversized_body_is_refused() {
    let base = serve().await;
    let url = format!("{base}/huge.gif");

    let result = source().fetch(&url, FetchMode::Opaque).await;
    assert_eq!(result, Err(FetchFailure::TooLarge(1024)));

    let roomy = HttpImageSource::new(ORIGIN_URL, 8192).unwrap();
    let image = roomy.fetch(&url, FetchMode::Opaque).await.unwrap();
    assert_eq!(image.bytes.len(), 4096);
  }

  #[tokio::test]
  async fn unreachable_host_is_a_network_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = source().fetch(&format!("http://{addr}/x.png"), FetchMode::Opaque).await;
    assert!(matches!(result, Err(FetchFailure::Network(_))));
  }

  #[tokio::test]
  async fn vault_preview_over_http() {
    let base = serve().await;
    let vault = Vault::new(MemoryStore::new(), VaultConfig::default());
    vault.register(None, "a@x.com", "pw", Role::User).await.unwrap();
    let session = vault.login("a@x.com", "pw").await.unwrap();

    let preview = vault
      .preview_image(Some(&session), &format!("{base}/private.gif"), &source())
      .await
      .unwrap();
    assert_eq!(preview.mode, FetchMode::Opaque);

    let err = vault
      .preview_image(Some(&session), &format!("{base}/gone.gif"), &source())
      .await
      .unwrap_err();
    assert!(matches!(err, Error::RemoteFetchFailed(FetchFailure::Status(404))));
  }
}
