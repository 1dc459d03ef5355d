//! Transport abstraction for fetching remote resource bytes.
//!
//! The resolution pipeline never talks to the network directly; it goes
//! through the [`ResourceFetcher`] trait so callers can substitute caching,
//! offline, or mock transports. [`HttpFetcher`] is the default
//! implementation for `http`/`https` locators.

use crate::error::{Error, ImageError, Result};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub mod data_url;

/// Default User-Agent header sent by [`HttpFetcher`].
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; pdfpress/0.1)";

const MAX_REDIRECTS: usize = 10;

/// Raw bytes of a fetched resource plus the transport-reported content type.
#[derive(Debug, Clone)]
pub struct FetchedResource {
  pub bytes: Vec<u8>,
  pub content_type: Option<String>,
}

impl FetchedResource {
  pub fn new(bytes: Vec<u8>, content_type: Option<String>) -> Self {
    Self {
      bytes,
      content_type,
    }
  }
}

/// Trait for fetching remote resource bytes.
///
/// Implementations must be `Send + Sync` so one transport can serve
/// concurrent resolution calls.
pub trait ResourceFetcher: Send + Sync {
  /// Fetch the resource at `url`, returning its bytes and content type.
  ///
  /// An unreachable endpoint, an error status, or an empty body are all
  /// reported as errors; the resolver treats them as a resolution failure,
  /// not a crash.
  fn fetch(&self, url: &str) -> Result<FetchedResource>;
}

impl<T: ResourceFetcher + ?Sized> ResourceFetcher for Arc<T> {
  fn fetch(&self, url: &str) -> Result<FetchedResource> {
    (**self).fetch(url)
  }
}

/// Default HTTP/HTTPS transport with configurable timeout, user agent, and
/// response size limit.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
  timeout: Duration,
  user_agent: String,
  max_size: usize,
}

impl HttpFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Set the global request timeout.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Set the User-Agent header.
  pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
    self.user_agent = user_agent.into();
    self
  }

  /// Set the maximum response size in bytes.
  pub fn with_max_size(mut self, max_size: usize) -> Self {
    self.max_size = max_size;
    self
  }

  fn fetch_http(&self, url: &str) -> Result<FetchedResource> {
    let config = ureq::Agent::config_builder()
      .timeout_global(Some(self.timeout))
      .build();
    let agent: ureq::Agent = config.into();

    let mut current = url.to_string();
    for _ in 0..MAX_REDIRECTS {
      let mut response = agent
        .get(&current)
        .header("User-Agent", &self.user_agent)
        .call()
        .map_err(|e| Error::Io(io::Error::other(e.to_string())))?;

      let status = response.status();
      if (300..400).contains(&status.as_u16()) {
        if let Some(loc) = response
          .headers()
          .get("location")
          .and_then(|h| h.to_str().ok())
        {
          current = Url::parse(&current)
            .ok()
            .and_then(|base| base.join(loc).ok())
            .map(|u| u.to_string())
            .unwrap_or_else(|| loc.to_string());
          continue;
        }
      }

      let content_type = response
        .headers()
        .get("content-type")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());

      let bytes = response
        .body_mut()
        .with_config()
        .limit(self.max_size as u64)
        .read_to_vec()
        .map_err(|e| Error::Io(e.into_io()))?;

      if bytes.is_empty() {
        return Err(Error::Io(io::Error::new(
          io::ErrorKind::UnexpectedEof,
          "Empty HTTP response body",
        )));
      }

      return Ok(FetchedResource::new(bytes, content_type));
    }

    Err(Error::Io(io::Error::other("too many redirects")))
  }
}

impl Default for HttpFetcher {
  fn default() -> Self {
    Self {
      timeout: Duration::from_secs(30),
      user_agent: DEFAULT_USER_AGENT.to_string(),
      max_size: 50 * 1024 * 1024,
    }
  }
}

impl ResourceFetcher for HttpFetcher {
  fn fetch(&self, url: &str) -> Result<FetchedResource> {
    if url.starts_with("http://") || url.starts_with("https://") {
      self.fetch_http(url)
    } else {
      Err(Error::Image(ImageError::LoadFailed {
        url: url.to_string(),
        reason: "unsupported transport protocol".to_string(),
      }))
    }
  }
}
