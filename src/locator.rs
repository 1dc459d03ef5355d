//! Canonical locator construction.
//!
//! A resource reference arrives as an untrusted string plus a resolution
//! context (the protocol, host, and base directory of the document that
//! referenced it). This module combines the two into the canonical absolute
//! locator used as the cache key and fed to the policy gate, and decomposes a
//! canonical locator back into a context for resolving references embedded
//! inside it.

use std::path::Path;
use url::Url;

/// The protocol/host/base-path triple a reference is resolved against.
///
/// `protocol` is a bare scheme name (`"http"`, `"https"`, `"file"`); an empty
/// protocol is treated as `file`. `base_path` is the directory of the
/// referencing document and is always treated as a directory, whether or not
/// it carries a trailing slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionContext {
  pub protocol: String,
  pub host: String,
  pub base_path: String,
}

impl ResolutionContext {
  pub fn new(
    protocol: impl Into<String>,
    host: impl Into<String>,
    base_path: impl Into<String>,
  ) -> Self {
    Self {
      protocol: protocol.into(),
      host: host.into(),
      base_path: base_path.into(),
    }
  }

  /// Context for a document on the local filesystem.
  pub fn local(base_path: impl Into<String>) -> Self {
    Self::new("file", "", base_path)
  }

  /// Derive the context of a document from its own canonical locator, for
  /// resolving references embedded inside that document.
  ///
  /// An inline document gets a context with no base: embedded relative
  /// references cannot be resolved against it, only absolute ones.
  pub fn for_locator(canonical: &str) -> Option<Self> {
    if is_inline(canonical) {
      return Some(Self::new("data", "", ""));
    }
    let parsed = Url::parse(canonical).ok()?;
    let dir = match parsed.path().rfind('/') {
      Some(idx) => parsed.path()[..=idx].to_string(),
      None => "/".to_string(),
    };
    Some(Self {
      protocol: parsed.scheme().to_ascii_lowercase(),
      host: parsed.host_str().unwrap_or("").to_string(),
      base_path: dir,
    })
  }

  /// The absolute base URL this context resolves relative references
  /// against, with a guaranteed trailing slash.
  fn base_url(&self) -> Option<Url> {
    let protocol = if self.protocol.is_empty() {
      "file"
    } else {
      self.protocol.as_str()
    };
    if protocol.eq_ignore_ascii_case("data") {
      // inline documents have no base to resolve relative references against
      return None;
    }
    let mut base = self.base_path.clone();
    if !base.ends_with('/') {
      base.push('/');
    }
    if protocol.eq_ignore_ascii_case("file") {
      if !base.starts_with('/') {
        return None;
      }
      Url::parse(&format!("file://{}", base)).ok()
    } else {
      Url::parse(&format!("{}://{}{}", protocol, self.host, base)).ok()
    }
  }
}

/// Combine a raw reference with its resolution context into the canonical
/// absolute locator.
///
/// `data:` references pass through untouched so the payload survives
/// byte-for-byte. Absolute references replace the context entirely; absolute
/// paths keep the context's protocol and host; anything else resolves
/// relative to the base directory. Fragments are dropped — the canonical form
/// is protocol + host + path + query. Returns `None` when no absolute
/// locator can be formed.
pub fn build_canonical(ctx: &ResolutionContext, raw: &str) -> Option<String> {
  let raw = raw.trim();
  if raw.is_empty() {
    return None;
  }
  if is_inline(raw) {
    return Some(raw.to_string());
  }

  // A reference that already carries a scheme is absolute on its own; it
  // needs no base and replaces the context outright.
  if raw.contains("://") {
    let mut parsed = Url::parse(raw).ok()?;
    parsed.set_fragment(None);
    return Some(parsed.to_string());
  }

  let base = ctx.base_url()?;
  let mut joined = base.join(raw).ok()?;
  joined.set_fragment(None);
  Some(joined.to_string())
}

/// Whether a locator carries its payload inline rather than pointing at
/// external bytes.
pub fn is_inline(locator: &str) -> bool {
  let prefix = locator.as_bytes().get(..5);
  prefix.map_or(false, |p| p.eq_ignore_ascii_case(b"data:"))
}

/// The lower-cased scheme of a canonical locator.
pub fn scheme_of(canonical: &str) -> Option<String> {
  if is_inline(canonical) {
    return Some("data".to_string());
  }
  Url::parse(canonical)
    .ok()
    .map(|u| u.scheme().to_ascii_lowercase())
}

/// The local filesystem path of a `file://` locator.
pub fn file_path_of(canonical: &str) -> Option<std::path::PathBuf> {
  let parsed = Url::parse(canonical).ok()?;
  if parsed.scheme() != "file" {
    return None;
  }
  parsed
    .to_file_path()
    .ok()
    .or_else(|| Some(Path::new(parsed.path()).to_path_buf()))
}
