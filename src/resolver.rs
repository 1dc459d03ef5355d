//! Top-level image resolution pipeline.
//!
//! [`ImageResolver`] ties the pieces together: canonicalize the reference,
//! consult the session cache, run the policy gate, materialize the bytes,
//! sniff type and dimensions, and scan SVG documents for embedded
//! references. Every failure is converted into the bundled broken-image
//! sentinel plus a diagnostic; `resolve` never returns an error, so callers
//! always receive a usable (possibly degraded) artifact.
//!
//! Each resolver owns its session cache; construct one resolver per render
//! session (or per test) to get isolated cache state.

use crate::cache::SessionCache;
use crate::error::{Error, ImageError};
use crate::fetch::{Fetcher, Materialized};
use crate::locator::{self, ResolutionContext};
use crate::policy::ProtocolPolicy;
use crate::resource::{HttpFetcher, ResourceFetcher};
use crate::sniff::{self, ImageKind};
use crate::svg_scan::SvgScanner;
use log::warn;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

/// Configuration for an [`ImageResolver`].
pub struct ResolverOptions {
  /// Protocol allow-list and per-protocol rules.
  pub protocols: ProtocolPolicy,
  /// Directory for materialized temp files and the fallback sentinel.
  pub temp_dir: PathBuf,
  /// Transport used for remote locators.
  pub transport: Arc<dyn ResourceFetcher>,
}

impl ResolverOptions {
  pub fn new() -> Self {
    Self {
      protocols: ProtocolPolicy::default(),
      temp_dir: std::env::temp_dir(),
      transport: Arc::new(HttpFetcher::new()),
    }
  }

  pub fn with_protocols(mut self, protocols: ProtocolPolicy) -> Self {
    self.protocols = protocols;
    self
  }

  pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
    self.temp_dir = temp_dir.into();
    self
  }

  pub fn with_transport(mut self, transport: Arc<dyn ResourceFetcher>) -> Self {
    self.transport = transport;
    self
  }
}

impl Default for ResolverOptions {
  fn default() -> Self {
    Self::new()
  }
}

/// A resolved (possibly degraded) image artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedImage {
  /// Local path of the materialized artifact.
  pub path: PathBuf,
  /// Detected resource kind.
  pub kind: ImageKind,
  /// Present only when the fallback path was taken; names the original
  /// reference and the failure reason.
  pub diagnostic: Option<String>,
}

impl ResolvedImage {
  /// Whether this artifact is the fallback sentinel.
  pub fn is_broken(&self) -> bool {
    self.diagnostic.is_some()
  }
}

/// Resolves image references into local artifacts, with caching and
/// fallback.
pub struct ImageResolver {
  options: ResolverOptions,
  fetcher: Fetcher,
  cache: SessionCache,
  sentinel: OnceLock<(PathBuf, ImageKind)>,
}

impl ImageResolver {
  pub fn new(options: ResolverOptions) -> Self {
    let fetcher = Fetcher::new(Arc::clone(&options.transport), options.temp_dir.clone());
    Self {
      options,
      fetcher,
      cache: SessionCache::new(),
      sentinel: OnceLock::new(),
    }
  }

  /// Resolve `raw` against `ctx` into a local artifact.
  ///
  /// Repeated calls for references that canonicalize to the same locator
  /// return the same cached artifact without refetching; concurrent first
  /// calls are serialized so the fetch happens once. On failure the broken
  /// sentinel is returned (and cached under the canonical locator) together
  /// with a diagnostic.
  pub fn resolve(&self, raw: &str, ctx: &ResolutionContext) -> Arc<ResolvedImage> {
    let Some(canonical) = locator::build_canonical(ctx, raw) else {
      // no canonical locator means no cache key; the failure is not cached
      return Arc::new(self.fallback(
        raw,
        &Error::Image(ImageError::UnparsableUrl {
          url: raw.to_string(),
        }),
      ));
    };

    loop {
      if let Some(hit) = self.cache.lookup(&canonical) {
        return hit;
      }

      let (flight, is_owner) = self.cache.join(&canonical);
      if !is_owner {
        match flight.wait() {
          Some(artifact) => return artifact,
          None => continue,
        }
      }

      // Re-check after winning ownership: a previous owner may have published
      // between our lookup miss and the join.
      if let Some(hit) = self.cache.lookup(&canonical) {
        self.cache.complete(&canonical, Arc::clone(&hit));
        return hit;
      }

      let mut guard = OwnerGuard {
        cache: &self.cache,
        key: &canonical,
        armed: true,
      };
      let artifact = match self.resolve_uncached(&canonical) {
        Ok(resolved) => resolved,
        Err(err) => Arc::new(self.fallback(raw, &err)),
      };
      self.cache.complete(&canonical, Arc::clone(&artifact));
      guard.armed = false;
      return artifact;
    }
  }

  fn resolve_uncached(&self, canonical: &str) -> crate::Result<Arc<ResolvedImage>> {
    self.options.protocols.validate(canonical)?;

    let materialized = self.fetcher.materialize(canonical)?;
    let discard = |materialized: &Materialized| {
      // don't leak the orphaned temp artifact
      if materialized.temporary {
        let _ = std::fs::remove_file(&materialized.path);
      }
    };

    let sniffed = match sniff::sniff(&materialized.path) {
      Ok(sniffed) => sniffed,
      Err(err) => {
        discard(&materialized);
        return Err(err);
      }
    };

    let artifact = Arc::new(ResolvedImage {
      path: materialized.path.clone(),
      kind: sniffed.kind,
      diagnostic: None,
    });

    if sniffed.kind == ImageKind::Svg {
      // Make the document visible to its own scan, so reference chains that
      // loop back through it terminate via the cache instead of recursing.
      // A scan failure overwrites this entry with the fallback.
      self.cache.store(canonical, Arc::clone(&artifact));
      if let Some(scanner) = SvgScanner::new(self, canonical) {
        if let Err(err) = scanner.scan(&materialized.path) {
          discard(&materialized);
          return Err(err);
        }
      }
    }

    Ok(artifact)
  }

  /// Substitute the broken-image sentinel, attaching a diagnostic that names
  /// the original reference and the failure.
  fn fallback(&self, raw: &str, err: &Error) -> ResolvedImage {
    warn!("image resolution failed, substituting broken image: {err}");
    let (path, kind) = self.broken_sentinel();
    ResolvedImage {
      path,
      kind,
      diagnostic: Some(format!("{err} ({raw})")),
    }
  }

  /// Materialize and sniff the bundled sentinel once per resolver. The
  /// sentinel is trusted by construction and never passes through the policy
  /// gate.
  fn broken_sentinel(&self) -> (PathBuf, ImageKind) {
    self
      .sentinel
      .get_or_init(|| {
        let path = self.options.temp_dir.join("pdfpress_broken_image.png");
        let kind = match std::fs::write(&path, BROKEN_IMAGE_PNG) {
          Ok(()) => sniff::sniff(&path)
            .map(|s| s.kind)
            .unwrap_or(ImageKind::Broken),
          Err(_) => ImageKind::Broken,
        };
        (path, kind)
      })
      .clone()
  }
}

/// Wakes waiters if the owning resolution unwinds before publishing.
struct OwnerGuard<'a> {
  cache: &'a SessionCache,
  key: &'a str,
  armed: bool,
}

impl Drop for OwnerGuard<'_> {
  fn drop(&mut self) {
    if self.armed {
      self.cache.abandon(self.key);
    }
  }
}

/// Bundled 16x16 PNG served when resolution fails.
pub(crate) const BROKEN_IMAGE_PNG: &[u8] = &[
  0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
  0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x10, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0xf3, 0xff,
  0x61, 0x00, 0x00, 0x00, 0x5c, 0x49, 0x44, 0x41, 0x54, 0x78, 0xda, 0x63, 0xe8, 0xe8, 0xe8, 0xf8,
  0x4f, 0x09, 0x66, 0x00, 0x11, 0xbb, 0x5d, 0x5c, 0xfe, 0xbf, 0x7b, 0xf7, 0x8e, 0x24, 0x0c, 0xd2,
  0x64, 0xe8, 0x60, 0x68, 0x10, 0xe4, 0xe2, 0xe2, 0xfa, 0x4f, 0x0a, 0x06, 0xe9, 0x41, 0xe8, 0x43,
  0xe3, 0x1b, 0x1a, 0xff, 0x93, 0x82, 0x41, 0x7a, 0x18, 0x06, 0xde, 0x00, 0x98, 0x97, 0x48, 0xc5,
  0x20, 0x3d, 0x83, 0xc3, 0x00, 0x72, 0x30, 0xd5, 0x0c, 0x18, 0x9a, 0x51, 0x40, 0xb5, 0x68, 0xa4,
  0x5a, 0x42, 0xa2, 0x5a, 0xd2, 0xa6, 0x5a, 0x66, 0xa2, 0x5a, 0x76, 0xa7, 0x5a, 0x81, 0x43, 0xb5,
  0x22, 0x8f, 0x6a, 0x85, 0x30, 0xd5, 0xaa, 0x09, 0x00, 0x73, 0x6b, 0x44, 0x45, 0x9f, 0x2e, 0x19,
  0xc4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];
