//! Materialization of a canonical locator into a local file.
//!
//! Three mutually exclusive branches: inline `data:` payloads are decoded and
//! written to a temp file, `file://` locators are used in place (no temp
//! copy), and everything else goes through the transport collaborator and
//! lands in a freshly allocated temp file. Temporary artifacts are owned by
//! the cache entry that ends up referencing them; on a failed resolution the
//! resolver deletes them before substituting the fallback sentinel.

use crate::error::{Error, ImageError, Result};
use crate::locator;
use crate::resource::{data_url, ResourceFetcher};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

const TEMP_PREFIX: &str = "pdfpress_img_";

/// A locally materialized artifact.
///
/// `temporary` marks files this fetcher allocated; they must be removed if
/// the resolution that produced them fails.
#[derive(Debug, Clone)]
pub struct Materialized {
  pub path: PathBuf,
  pub temporary: bool,
}

/// Retrieves raw bytes for a canonical locator and materializes them locally.
pub struct Fetcher {
  transport: Arc<dyn ResourceFetcher>,
  temp_dir: PathBuf,
}

impl Fetcher {
  pub fn new(transport: Arc<dyn ResourceFetcher>, temp_dir: PathBuf) -> Self {
    Self {
      transport,
      temp_dir,
    }
  }

  /// Materialize the resource at `canonical` to a local path.
  ///
  /// Retrieval failures (undecodable payload, missing file, transport error,
  /// empty result) surface as errors for the resolver's fallback path.
  pub fn materialize(&self, canonical: &str) -> Result<Materialized> {
    if locator::is_inline(canonical) {
      let decoded = data_url::decode(canonical)?;
      if decoded.bytes.is_empty() {
        return Err(Error::Image(ImageError::InvalidDataUrl {
          reason: "empty payload".to_string(),
        }));
      }
      return Ok(Materialized {
        path: self.write_temp(&decoded.bytes)?,
        temporary: true,
      });
    }

    if let Some(path) = locator::file_path_of(canonical) {
      return Ok(Materialized {
        path,
        temporary: false,
      });
    }

    let resource = self
      .transport
      .fetch(canonical)
      .map_err(|e| ImageError::LoadFailed {
        url: canonical.to_string(),
        reason: e.to_string(),
      })?;
    if resource.bytes.is_empty() {
      return Err(Error::Image(ImageError::LoadFailed {
        url: canonical.to_string(),
        reason: "empty response".to_string(),
      }));
    }

    Ok(Materialized {
      path: self.write_temp(&resource.bytes)?,
      temporary: true,
    })
  }

  fn write_temp(&self, bytes: &[u8]) -> Result<PathBuf> {
    let temp_failed = || ImageError::TempFileFailed {
      dir: self.temp_dir.display().to_string(),
    };

    let mut file = tempfile::Builder::new()
      .prefix(TEMP_PREFIX)
      .tempfile_in(&self.temp_dir)
      .map_err(|_| temp_failed())?;
    file.write_all(bytes).map_err(|_| temp_failed())?;

    let (_, path) = file.keep().map_err(|_| temp_failed())?;
    Ok(path)
  }
}
