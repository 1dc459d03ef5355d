//! Error types for the resource resolution and font metrics subsystem.
//!
//! All errors use the `thiserror` crate. The image-side variants are `Clone`
//! so a cached failure outcome can be shared across repeated lookups; nothing
//! in this module escapes the top-level resolve call, which converts every
//! failure into a fallback artifact plus a diagnostic.

use thiserror::Error;

/// Result type alias for subsystem operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum Error {
  /// Image resolution error (policy, fetch, sniff, or SVG scan).
  #[error("Image error: {0}")]
  Image(#[from] ImageError),

  /// Font metrics loading or cache error.
  #[error("Font error: {0}")]
  Font(#[from] FontError),

  /// I/O error (file reading, temp file allocation, etc.)
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  /// Generic error for miscellaneous issues
  #[error("{0}")]
  Other(String),
}

/// Errors raised while resolving an image reference.
///
/// Every variant is non-fatal at the resolver boundary: the resolver catches
/// it, substitutes the broken-image sentinel, and surfaces the message as a
/// diagnostic.
#[derive(Error, Debug, Clone)]
pub enum ImageError {
  /// The reference could not be combined with its resolution context into an
  /// absolute locator.
  #[error("Unable to parse image URL '{url}'")]
  UnparsableUrl { url: String },

  /// The locator's protocol is absent from the allow-list.
  #[error("Permission denied on '{url}': the communication protocol is not supported")]
  ProtocolNotAllowed { url: String },

  /// A rule registered for the locator's protocol rejected it.
  #[error("Error loading '{url}': {reason}")]
  PolicyViolation { url: String, reason: String },

  /// Retrieval failed: unreachable, empty, or undecodable payload.
  #[error("Failed to load image from '{url}': {reason}")]
  LoadFailed { url: String, reason: String },

  /// A data: URL could not be decoded.
  #[error("Invalid data URL: {reason}")]
  InvalidDataUrl { reason: String },

  /// A temporary file could not be allocated in the configured directory.
  #[error("Unable to create temporary image in '{dir}'")]
  TempFileFailed { dir: String },

  /// The materialized artifact is unreadable or empty.
  #[error("Image '{path}' is not readable or empty")]
  NotReadable { path: String },

  /// The artifact's detected type is outside the supported set, or its
  /// dimensions are zero.
  #[error("Image type unknown for '{path}'")]
  UnknownType { path: String },

  /// An embedded SVG reference resolves to its own containing document.
  #[error("SVG self-reference is not allowed")]
  SelfReference,

  /// An embedded SVG reference was itself rejected during resolution.
  #[error("SVG document references a restricted resource: {reason}")]
  RestrictedReference { reason: String },
}

/// Errors raised while loading font metrics.
///
/// Total absence of both the source metrics file and a cache entry is NOT an
/// error; loaders report it as `Ok(None)`.
#[derive(Error, Debug, Clone)]
pub enum FontError {
  /// The font base path has no usable file name or directory.
  #[error("Invalid font path '{path}'")]
  InvalidFontPath { path: String },

  /// The source metrics file exists but could not be read.
  #[error("Failed to read metrics file '{path}': {reason}")]
  MetricsReadFailed { path: String, reason: String },
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn protocol_rejection_names_the_protocol_rule() {
    let error = ImageError::ProtocolNotAllowed {
      url: "gopher://example/a.png".to_string(),
    };
    let display = format!("{}", error);
    assert!(display.contains("protocol is not supported"));
    assert!(display.contains("gopher://example/a.png"));
  }

  #[test]
  fn self_reference_message_is_stable() {
    let display = format!("{}", ImageError::SelfReference);
    assert!(display.contains("self-reference is not allowed"));
  }

  #[test]
  fn restricted_reference_appends_inner_reason() {
    let error = ImageError::RestrictedReference {
      reason: "Permission denied on 'http://evil/x.png'".to_string(),
    };
    let display = format!("{}", error);
    assert!(display.contains("references a restricted resource"));
    assert!(display.contains("http://evil/x.png"));
  }

  #[test]
  fn image_errors_wrap_into_top_level() {
    let error: Error = ImageError::InvalidDataUrl {
      reason: "missing comma".to_string(),
    }
    .into();
    assert!(matches!(error, Error::Image(_)));
  }

  #[test]
  fn font_errors_carry_the_source_path() {
    let error = FontError::MetricsReadFailed {
      path: "/fonts/DejaVuSans.ufm".to_string(),
      reason: "permission denied".to_string(),
    };
    assert!(format!("{}", error).contains("/fonts/DejaVuSans.ufm"));
  }
}
