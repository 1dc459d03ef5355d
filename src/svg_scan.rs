//! Validation pass over materialized SVG documents.
//!
//! An SVG may embed further raster or vector references via `<image>`
//! elements. Each one is resolved through the full pipeline so the policy
//! gate applies transitively, and a reference back to the containing
//! document itself is rejected outright. The document streams through the
//! parser in fixed-size buffers; memory use does not grow with document
//! size.

use crate::error::{Error, ImageError, Result};
use crate::locator::{self, ResolutionContext};
use crate::resolver::ImageResolver;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Scanner for one materialized SVG document.
///
/// Holds the outer document's canonical locator and resolution context, so
/// embedded references resolve exactly as the outer document's own reference
/// did.
pub struct SvgScanner<'a> {
  resolver: &'a ImageResolver,
  outer_locator: &'a str,
  context: ResolutionContext,
}

impl<'a> SvgScanner<'a> {
  /// Build a scanner for the document at `outer_locator`. Returns `None`
  /// when no resolution context can be derived from the locator (inline
  /// documents have no base to resolve embedded references against).
  pub fn new(resolver: &'a ImageResolver, outer_locator: &'a str) -> Option<Self> {
    let context = ResolutionContext::for_locator(outer_locator)?;
    Some(Self {
      resolver,
      outer_locator,
      context,
    })
  }

  /// Stream the document and resolve every embedded image reference.
  ///
  /// Stops at the first rejection. A well-formedness error in the XML ends
  /// the scan without failing it; the sniffer has already accepted the
  /// document as SVG.
  pub fn scan(&self, path: &Path) -> Result<()> {
    let file = File::open(path).map_err(|_| ImageError::NotReadable {
      path: path.display().to_string(),
    })?;
    let mut reader = Reader::from_reader(BufReader::new(file));
    let mut buf = Vec::new();

    loop {
      match reader.read_event_into(&mut buf) {
        Ok(Event::Start(e)) | Ok(Event::Empty(e)) => self.check_element(&e)?,
        Ok(Event::Eof) | Err(_) => return Ok(()),
        Ok(_) => {}
      }
      buf.clear();
    }
  }

  fn check_element(&self, element: &BytesStart<'_>) -> Result<()> {
    if !element
      .name()
      .local_name()
      .as_ref()
      .eq_ignore_ascii_case(b"image")
    {
      return Ok(());
    }

    // The namespaced attribute takes precedence, but both spellings are
    // honored when present.
    let mut namespaced = None;
    let mut plain = None;
    for attr in element.attributes().flatten() {
      let key = attr.key.as_ref().to_ascii_lowercase();
      let value = String::from_utf8_lossy(attr.value.as_ref()).into_owned();
      match key.as_slice() {
        b"xlink:href" => namespaced = Some(value),
        b"href" => plain = Some(value),
        _ => {}
      }
    }

    for reference in [namespaced, plain].into_iter().flatten() {
      if !reference.trim().is_empty() {
        self.resolve_reference(&reference)?;
      }
    }
    Ok(())
  }

  fn resolve_reference(&self, raw: &str) -> Result<()> {
    if let Some(inner) = locator::build_canonical(&self.context, raw) {
      if inner == self.outer_locator {
        return Err(Error::Image(ImageError::SelfReference));
      }
    }

    let resolved = self.resolver.resolve(raw, &self.context);
    if let Some(reason) = &resolved.diagnostic {
      return Err(Error::Image(ImageError::RestrictedReference {
        reason: reason.clone(),
      }));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::policy::ProtocolPolicy;
  use crate::resolver::{ResolverOptions, BROKEN_IMAGE_PNG};
  use std::io::Write;

  fn write_file(path: &Path, bytes: &[u8]) {
    let mut file = File::create(path).unwrap();
    file.write_all(bytes).unwrap();
  }

  fn resolver_for(dir: &Path) -> ImageResolver {
    ImageResolver::new(
      ResolverOptions::new()
        .with_protocols(ProtocolPolicy::empty().allow("file"))
        .with_temp_dir(dir.to_path_buf()),
    )
  }

  #[test]
  fn sibling_references_resolve_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    write_file(&dir.path().join("pic.png"), BROKEN_IMAGE_PNG);
    let svg_path = dir.path().join("doc.svg");
    write_file(
      &svg_path,
      br#"<svg width="10" height="10"><image href="pic.png"/></svg>"#,
    );

    let resolver = resolver_for(dir.path());
    let outer = format!("file://{}", svg_path.display());
    let scanner = SvgScanner::new(&resolver, &outer).unwrap();
    assert!(scanner.scan(&svg_path).is_ok());
  }

  #[test]
  fn relative_self_reference_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let svg_path = dir.path().join("doc.svg");
    write_file(
      &svg_path,
      br#"<svg width="10" height="10"><image href="doc.svg"/></svg>"#,
    );

    let resolver = resolver_for(dir.path());
    let outer = format!("file://{}", svg_path.display());
    let scanner = SvgScanner::new(&resolver, &outer).unwrap();
    let err = scanner.scan(&svg_path).unwrap_err();
    assert!(matches!(err, Error::Image(ImageError::SelfReference)));
  }

  #[test]
  fn namespaced_href_is_checked_first() {
    let dir = tempfile::tempdir().unwrap();
    let svg_path = dir.path().join("doc.svg");
    write_file(
      &svg_path,
      br#"<svg width="10" height="10"><image xlink:href="doc.svg" href="other.png"/></svg>"#,
    );

    let resolver = resolver_for(dir.path());
    let outer = format!("file://{}", svg_path.display());
    let scanner = SvgScanner::new(&resolver, &outer).unwrap();
    let err = scanner.scan(&svg_path).unwrap_err();
    assert!(matches!(err, Error::Image(ImageError::SelfReference)));
  }

  #[test]
  fn restricted_embedded_reference_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let svg_path = dir.path().join("doc.svg");
    write_file(
      &svg_path,
      br#"<svg width="10" height="10"><image href="http://evil.example/a.png"/></svg>"#,
    );

    let resolver = resolver_for(dir.path());
    let outer = format!("file://{}", svg_path.display());
    let scanner = SvgScanner::new(&resolver, &outer).unwrap();
    let err = scanner.scan(&svg_path).unwrap_err();
    match err {
      Error::Image(ImageError::RestrictedReference { reason }) => {
        assert!(reason.contains("protocol is not supported"), "{reason}");
      }
      other => panic!("expected restricted reference, got {other:?}"),
    }
  }

  #[test]
  fn image_tag_matching_is_case_insensitive() {
    let dir = tempfile::tempdir().unwrap();
    let svg_path = dir.path().join("doc.svg");
    write_file(
      &svg_path,
      br#"<svg width="10" height="10"><IMAGE href="doc.svg"/></svg>"#,
    );

    let resolver = resolver_for(dir.path());
    let outer = format!("file://{}", svg_path.display());
    let scanner = SvgScanner::new(&resolver, &outer).unwrap();
    assert!(scanner.scan(&svg_path).is_err());
  }

  #[test]
  fn documents_without_references_scan_clean() {
    let dir = tempfile::tempdir().unwrap();
    let svg_path = dir.path().join("doc.svg");
    write_file(
      &svg_path,
      br#"<svg width="10" height="10"><rect width="5" height="5"/></svg>"#,
    );

    let resolver = resolver_for(dir.path());
    let outer = format!("file://{}", svg_path.display());
    let scanner = SvgScanner::new(&resolver, &outer).unwrap();
    assert!(scanner.scan(&svg_path).is_ok());
  }
}
