//! Resource kind and dimension sniffing for materialized artifacts.
//!
//! Only headers are inspected; nothing here performs a full decode. Raster
//! kinds come from the `image` crate's format guess plus the matching
//! codec's dimension probe. SVG documents are recognized by their root
//! element, with dimensions taken from the `width`/`height` attributes and
//! the `viewBox` as fallback.

use crate::error::{Error, ImageError, Result};
use image::{ImageDecoder, ImageFormat};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::path::Path;

/// The closed set of resource kinds the pipeline accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
  Gif,
  Png,
  Jpeg,
  Bmp,
  Svg,
  Webp,
  /// Only ever produced for the fallback sentinel itself, never by sniffing.
  Broken,
}

impl ImageKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Gif => "gif",
      Self::Png => "png",
      Self::Jpeg => "jpeg",
      Self::Bmp => "bmp",
      Self::Svg => "svg",
      Self::Webp => "webp",
      Self::Broken => "broken",
    }
  }
}

impl fmt::Display for ImageKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Kind and pixel dimensions of a sniffed artifact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SniffedImage {
  pub width: u32,
  pub height: u32,
  pub kind: ImageKind,
}

/// Inspect a materialized local artifact.
///
/// The artifact must be readable and non-empty. A type outside the supported
/// set, or zero width/height, is an error.
pub fn sniff(path: &Path) -> Result<SniffedImage> {
  let not_readable = || ImageError::NotReadable {
    path: path.display().to_string(),
  };

  let bytes = std::fs::read(path).map_err(|_| not_readable())?;
  if bytes.is_empty() {
    return Err(Error::Image(not_readable()));
  }

  let sniffed = raster_dimensions(&bytes).or_else(|| svg_dimensions(&bytes));
  match sniffed {
    Some(image) if image.width > 0 && image.height > 0 => Ok(image),
    _ => Err(Error::Image(ImageError::UnknownType {
      path: path.display().to_string(),
    })),
  }
}

fn raster_dimensions(bytes: &[u8]) -> Option<SniffedImage> {
  let format = image::guess_format(bytes).ok()?;
  let kind = match format {
    ImageFormat::Gif => ImageKind::Gif,
    ImageFormat::Png => ImageKind::Png,
    ImageFormat::Jpeg => ImageKind::Jpeg,
    ImageFormat::Bmp => ImageKind::Bmp,
    ImageFormat::WebP => ImageKind::Webp,
    _ => return None,
  };
  let (width, height) = dimensions_for_format(bytes, format)?;
  Some(SniffedImage {
    width,
    height,
    kind,
  })
}

fn dimensions_for_format(bytes: &[u8], format: ImageFormat) -> Option<(u32, u32)> {
  match format {
    ImageFormat::Png => image::codecs::png::PngDecoder::new(Cursor::new(bytes))
      .ok()
      .map(|d| d.dimensions()),
    ImageFormat::Jpeg => image::codecs::jpeg::JpegDecoder::new(Cursor::new(bytes))
      .ok()
      .map(|d| d.dimensions()),
    ImageFormat::Gif => image::codecs::gif::GifDecoder::new(Cursor::new(bytes))
      .ok()
      .map(|d| d.dimensions()),
    ImageFormat::Bmp => image::codecs::bmp::BmpDecoder::new(Cursor::new(bytes))
      .ok()
      .map(|d| d.dimensions()),
    ImageFormat::WebP => image::codecs::webp::WebPDecoder::new(Cursor::new(bytes))
      .ok()
      .map(|d| d.dimensions()),
    _ => None,
  }
}

/// Read the root element of an XML document; if it is `<svg>`, derive pixel
/// dimensions from its attributes.
fn svg_dimensions(bytes: &[u8]) -> Option<SniffedImage> {
  let mut reader = Reader::from_reader(bytes);
  reader.config_mut().trim_text(true);
  let mut buf = Vec::new();

  loop {
    let root = match reader.read_event_into(&mut buf) {
      Ok(Event::Start(e)) => e.into_owned(),
      Ok(Event::Empty(e)) => e.into_owned(),
      Ok(Event::Eof) | Err(_) => return None,
      Ok(_) => {
        buf.clear();
        continue;
      }
    };

    if !root
      .name()
      .local_name()
      .as_ref()
      .eq_ignore_ascii_case(b"svg")
    {
      return None;
    }

    let mut width = None;
    let mut height = None;
    let mut view_box = None;
    for attr in root.attributes().flatten() {
      let value = String::from_utf8_lossy(attr.value.as_ref()).into_owned();
      match attr.key.as_ref() {
        b"width" => width = parse_svg_length(&value),
        b"height" => height = parse_svg_length(&value),
        b"viewBox" => view_box = parse_view_box(&value),
        _ => {}
      }
    }

    if let Some((vb_width, vb_height)) = view_box {
      width = width.or(Some(vb_width));
      height = height.or(Some(vb_height));
    }

    return Some(SniffedImage {
      width: width.unwrap_or(0.0).round().max(0.0) as u32,
      height: height.unwrap_or(0.0).round().max(0.0) as u32,
      kind: ImageKind::Svg,
    });
  }
}

/// Parse an SVG length into CSS pixels. Percentages have no absolute value
/// and yield `None` so the viewBox can take over.
fn parse_svg_length(value: &str) -> Option<f32> {
  let trimmed = value.trim();
  if trimmed.is_empty() || trimmed.ends_with('%') {
    return None;
  }

  let mut end = 0;
  for (idx, ch) in trimmed.char_indices() {
    if matches!(ch, '0'..='9' | '+' | '-' | '.' | 'e' | 'E') {
      end = idx + ch.len_utf8();
    } else {
      break;
    }
  }
  if end == 0 {
    return None;
  }

  let number = trimmed[..end].parse::<f32>().ok()?;
  let unit = trimmed[end..].trim_start();
  let px = if unit.is_empty() || unit.eq_ignore_ascii_case("px") {
    number
  } else if unit.eq_ignore_ascii_case("in") {
    number * 96.0
  } else if unit.eq_ignore_ascii_case("cm") {
    number * (96.0 / 2.54)
  } else if unit.eq_ignore_ascii_case("mm") {
    number * (96.0 / 25.4)
  } else if unit.eq_ignore_ascii_case("pt") {
    number * (96.0 / 72.0)
  } else if unit.eq_ignore_ascii_case("pc") {
    number * (96.0 / 6.0)
  } else {
    return None;
  };

  px.is_finite().then_some(px)
}

fn parse_view_box(value: &str) -> Option<(f32, f32)> {
  let mut nums = value
    .split(|c: char| c == ',' || c.is_whitespace())
    .filter(|s| !s.is_empty())
    .filter_map(|s| s.parse::<f32>().ok());
  let _min_x = nums.next()?;
  let _min_y = nums.next()?;
  let width = nums.next()?;
  let height = nums.next()?;
  (width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0)
    .then_some((width, height))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  fn write_fixture(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(bytes).unwrap();
    path
  }

  #[test]
  fn png_dimensions_come_from_the_header() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(&dir, "a.png", crate::resolver::BROKEN_IMAGE_PNG);
    let sniffed = sniff(&path).unwrap();
    assert_eq!(sniffed.kind, ImageKind::Png);
    assert_eq!((sniffed.width, sniffed.height), (16, 16));
  }

  #[test]
  fn gif_header_is_recognized() {
    // 2x3 GIF87a header with a minimal trailer; dimension probe reads the
    // logical screen descriptor.
    let mut bytes = b"GIF87a".to_vec();
    bytes.extend_from_slice(&[2, 0, 3, 0, 0x00, 0, 0, 0x3b]);
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(&dir, "a.gif", &bytes);
    let sniffed = sniff(&path).unwrap();
    assert_eq!(sniffed.kind, ImageKind::Gif);
    assert_eq!((sniffed.width, sniffed.height), (2, 3));
  }

  #[test]
  fn empty_file_is_not_readable() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(&dir, "empty.png", b"");
    let err = sniff(&path).unwrap_err();
    assert!(matches!(err, Error::Image(ImageError::NotReadable { .. })));
  }

  #[test]
  fn missing_file_is_not_readable() {
    let err = sniff(Path::new("/nonexistent/a.png")).unwrap_err();
    assert!(matches!(err, Error::Image(ImageError::NotReadable { .. })));
  }

  #[test]
  fn unknown_bytes_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(&dir, "a.bin", b"not an image at all");
    let err = sniff(&path).unwrap_err();
    assert!(matches!(err, Error::Image(ImageError::UnknownType { .. })));
  }

  #[test]
  fn svg_dimensions_from_attributes() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(
      &dir,
      "a.svg",
      br#"<svg xmlns="http://www.w3.org/2000/svg" width="40" height="30"></svg>"#,
    );
    let sniffed = sniff(&path).unwrap();
    assert_eq!(sniffed.kind, ImageKind::Svg);
    assert_eq!((sniffed.width, sniffed.height), (40, 30));
  }

  #[test]
  fn svg_dimensions_fall_back_to_view_box() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(
      &dir,
      "a.svg",
      br#"<?xml version="1.0"?><svg viewBox="0 0 120 80"/>"#,
    );
    let sniffed = sniff(&path).unwrap();
    assert_eq!((sniffed.width, sniffed.height), (120, 80));
  }

  #[test]
  fn svg_unit_lengths_convert_to_pixels() {
    assert_eq!(parse_svg_length("2in"), Some(192.0));
    assert_eq!(parse_svg_length("72pt"), Some(96.0));
    assert_eq!(parse_svg_length("10"), Some(10.0));
    assert_eq!(parse_svg_length("50%"), None);
    assert_eq!(parse_svg_length("abc"), None);
  }

  #[test]
  fn svg_with_no_dimensions_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(&dir, "a.svg", br#"<svg xmlns="x"></svg>"#);
    let err = sniff(&path).unwrap_err();
    assert!(matches!(err, Error::Image(ImageError::UnknownType { .. })));
  }

  #[test]
  fn non_svg_xml_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(&dir, "a.xml", br#"<html width="4" height="4"/>"#);
    assert!(sniff(&path).is_err());
  }

  #[test]
  fn kind_renders_lowercase() {
    assert_eq!(ImageKind::Jpeg.to_string(), "jpeg");
    assert_eq!(ImageKind::Broken.to_string(), "broken");
  }
}
