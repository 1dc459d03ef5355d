//! Inline `data:` payload decoding (RFC 2397).

use crate::error::{Error, ImageError, Result};
use base64::Engine;

const DATA_URL_PREFIX: &str = "data:";

/// Decoded inline payload: the raw bytes and the declared media type, if any.
#[derive(Debug, Clone)]
pub struct DecodedDataUrl {
  pub bytes: Vec<u8>,
  pub media_type: Option<String>,
}

/// Decode a `data:` locator into bytes.
///
/// Both the `;base64` and percent-encoded forms are supported. The media
/// type is whatever precedes the first `;`/`,`, when it looks like a MIME
/// type; parameters are not interpreted.
pub fn decode(url: &str) -> Result<DecodedDataUrl> {
  let rest = url
    .strip_prefix(DATA_URL_PREFIX)
    .ok_or_else(|| invalid("URL does not start with 'data:'"))?;

  let (metadata, data) = rest
    .split_once(',')
    .ok_or_else(|| invalid("Missing comma in data URL"))?;

  let is_base64 = metadata
    .split(';')
    .any(|param| param.trim().eq_ignore_ascii_case("base64"));
  let media_type = metadata
    .split(';')
    .next()
    .map(str::trim)
    .filter(|s| !s.is_empty() && s.contains('/'))
    .map(|s| s.to_string());

  let bytes = if is_base64 {
    decode_base64(data)?
  } else {
    percent_decode(data)?
  };

  Ok(DecodedDataUrl { bytes, media_type })
}

fn invalid(reason: &str) -> Error {
  Error::Image(ImageError::InvalidDataUrl {
    reason: reason.to_string(),
  })
}

/// Decode base64 payloads, tolerating ASCII whitespace.
fn decode_base64(data: &str) -> Result<Vec<u8>> {
  let cleaned: Vec<u8> = data
    .bytes()
    .filter(|b| !b.is_ascii_whitespace())
    .collect();

  base64::engine::general_purpose::STANDARD
    .decode(&cleaned)
    .map_err(|e| invalid(&format!("Invalid base64: {e}")))
}

/// Percent-decode a payload without treating `+` specially.
fn percent_decode(input: &str) -> Result<Vec<u8>> {
  let mut out = Vec::with_capacity(input.len());
  let bytes = input.as_bytes();
  let mut i = 0;

  while i < bytes.len() {
    match bytes[i] {
      b'%' => {
        if i + 2 >= bytes.len() {
          return Err(invalid("Incomplete percent-escape"));
        }
        let hi = (bytes[i + 1] as char).to_digit(16);
        let lo = (bytes[i + 2] as char).to_digit(16);
        match (hi, lo) {
          (Some(hi), Some(lo)) => {
            out.push(((hi << 4) | lo) as u8);
            i += 3;
          }
          _ => return Err(invalid("Invalid percent-escape")),
        }
      }
      byte => {
        out.push(byte);
        i += 1;
      }
    }
  }

  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn base64_payload_decodes() {
    let decoded = decode("data:image/png;base64,aGVsbG8=").unwrap();
    assert_eq!(decoded.bytes, b"hello");
    assert_eq!(decoded.media_type, Some("image/png".to_string()));
  }

  #[test]
  fn base64_tolerates_whitespace() {
    let decoded = decode("data:image/png;base64,aGVs\nbG8=").unwrap();
    assert_eq!(decoded.bytes, b"hello");
  }

  #[test]
  fn percent_encoded_payload_decodes() {
    let decoded = decode("data:text/plain,hello%20world").unwrap();
    assert_eq!(decoded.bytes, b"hello world");
    assert_eq!(decoded.media_type, Some("text/plain".to_string()));
  }

  #[test]
  fn plus_is_not_a_space() {
    let decoded = decode("data:text/plain,a+b").unwrap();
    assert_eq!(decoded.bytes, b"a+b");
  }

  #[test]
  fn missing_media_type_is_none() {
    let decoded = decode("data:,hello").unwrap();
    assert_eq!(decoded.bytes, b"hello");
    assert_eq!(decoded.media_type, None);
  }

  #[test]
  fn missing_comma_is_rejected() {
    assert!(decode("data:image/png;base64").is_err());
  }

  #[test]
  fn truncated_percent_escape_is_rejected() {
    assert!(decode("data:text/plain,abc%2").is_err());
  }

  #[test]
  fn bad_base64_is_rejected() {
    assert!(decode("data:image/png;base64,!!!").is_err());
  }
}
