//! AFM/UFM font metrics parsing and the persistent metrics cache.
//!
//! Metrics files are line-oriented: scalar `Keyword value` lines plus
//! semicolon-delimited `C` (8-bit) and `U` (Unicode) character records.
//! Parsing is a single streaming pass that produces a [`FontMetrics`]
//! structure, including the fixed-size CID-to-GID table for Unicode faces.
//!
//! Parsed metrics are expensive enough to warrant a persistent tier: each
//! metrics file gets a sibling JSON cache tagged with
//! [`FONT_CACHE_VERSION`]. A version mismatch is the sole invalidation
//! signal — the entry is treated as absent and rebuilt from source, and a
//! rebuild fully replaces the entry.

use crate::error::{FontError, Result};
use base64::Engine;
use log::{debug, warn};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Schema version of the persisted metrics cache. Bump when the persisted
/// shape changes; stale entries are regenerated from source.
pub const FONT_CACHE_VERSION: u32 = 1;

/// Core PostScript faces always served from 8-bit AFM metrics, even when the
/// loader is in Unicode mode.
const CORE_FONTS: &[&str] = &[
  "courier",
  "courier-bold",
  "courier-boldoblique",
  "courier-oblique",
  "helvetica",
  "helvetica-bold",
  "helvetica-boldoblique",
  "helvetica-oblique",
  "times-roman",
  "times-bold",
  "times-bolditalic",
  "times-italic",
  "symbol",
  "zapfdingbats",
];

/// Scalar header keywords captured verbatim. Anything else is skipped
/// without error.
const SCALAR_KEYWORDS: &[&str] = &[
  "FontName",
  "FullName",
  "FamilyName",
  "PostScriptName",
  "Weight",
  "ItalicAngle",
  "IsFixedPitch",
  "CharacterSet",
  "UnderlinePosition",
  "UnderlineThickness",
  "Version",
  "EncodingScheme",
  "CapHeight",
  "XHeight",
  "Ascender",
  "Descender",
  "StdHW",
  "StdVW",
  "StartCharMetrics",
  "FontHeightOffset",
];

/// What the parser does with a recognized line keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeywordAction {
  /// Capture the rest of the line verbatim as header metadata.
  Scalar,
  /// Split the rest of the line into the four bounding-box components.
  BoundingBox,
  /// Parse a semicolon-delimited 8-bit character record.
  CharMetric,
  /// Parse a semicolon-delimited Unicode character record.
  UnicodeMetric,
  /// Recognized but discarded; kerning is out of scope.
  KernPair,
}

pub(crate) fn action_for(keyword: &str) -> Option<KeywordAction> {
  match keyword {
    "C" => Some(KeywordAction::CharMetric),
    "U" => Some(KeywordAction::UnicodeMetric),
    "KPX" => Some(KeywordAction::KernPair),
    "FontBBox" => Some(KeywordAction::BoundingBox),
    _ if SCALAR_KEYWORDS.contains(&keyword) => Some(KeywordAction::Scalar),
    _ => None,
  }
}

/// Fixed CID-to-GID lookup table for Unicode faces.
///
/// Always `2 * 65536` bytes: one big-endian `u16` glyph id per code point in
/// `[0, 65535]`. Slots never written decode to glyph id 0. The table is
/// owned by the parser while it is being filled and exposed only through the
/// finished [`FontMetrics`].
#[derive(Clone, PartialEq, Eq)]
pub struct CidToGidMap {
  bytes: Box<[u8]>,
}

impl CidToGidMap {
  /// Number of code-point slots in the table.
  pub const SLOTS: usize = 0x1_0000;

  pub fn new() -> Self {
    Self {
      bytes: vec![0u8; Self::SLOTS * 2].into_boxed_slice(),
    }
  }

  pub(crate) fn set(&mut self, code: u32, glyph: u32) {
    let idx = code as usize * 2;
    self.bytes[idx] = (glyph >> 8) as u8;
    self.bytes[idx + 1] = (glyph & 0xff) as u8;
  }

  /// Glyph id for a code point; out-of-range and unset code points are 0.
  pub fn glyph(&self, code: u32) -> u16 {
    if code as usize >= Self::SLOTS {
      return 0;
    }
    let idx = code as usize * 2;
    u16::from_be_bytes([self.bytes[idx], self.bytes[idx + 1]])
  }

  /// The raw big-endian table, for embedding into a font program.
  pub fn as_bytes(&self) -> &[u8] {
    &self.bytes
  }
}

impl Default for CidToGidMap {
  fn default() -> Self {
    Self::new()
  }
}

impl std::fmt::Debug for CidToGidMap {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let populated = self
      .bytes
      .chunks_exact(2)
      .filter(|slot| *slot != [0, 0])
      .count();
    f.debug_struct("CidToGidMap")
      .field("slots", &Self::SLOTS)
      .field("populated", &populated)
      .finish()
  }
}

impl Serialize for CidToGidMap {
  fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    let encoded = base64::engine::general_purpose::STANDARD.encode(&self.bytes);
    serializer.serialize_str(&encoded)
  }
}

impl<'de> Deserialize<'de> for CidToGidMap {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    let bytes = base64::engine::general_purpose::STANDARD
      .decode(encoded.as_bytes())
      .map_err(D::Error::custom)?;
    if bytes.len() != Self::SLOTS * 2 {
      return Err(D::Error::custom(format!(
        "CID-to-GID table must be {} bytes, got {}",
        Self::SLOTS * 2,
        bytes.len()
      )));
    }
    Ok(Self {
      bytes: bytes.into_boxed_slice(),
    })
  }
}

/// Structured description of one font's metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FontMetrics {
  /// Scalar header keywords, captured verbatim.
  pub header: BTreeMap<String, String>,
  /// The four FontBBox components.
  pub font_bbox: Option<[f32; 4]>,
  /// Whether the source was a Unicode (UFM) metrics file.
  pub is_unicode: bool,
  /// Advance widths keyed by character code.
  pub widths_by_code: HashMap<u32, f32>,
  /// Advance widths for unencoded glyphs, keyed by glyph name.
  pub widths_by_name: HashMap<String, f32>,
  /// Code-to-glyph-name mapping for codes whose name is not just the hex
  /// spelling of the code itself.
  pub code_to_name: HashMap<u32, String>,
  /// Advance width used for characters the font does not cover.
  pub missing_width: Option<f32>,
  /// CID-to-GID table; present only for Unicode faces.
  #[serde(default)]
  pub cid_to_gid: Option<CidToGidMap>,
}

impl FontMetrics {
  fn new(is_unicode: bool) -> Self {
    Self {
      header: BTreeMap::new(),
      font_bbox: None,
      is_unicode,
      widths_by_code: HashMap::new(),
      widths_by_name: HashMap::new(),
      code_to_name: HashMap::new(),
      missing_width: None,
      cid_to_gid: None,
    }
  }

  /// Advance width for a character code, falling back to the missing width.
  pub fn code_width(&self, code: u32) -> Option<f32> {
    self
      .widths_by_code
      .get(&code)
      .copied()
      .or(self.missing_width)
  }

  /// Advance width for an unencoded glyph name.
  pub fn named_width(&self, name: &str) -> Option<f32> {
    self.widths_by_name.get(name).copied()
  }
}

/// On-disk form: the metrics plus the schema version tag.
#[derive(Serialize, Deserialize)]
struct CachedFontMetrics {
  version: u32,
  metrics: FontMetrics,
}

/// Loads font metrics, going through the persistent cache tier.
#[derive(Debug, Clone)]
pub struct FontMetricsLoader {
  unicode: bool,
  cache_dir: Option<PathBuf>,
}

impl FontMetricsLoader {
  pub fn new() -> Self {
    Self {
      unicode: true,
      cache_dir: None,
    }
  }

  /// Select 8-bit (AFM) or Unicode (UFM) metrics. Core PostScript faces use
  /// AFM either way.
  pub fn with_unicode(mut self, unicode: bool) -> Self {
    self.unicode = unicode;
    self
  }

  /// Directory for the persistent cache. Defaults to the font's own
  /// directory.
  pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.cache_dir = Some(dir.into());
    self
  }

  /// Load metrics for the font at `font` (directory + base file name, no
  /// extension).
  ///
  /// A cache entry with the current schema version short-circuits the parse.
  /// `Ok(None)` means neither a valid cache entry nor a source metrics file
  /// exists — a legitimate "font unavailable" outcome, not an error.
  pub fn load(&self, font: &Path) -> Result<Option<FontMetrics>> {
    let name = font
      .file_name()
      .and_then(|n| n.to_str())
      .ok_or_else(|| FontError::InvalidFontPath {
        path: font.display().to_string(),
      })?;
    let dir = font.parent().unwrap_or_else(|| Path::new("."));

    let is_core = CORE_FONTS.contains(&name.to_ascii_lowercase().as_str());
    let extension = if !self.unicode || is_core { "afm" } else { "ufm" };
    let metrics_name = format!("{name}.{extension}");
    debug!("loading font metrics for {name} from {metrics_name}");

    let cache_dir = self.cache_dir.as_deref().unwrap_or(dir);
    let cache_path = cache_dir.join(format!("{metrics_name}.json"));
    if let Some(metrics) = read_cache(&cache_path) {
      debug!("font metrics cache hit: {}", cache_path.display());
      return Ok(Some(metrics));
    }

    let source = dir.join(&metrics_name);
    if !source.exists() {
      debug!("no metrics source or cache for {name}");
      return Ok(None);
    }

    let metrics = parse_metrics_file(&source, extension == "ufm")?;
    write_cache(&cache_path, &metrics);
    Ok(Some(metrics))
  }
}

impl Default for FontMetricsLoader {
  fn default() -> Self {
    Self::new()
  }
}

/// Read a cached entry, accepting it only when its version tag matches the
/// running schema version.
fn read_cache(path: &Path) -> Option<FontMetrics> {
  let bytes = std::fs::read(path).ok()?;
  match serde_json::from_slice::<CachedFontMetrics>(&bytes) {
    Ok(cached) if cached.version == FONT_CACHE_VERSION => Some(cached.metrics),
    Ok(_) => {
      debug!(
        "font metrics cache is out of date, regenerating: {}",
        path.display()
      );
      None
    }
    Err(_) => None,
  }
}

/// Persist a freshly parsed entry, replacing any previous one whole.
fn write_cache(path: &Path, metrics: &FontMetrics) {
  let cached = CachedFontMetrics {
    version: FONT_CACHE_VERSION,
    metrics: metrics.clone(),
  };
  let Ok(serialized) = serde_json::to_vec(&cached) else {
    return;
  };

  let mut tmp = path.as_os_str().to_owned();
  tmp.push(".tmp");
  let tmp = PathBuf::from(tmp);
  let written = std::fs::write(&tmp, &serialized).is_ok() && std::fs::rename(&tmp, path).is_ok();
  if !written {
    let _ = std::fs::remove_file(&tmp);
    warn!("failed to write font metrics cache: {}", path.display());
  }
}

/// One semicolon-delimited character record, sub-fields decomposed. Absent
/// sub-fields stay unset; they never abort the parse.
#[derive(Debug, Default, PartialEq)]
struct CharRecord {
  code: Option<i64>,
  name: Option<String>,
  width: Option<f32>,
  /// Decomposed but not registered; per-glyph boxes are not part of the
  /// metrics structure.
  #[allow(dead_code)]
  bbox: Vec<f32>,
  glyph: Option<u32>,
}

fn parse_record(row: &str, code_key: &str) -> CharRecord {
  let mut rec = CharRecord::default();
  for field in row.split(';') {
    let mut tokens = field.split_whitespace();
    let Some(key) = tokens.next() else { continue };
    let values: Vec<&str> = tokens.collect();
    let first = values.first().copied();

    if key == code_key {
      rec.code = first.and_then(|v| v.parse::<i64>().ok());
      continue;
    }
    match key {
      "N" => rec.name = first.map(str::to_string),
      "WX" => rec.width = first.and_then(|v| v.parse::<f32>().ok()),
      "G" => rec.glyph = first.and_then(|v| v.parse::<u32>().ok()),
      "B" => rec.bbox = values.iter().filter_map(|v| v.parse::<f32>().ok()).collect(),
      _ => {}
    }
  }
  rec
}

/// Whether a glyph name is purely the hex spelling of its own code, in which
/// case the code-to-name mapping would be redundant.
fn name_is_hex_of(name: &str, code: u32) -> bool {
  !name.is_empty()
    && name.bytes().all(|b| b.is_ascii_hexdigit())
    && u32::from_str_radix(name, 16).map_or(false, |value| value == code)
}

fn register_record(
  metrics: &mut FontMetrics,
  table: Option<&mut CidToGidMap>,
  rec: CharRecord,
  unicode_record: bool,
) {
  let width = rec.width.unwrap_or(0.0);
  match rec.code {
    Some(code) if code >= 0 => {
      let Ok(code) = u32::try_from(code) else {
        return;
      };
      if unicode_record && code < CidToGidMap::SLOTS as u32 {
        if let (Some(table), Some(glyph)) = (table, rec.glyph) {
          table.set(code, glyph);
        }
      }
      if let Some(name) = &rec.name {
        if !name_is_hex_of(name, code) {
          metrics.code_to_name.insert(code, name.clone());
        }
      }
      metrics.widths_by_code.insert(code, width);
    }
    Some(code) => {
      // Unencoded glyph; -1 is the conventional marker.
      if let Some(name) = rec.name {
        if code == -1 && metrics.missing_width.is_none() && name == ".notdef" {
          metrics.missing_width = Some(width);
        }
        metrics.widths_by_name.insert(name, width);
      }
    }
    None => {}
  }
}

fn split_keyword(row: &str) -> Option<(&str, &str)> {
  let pos = row.find(' ')?;
  if pos == 0 {
    return None;
  }
  Some((&row[..pos], &row[pos..]))
}

fn parse_bbox(rest: &str) -> Option<[f32; 4]> {
  let values: Vec<f32> = rest
    .split_whitespace()
    .filter_map(|v| v.parse::<f32>().ok())
    .collect();
  (values.len() >= 4).then(|| [values[0], values[1], values[2], values[3]])
}

/// Parse a metrics file in one streaming pass. Lines with unrecognized
/// keywords are skipped silently.
fn parse_metrics_file(path: &Path, is_unicode: bool) -> Result<FontMetrics> {
  let read_failed = |reason: String| FontError::MetricsReadFailed {
    path: path.display().to_string(),
    reason,
  };

  let file = File::open(path).map_err(|e| read_failed(e.to_string()))?;
  let reader = BufReader::new(file);

  let mut metrics = FontMetrics::new(is_unicode);
  let mut cid_to_gid = is_unicode.then(CidToGidMap::new);

  for line in reader.lines() {
    let line = line.map_err(|e| read_failed(e.to_string()))?;
    let row = line.trim();
    let Some((keyword, rest)) = split_keyword(row) else {
      continue;
    };

    match action_for(keyword) {
      Some(KeywordAction::Scalar) => {
        metrics
          .header
          .insert(keyword.to_string(), rest.trim().to_string());
      }
      Some(KeywordAction::BoundingBox) => metrics.font_bbox = parse_bbox(rest),
      Some(KeywordAction::CharMetric) => {
        let rec = parse_record(row, "C");
        register_record(&mut metrics, cid_to_gid.as_mut(), rec, false);
      }
      Some(KeywordAction::UnicodeMetric) => {
        if is_unicode {
          let rec = parse_record(row, "U");
          register_record(&mut metrics, cid_to_gid.as_mut(), rec, true);
        }
      }
      Some(KeywordAction::KernPair) | None => {}
    }
  }

  metrics.cid_to_gid = cid_to_gid;
  Ok(metrics)
}
