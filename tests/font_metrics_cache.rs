//! Font metrics loading through the persistent cache tier.

use pdfpress::{CidToGidMap, FontMetricsLoader};
use std::path::Path;

const AFM: &str = "\
StartFontMetrics 4.1
FontName Example-Regular
FontBBox -166 -225 1000 931
Ascender 718
Descender -207
C 32 ; WX 278 ; N space ; B 0 0 0 0 ;
C 65 ; WX 722 ; N A ; B 16 0 706 718 ;
C -1 ; WX 500 ; N .notdef ;
";

const UFM: &str = "\
StartFontMetrics 4.1
FontName ExampleUnicode
FontBBox -100 -200 1100 900
U 65 ; WX 722 ; N A ; G 36 ;
U 960 ; WX 602 ; N pi ; G 410 ;
U -1 ; WX 500 ; N .notdef ;
";

fn write(path: &Path, contents: &str) {
  std::fs::write(path, contents).unwrap();
}

#[test]
fn character_record_registers_width_and_name() {
  let dir = tempfile::tempdir().unwrap();
  write(&dir.path().join("Example.afm"), AFM);

  let metrics = FontMetricsLoader::new()
    .with_unicode(false)
    .load(&dir.path().join("Example"))
    .unwrap()
    .unwrap();

  assert_eq!(metrics.widths_by_code.get(&65), Some(&722.0));
  // "A" is not the hex spelling of 65 ("41"), so the name is recorded
  assert_eq!(metrics.code_to_name.get(&65).map(String::as_str), Some("A"));
  assert_eq!(metrics.missing_width, Some(500.0));
}

#[test]
fn unicode_metrics_produce_a_full_cid_table() {
  let dir = tempfile::tempdir().unwrap();
  write(&dir.path().join("ExampleUnicode.ufm"), UFM);

  let metrics = FontMetricsLoader::new()
    .load(&dir.path().join("ExampleUnicode"))
    .unwrap()
    .unwrap();

  let table = metrics.cid_to_gid.as_ref().unwrap();
  assert_eq!(table.as_bytes().len(), CidToGidMap::SLOTS * 2);
  assert_eq!(table.glyph(960), 410);
  // code points absent from the source decode to glyph id 0
  assert_eq!(table.glyph(961), 0);
  assert_eq!(table.glyph(65534), 0);
}

#[test]
fn second_load_is_served_from_the_persistent_cache() {
  let dir = tempfile::tempdir().unwrap();
  write(&dir.path().join("Example.afm"), AFM);

  let loader = FontMetricsLoader::new().with_unicode(false);
  loader.load(&dir.path().join("Example")).unwrap().unwrap();

  // the source disappears; the cache must carry the second load
  std::fs::remove_file(dir.path().join("Example.afm")).unwrap();
  let metrics = loader.load(&dir.path().join("Example")).unwrap().unwrap();
  assert_eq!(metrics.widths_by_code.get(&65), Some(&722.0));
}

#[test]
fn stale_cache_entry_is_regenerated_and_overwritten() {
  let dir = tempfile::tempdir().unwrap();
  write(&dir.path().join("Example.afm"), AFM);
  let cache_path = dir.path().join("Example.afm.json");

  let loader = FontMetricsLoader::new().with_unicode(false);
  loader.load(&dir.path().join("Example")).unwrap().unwrap();

  // doctor the persisted version tag so the entry no longer matches
  let mut persisted: serde_json::Value =
    serde_json::from_slice(&std::fs::read(&cache_path).unwrap()).unwrap();
  let current_version = persisted["version"].as_u64().unwrap();
  persisted["version"] = serde_json::Value::from(current_version + 1);
  persisted["metrics"]["widths_by_code"]["65"] = serde_json::Value::from(1.0);
  std::fs::write(&cache_path, serde_json::to_vec(&persisted).unwrap()).unwrap();

  let metrics = loader.load(&dir.path().join("Example")).unwrap().unwrap();
  // values come from the source, not the doctored entry
  assert_eq!(metrics.widths_by_code.get(&65), Some(&722.0));

  // and the entry on disk carries the current version again
  let rewritten: serde_json::Value =
    serde_json::from_slice(&std::fs::read(&cache_path).unwrap()).unwrap();
  assert_eq!(rewritten["version"].as_u64().unwrap(), current_version);
}

#[test]
fn missing_font_is_reported_as_absent_not_an_error() {
  let dir = tempfile::tempdir().unwrap();
  let outcome = FontMetricsLoader::new()
    .load(&dir.path().join("NoSuchFace"))
    .unwrap();
  assert!(outcome.is_none());
}
