//! grandMA3 patch export normalizer.
//!
//! ```xml
//! <GMA3 DataVersion="2.2.5.2">
//!   <Fixture Name="Spot 1" FID="101" Patch="101.001" Mode="Mac Viper.DMXModes.Standard"/>
//! </GMA3>
//! ```

use std::collections::HashSet;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{attr, local_name, xml_error, ImportBatch, ImportError};
use crate::model::{parse_patch, FixtureId, FixtureRecord};

const ROOT: &str = "GMA3";

/// True if the document's root element is `GMA3`.
pub fn is_ma3_document(xml: &str) -> bool {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => return local_name(e) == ROOT,
            Ok(Event::Eof) | Err(_) => return false,
            Ok(_) => {}
        }
    }
}

/// `"Mac Viper.DMXModes.Standard"` → (`"Mac Viper"`, `Some("Standard")`).
fn split_mode(mode: &str) -> (String, Option<String>) {
    match mode.split_once(".DMXModes.") {
        Some((fixture_type, mode_name)) => (fixture_type.to_string(), Some(mode_name.to_string())),
        None => match mode.split_once('.') {
            Some((fixture_type, _)) => (fixture_type.to_string(), None),
            None => (mode.to_string(), None),
        },
    }
}

fn fixture_from(e: &BytesStart<'_>, fallback_id: u32) -> Result<FixtureRecord, ImportError> {
    let name = attr(e, "Name").unwrap_or_default();
    let location = format!("MA3 fixture '{name}'");
    let id = match attr(e, "FID") {
        Some(fid) => fid
            .trim()
            .parse::<u32>()
            .map_err(|_| ImportError::malformed(&location, format!("invalid FID '{fid}'")))?,
        None => fallback_id,
    };
    let patch = attr(e, "Patch").ok_or_else(|| ImportError::malformed(&location, "missing Patch"))?;
    let (universe, channel) = parse_patch(&patch)
        .ok_or_else(|| ImportError::malformed(&location, format!("invalid Patch '{patch}'")))?;
    let (type_label, mode) = match attr(e, "Mode").filter(|m| !m.trim().is_empty()) {
        Some(m) => split_mode(&m),
        None => return Err(ImportError::malformed(&location, "missing Mode")),
    };
    let name = if name.trim().is_empty() {
        format!("Fixture {id}")
    } else {
        name
    };
    let mut record = FixtureRecord::new(FixtureId(id), name, type_label, universe, channel).with_mode(mode);
    record.uuid = attr(e, "Guid");
    Ok(record)
}

/// Parse a grandMA3 patch document. Fixtures without an `FID` are numbered
/// by position.
pub fn parse_ma3_xml(xml: &str) -> Result<ImportBatch, ImportError> {
    const DOC: &str = "MA3 patch";
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut batch = ImportBatch::default();
    let mut saw_root = false;
    let mut ids = HashSet::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| xml_error(DOC, reader.buffer_position(), e))?;
        match event {
            Event::Eof => break,
            Event::Start(ref e) | Event::Empty(ref e) => match local_name(e).as_str() {
                ROOT => saw_root = true,
                "Fixture" if saw_root => {
                    let fallback = u32::try_from(batch.fixtures.len() + 1).unwrap_or(u32::MAX);
                    let record = fixture_from(e, fallback)?;
                    if !ids.insert(record.id) {
                        return Err(ImportError::malformed(DOC, format!("duplicate FID {}", record.id)));
                    }
                    batch.fixtures.push(record);
                }
                _ => {}
            },
            _ => {}
        }
    }

    if !saw_root {
        return Err(ImportError::malformed(DOC, "root element must be GMA3"));
    }
    tracing::info!(fixtures = batch.fixtures.len(), "parsed MA3 patch");
    Ok(batch)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    const PATCH: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<GMA3 DataVersion="2.2.5.2">
  <Fixture Name="Spot 1" FID="101" Patch="101.001" Mode="Mac Viper.DMXModes.Standard 16bit" Guid="AB CD"/>
  <Fixture Name="" FID="102" Patch="101.206" Mode="Generic Dimmer"/>
</GMA3>"#;

    #[test]
    fn parses_fixtures_from_patch() {
        let batch = parse_ma3_xml(PATCH).unwrap();
        assert_eq!(batch.fixtures.len(), 2);
        let spot = &batch.fixtures[0];
        assert_eq!(spot.id, FixtureId(101));
        assert_eq!(spot.type_label, "Mac Viper");
        assert_eq!(spot.mode_label.as_deref(), Some("Standard 16bit"));
        assert_eq!((spot.universe.get(), spot.channel.get()), (101, 1));
        let dimmer = &batch.fixtures[1];
        assert_eq!(dimmer.name, "Fixture 102");
        assert_eq!(dimmer.channel.get(), 206);
        assert!(dimmer.mode_label.is_none());
    }

    #[test]
    fn detects_root() {
        assert!(is_ma3_document(PATCH));
        assert!(!is_ma3_document("<GeneralSceneDescription/>"));
        assert!(parse_ma3_xml("<Other><Fixture/></Other>").is_err());
    }

    #[test]
    fn bad_patch_is_malformed() {
        let err = parse_ma3_xml(r#"<GMA3><Fixture Name="x" FID="1" Patch="1.999" Mode="A"/></GMA3>"#)
            .unwrap_err();
        assert!(matches!(err, ImportError::Malformed { .. }));
    }
}
