//! MVR scene normalizer.
//!
//! An `.mvr` file is a zip archive containing `GeneralSceneDescription.xml`
//! and the `.gdtf` profiles its fixtures reference. Fixtures are found at any
//! depth below `Layers` (inside `Layer`/`ChildList`/`GroupObject`).
//!
//! ```xml
//! <Fixture name="Spot 1" uuid="...">
//!   <GDTFSpec>Martin@Mac_Viper.gdtf</GDTFSpec>
//!   <GDTFMode>Standard 16bit</GDTFMode>
//!   <FixtureID>101</FixtureID>
//!   <Addresses><Address break="0">1025</Address></Addresses>
//! </Fixture>
//! ```

use std::collections::HashSet;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use super::gdtf::load_gdtf_bytes;
use super::{attr, has_extension, local_name, read_entry_bytes, read_entry_text, xml_error};
use super::{ImportBatch, ImportError, GDTF_EXT, MVR_SCENE_FILE};
use crate::model::{parse_patch, FixtureId, FixtureRecord, ProfileSource};

/// Load an `.mvr` archive: fixtures from the scene plus every embedded profile.
pub fn load_mvr(path: &Path) -> Result<ImportBatch, ImportError> {
    let file = std::fs::File::open(path)?;
    let batch = read_mvr(file)?;
    tracing::info!(
        path = %path.display(),
        fixtures = batch.fixtures.len(),
        profiles = batch.profiles.len(),
        "loaded MVR"
    );
    Ok(batch)
}

pub fn load_mvr_bytes(bytes: &[u8]) -> Result<ImportBatch, ImportError> {
    read_mvr(Cursor::new(bytes))
}

fn read_mvr<R: Read + Seek>(reader: R) -> Result<ImportBatch, ImportError> {
    let mut archive = zip::ZipArchive::new(reader)?;
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();

    let scene = find_scene_entry(&names)
        .ok_or_else(|| ImportError::malformed("archive", "no scene description XML found"))?;
    let xml = read_entry_text(&mut archive, &scene)?;
    let mut batch = parse_scene_xml(&xml)?;

    let mut gdtf_names: Vec<&String> = names.iter().filter(|n| has_extension(n, GDTF_EXT)).collect();
    gdtf_names.sort();
    for name in gdtf_names {
        let parsed = read_entry_bytes(&mut archive, name).and_then(|bytes| {
            load_gdtf_bytes(
                &bytes,
                ProfileSource::Embedded {
                    file_name: name.clone(),
                },
            )
        });
        match parsed {
            Ok(parsed) => {
                for w in parsed.warnings {
                    batch.warn(w);
                }
                batch.profiles.push(parsed.draft);
            }
            Err(e) => batch.warn(format!("Skipped embedded profile {name}: {e}")),
        }
    }
    Ok(batch)
}

/// The canonical scene file, else any scene-like XML, else the first XML.
fn find_scene_entry(names: &[String]) -> Option<String> {
    let xml: Vec<&String> = names.iter().filter(|n| has_extension(n, "xml")).collect();
    xml.iter()
        .find(|n| n.rsplit('/').next() == Some(MVR_SCENE_FILE))
        .or_else(|| xml.iter().find(|n| n.contains("GeneralSceneDescription") || n.contains("Scene")))
        .or_else(|| xml.first())
        .map(|n| (*n).clone())
}

// ── Scene XML ───────────────────────────────────────────────────────

/// Child element whose text is being captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Spec,
    Mode,
    FixtureId,
    FixtureIdNumeric,
    Address,
}

#[derive(Debug, Default)]
struct FixtureDraft {
    name: String,
    uuid: Option<String>,
    spec: Option<String>,
    mode: Option<String>,
    fixture_id: Option<String>,
    fixture_id_numeric: Option<String>,
    address: Option<String>,
}

impl FixtureDraft {
    fn location(&self) -> String {
        match &self.uuid {
            Some(uuid) => format!("fixture '{}' ({uuid})", self.name),
            None => format!("fixture '{}'", self.name),
        }
    }

    fn set(&mut self, field: Field, text: String) {
        let slot = match field {
            Field::Spec => &mut self.spec,
            Field::Mode => &mut self.mode,
            Field::FixtureId => &mut self.fixture_id,
            Field::FixtureIdNumeric => &mut self.fixture_id_numeric,
            Field::Address => &mut self.address,
        };
        if slot.is_none() && !text.is_empty() {
            *slot = Some(text);
        }
    }

    fn finish(self) -> Result<FixtureRecord, ImportError> {
        let location = self.location();
        let id = [&self.fixture_id, &self.fixture_id_numeric]
            .into_iter()
            .flatten()
            .find_map(|raw| raw.trim().parse::<u32>().ok())
            .ok_or_else(|| ImportError::malformed(&location, "missing or non-numeric FixtureID"))?;
        let type_label = self
            .spec
            .ok_or_else(|| ImportError::malformed(&location, "missing GDTFSpec"))?;
        let address = self
            .address
            .ok_or_else(|| ImportError::malformed(&location, "missing Addresses/Address"))?;
        let (universe, channel) = parse_patch(&address).ok_or_else(|| {
            ImportError::malformed(&location, format!("invalid DMX address '{address}'"))
        })?;
        let name = if self.name.trim().is_empty() {
            format!("Fixture {id}")
        } else {
            self.name
        };
        let mut record =
            FixtureRecord::new(FixtureId(id), name, type_label, universe, channel).with_mode(self.mode);
        record.uuid = self.uuid;
        Ok(record)
    }
}

/// Parse a scene description document. Returns fixtures only; embedded
/// profiles come from the surrounding archive.
pub fn parse_scene_xml(xml: &str) -> Result<ImportBatch, ImportError> {
    const DOC: &str = "scene description";
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut batch = ImportBatch::default();
    let mut seen_layers = false;
    let mut layers_depth: usize = 0;
    // Open fixtures, innermost last, each with its position in the document.
    let mut open: Vec<(usize, FixtureDraft)> = Vec::new();
    let mut started: usize = 0;
    let mut found: Vec<(usize, FixtureRecord)> = Vec::new();
    let mut capture: Option<Field> = None;
    let mut ids = HashSet::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| xml_error(DOC, reader.buffer_position(), e))?;
        match event {
            Event::Eof => break,
            Event::Start(ref e) => {
                let name = local_name(e);
                if name == "Layers" {
                    seen_layers = true;
                    layers_depth += 1;
                } else if layers_depth > 0 && name == "Fixture" {
                    capture = None;
                    open.push((
                        started,
                        FixtureDraft {
                            name: attr(e, "name").unwrap_or_default(),
                            uuid: attr(e, "uuid"),
                            ..FixtureDraft::default()
                        },
                    ));
                    started += 1;
                } else if let Some((_, draft)) = open.last_mut() {
                    capture = field_for(&name);
                    // Some writers carry the value as an attribute.
                    if let (Some(field), Some(value)) = (capture, attr(e, "value")) {
                        draft.set(field, value.trim().to_string());
                    }
                }
            }
            Event::Empty(ref e) => {
                if let Some((_, draft)) = open.last_mut() {
                    if let (Some(field), Some(value)) = (field_for(&local_name(e)), attr(e, "value")) {
                        draft.set(field, value.trim().to_string());
                    }
                } else if local_name(e) == "Layers" {
                    seen_layers = true;
                }
            }
            Event::Text(ref t) => {
                if let (Some(field), Some((_, draft))) = (capture, open.last_mut()) {
                    let text = t
                        .unescape()
                        .map(|c| c.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(t).to_string());
                    draft.set(field, text.trim().to_string());
                }
            }
            Event::End(ref e) => {
                capture = None;
                match String::from_utf8_lossy(e.local_name().as_ref()).as_ref() {
                    "Fixture" => {
                        if let Some((position, draft)) = open.pop() {
                            let record = draft.finish()?;
                            if !ids.insert(record.id) {
                                return Err(ImportError::malformed(
                                    format!("fixture '{}'", record.name),
                                    format!("duplicate FixtureID {}", record.id),
                                ));
                            }
                            found.push((position, record));
                        }
                    }
                    "Layers" => layers_depth = layers_depth.saturating_sub(1),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    if !seen_layers {
        return Err(ImportError::malformed(DOC, "missing Layers fixture container"));
    }
    // Inner fixtures close first; report in document order.
    found.sort_by_key(|(position, _)| *position);
    batch.fixtures = found.into_iter().map(|(_, record)| record).collect();
    tracing::debug!(fixtures = batch.fixtures.len(), "parsed MVR scene");
    Ok(batch)
}

fn field_for(element: &str) -> Option<Field> {
    match element {
        "GDTFSpec" => Some(Field::Spec),
        "GDTFMode" => Some(Field::Mode),
        "FixtureID" => Some(Field::FixtureId),
        "FixtureIDNumeric" => Some(Field::FixtureIdNumeric),
        "Address" => Some(Field::Address),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
pub(crate) mod tests {
    use super::*;
    use crate::import::gdtf::tests::VIPER;
    use crate::import::tests::zip_bytes;

    pub(crate) const SCENE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<GeneralSceneDescription verMajor="1" verMinor="5">
  <Scene>
    <Layers>
      <Layer name="Truss 1" uuid="L1">
        <ChildList>
          <Fixture name="Spot 1" uuid="AAA">
            <Matrix>{1,0,0}{0,1,0}{0,0,1}{0,0,0}</Matrix>
            <GDTFSpec>Martin@Mac_Viper.gdtf</GDTFSpec>
            <GDTFMode>Standard 16bit</GDTFMode>
            <FixtureID>101</FixtureID>
            <Addresses><Address break="0">1025</Address></Addresses>
          </Fixture>
          <GroupObject name="Wash">
            <ChildList>
              <Fixture name="Wash &amp; Beam" uuid="BBB">
                <GDTFSpec>Generic LED Par</GDTFSpec>
                <FixtureID>102</FixtureID>
                <Addresses><Address break="0">2.017</Address></Addresses>
              </Fixture>
            </ChildList>
          </GroupObject>
        </ChildList>
      </Layer>
    </Layers>
  </Scene>
</GeneralSceneDescription>"#;

    #[test]
    fn parses_nested_fixtures_and_both_address_forms() {
        let batch = parse_scene_xml(SCENE).unwrap();
        assert_eq!(batch.fixtures.len(), 2);

        let spot = &batch.fixtures[0];
        assert_eq!(spot.id, FixtureId(101));
        assert_eq!(spot.type_label, "Martin@Mac_Viper.gdtf");
        assert_eq!(spot.mode_label.as_deref(), Some("Standard 16bit"));
        assert_eq!((spot.universe.get(), spot.channel.get()), (3, 1));
        assert_eq!(spot.uuid.as_deref(), Some("AAA"));

        let wash = &batch.fixtures[1];
        assert_eq!(wash.name, "Wash & Beam");
        assert_eq!((wash.universe.get(), wash.channel.get()), (2, 17));
        assert!(wash.mode_label.is_none());
    }

    #[test]
    fn fixture_inside_fixture_child_list_is_kept() {
        let xml = r#"<GeneralSceneDescription><Scene><Layers><Layer name="L"><ChildList>
          <Fixture name="Truss Hoist" uuid="OUT">
            <GDTFSpec>Generic Hoist</GDTFSpec>
            <FixtureID>1</FixtureID>
            <ChildList>
              <Fixture name="Hung Spot" uuid="IN">
                <GDTFSpec>Martin@Mac_Viper.gdtf</GDTFSpec>
                <FixtureID>2</FixtureID>
                <Addresses><Address break="0">1.041</Address></Addresses>
              </Fixture>
            </ChildList>
            <Addresses><Address break="0">1.001</Address></Addresses>
          </Fixture>
        </ChildList></Layer></Layers></Scene></GeneralSceneDescription>"#;

        let batch = parse_scene_xml(xml).unwrap();
        let names: Vec<&str> = batch.fixtures.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Truss Hoist", "Hung Spot"]);

        let outer = &batch.fixtures[0];
        assert_eq!(outer.type_label, "Generic Hoist");
        assert_eq!((outer.universe.get(), outer.channel.get()), (1, 1));
        let inner = &batch.fixtures[1];
        assert_eq!(inner.id, FixtureId(2));
        assert_eq!(inner.type_label, "Martin@Mac_Viper.gdtf");
        assert_eq!((inner.universe.get(), inner.channel.get()), (1, 41));
    }

    #[test]
    fn missing_fixture_id_is_malformed() {
        let xml = SCENE.replace("<FixtureID>102</FixtureID>", "");
        let err = parse_scene_xml(&xml).unwrap_err();
        assert!(
            matches!(&err, ImportError::Malformed { location, .. } if location.contains("Wash & Beam")),
            "got {err:?}"
        );
    }

    #[test]
    fn duplicate_fixture_id_is_malformed() {
        let xml = SCENE.replace("<FixtureID>102</FixtureID>", "<FixtureID>101</FixtureID>");
        assert!(matches!(parse_scene_xml(&xml), Err(ImportError::Malformed { .. })));
    }

    #[test]
    fn missing_container_is_malformed() {
        let err = parse_scene_xml("<GeneralSceneDescription><Scene/></GeneralSceneDescription>").unwrap_err();
        assert!(matches!(err, ImportError::Malformed { .. }));
    }

    #[test]
    fn fixtures_outside_layers_are_ignored() {
        let xml = r#"<GeneralSceneDescription><AUXData><Fixture name="x"><FixtureID>9</FixtureID></Fixture></AUXData><Scene><Layers/></Scene></GeneralSceneDescription>"#;
        let batch = parse_scene_xml(xml).unwrap();
        assert!(batch.fixtures.is_empty());
    }

    #[test]
    fn archive_carries_embedded_profiles_and_warnings() {
        let bytes = zip_bytes(&[
            ("GeneralSceneDescription.xml", SCENE.as_bytes()),
            ("Martin@Mac_Viper.gdtf", &zip_bytes(&[("description.xml", VIPER.as_bytes())])),
            ("Broken.gdtf", b"garbage"),
        ]);
        let batch = load_mvr_bytes(&bytes).unwrap();
        assert_eq!(batch.fixtures.len(), 2);
        assert_eq!(batch.profiles.len(), 1);
        assert_eq!(batch.profiles[0].name, "Mac Viper");
        assert_eq!(batch.warnings.len(), 1);
    }
}
