//! GDTF profile parser.
//!
//! A `.gdtf` file is a zip archive whose `description.xml` carries one
//! `FixtureType` with its `DMXModes`. Each mode lists `DMXChannel`s whose
//! `Offset` attribute gives the 1-based channel(s) the channel occupies
//! (`"1"` for 8-bit, `"1,2"` for 16-bit ...). The first `LogicalChannel`
//! names the controlled attribute.

use std::io::Cursor;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{attr, has_extension, local_name, read_entry_text, xml_error, ImportBatch, ImportError};
use super::{GDTF_DESCRIPTION_FILE, GDTF_EXT};
use crate::model::{AttributeDef, DmxMode, ProfileDraft, ProfileSource, UNIVERSE_SIZE};

/// Name given to unused channels inside a mode's footprint.
pub const RESERVED_ATTRIBUTE: &str = "Reserved";

/// A parsed profile plus the non-fatal issues encountered.
#[derive(Debug, Clone)]
pub struct ParsedProfile {
    pub draft: ProfileDraft,
    pub warnings: Vec<String>,
}

/// Load a standalone `.gdtf` file.
pub fn load_gdtf(path: &Path) -> Result<ParsedProfile, ImportError> {
    let bytes = std::fs::read(path)?;
    load_gdtf_bytes(
        &bytes,
        ProfileSource::External {
            path: path.display().to_string(),
        },
    )
}

/// Parse a GDTF archive held in memory.
pub fn load_gdtf_bytes(bytes: &[u8], source: ProfileSource) -> Result<ParsedProfile, ImportError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let entry = archive
        .file_names()
        .find(|n| n.ends_with(GDTF_DESCRIPTION_FILE))
        .map(str::to_string)
        .ok_or_else(|| ImportError::malformed(source_label(&source), "archive has no description.xml"))?;
    let xml = read_entry_text(&mut archive, &entry)?;
    parse_description_xml(&xml, source)
}

/// Load every `.gdtf` file in a directory. Unreadable files become warnings.
pub fn load_gdtf_folder(dir: &Path) -> Result<ImportBatch, ImportError> {
    let mut batch = ImportBatch::default();
    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && has_extension(&p.to_string_lossy(), GDTF_EXT))
        .collect();
    paths.sort();
    for path in paths {
        match load_gdtf(&path) {
            Ok(parsed) => {
                for w in parsed.warnings {
                    batch.warn(w);
                }
                batch.profiles.push(parsed.draft);
            }
            Err(e) => batch.warn(format!("Skipped {}: {e}", path.display())),
        }
    }
    tracing::info!(dir = %dir.display(), profiles = batch.profiles.len(), "loaded GDTF folder");
    Ok(batch)
}

fn source_label(source: &ProfileSource) -> String {
    match source {
        ProfileSource::Embedded { file_name } => file_name.clone(),
        ProfileSource::External { path } => path.clone(),
        ProfileSource::Inline => "description.xml".into(),
    }
}

// ── description.xml ─────────────────────────────────────────────────

/// One `DMXChannel` as read, before packing.
#[derive(Debug)]
struct RawChannel {
    offsets: Vec<u16>,
    attribute: Option<String>,
    in_first_break: bool,
}

impl RawChannel {
    fn from_element(e: &BytesStart<'_>) -> Self {
        let offsets = attr(e, "Offset")
            .map(|o| {
                o.split(',')
                    .filter_map(|part| part.trim().parse::<u16>().ok())
                    .filter(|&n| n >= 1)
                    .collect()
            })
            .unwrap_or_default();
        let in_first_break = attr(e, "DMXBreak")
            .map(|b| b.trim() == "1" || b.trim().eq_ignore_ascii_case("overwrite"))
            .unwrap_or(true);
        Self {
            offsets,
            attribute: None,
            in_first_break,
        }
    }
}

#[derive(Debug)]
struct RawMode {
    name: String,
    channels: Vec<RawChannel>,
}

/// Parse a GDTF `description.xml` document.
pub fn parse_description_xml(xml: &str, source: ProfileSource) -> Result<ParsedProfile, ImportError> {
    let label = source_label(&source);
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut fixture_type: Option<(String, String)> = None;
    let mut modes: Vec<RawMode> = Vec::new();
    let mut current_mode: Option<RawMode> = None;
    let mut current_channel: Option<RawChannel> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| xml_error(&label, reader.buffer_position(), e))?;
        match event {
            Event::Eof => break,
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                match local_name(e).as_str() {
                    "FixtureType" if fixture_type.is_none() => {
                        let name = attr(e, "Name").unwrap_or_default();
                        let manufacturer = attr(e, "Manufacturer").unwrap_or_default();
                        fixture_type = Some((name, manufacturer));
                    }
                    "DMXMode" => {
                        let mode = RawMode {
                            name: attr(e, "Name").unwrap_or_else(|| format!("Mode {}", modes.len() + 1)),
                            channels: Vec::new(),
                        };
                        if is_empty {
                            modes.push(mode);
                        } else {
                            current_mode = Some(mode);
                        }
                    }
                    "DMXChannel" if current_mode.is_some() => {
                        let channel = RawChannel::from_element(e);
                        if is_empty {
                            if let Some(mode) = current_mode.as_mut() {
                                mode.channels.push(channel);
                            }
                        } else {
                            current_channel = Some(channel);
                        }
                    }
                    "LogicalChannel" => {
                        if let Some(channel) = current_channel.as_mut() {
                            if channel.attribute.is_none() {
                                channel.attribute = attr(e, "Attribute").map(|a| strip_namespace(&a));
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::End(ref e) => match String::from_utf8_lossy(e.local_name().as_ref()).as_ref() {
                "DMXChannel" => {
                    if let (Some(channel), Some(mode)) = (current_channel.take(), current_mode.as_mut()) {
                        mode.channels.push(channel);
                    }
                }
                "DMXMode" => {
                    if let Some(mode) = current_mode.take() {
                        modes.push(mode);
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }

    let (name, manufacturer) =
        fixture_type.ok_or_else(|| ImportError::malformed(&label, "missing FixtureType element"))?;
    let name = if name.trim().is_empty() {
        fallback_name(&source).unwrap_or_else(|| "Unnamed".into())
    } else {
        name
    };

    let mut warnings = Vec::new();
    let mut packed = Vec::new();
    for raw in modes {
        let mode = pack_mode(raw, &name, &mut warnings);
        if mode.attributes.is_empty() {
            warnings.push(format!("{name}: mode '{}' has no DMX channels, skipped", mode.name));
        } else if mode.footprint() > UNIVERSE_SIZE {
            warnings.push(format!(
                "{name}: mode '{}' spans {} channels, more than one universe, skipped",
                mode.name,
                mode.footprint()
            ));
        } else {
            packed.push(mode);
        }
    }
    if packed.is_empty() {
        return Err(ImportError::malformed(&label, format!("profile '{name}' has no usable DMX modes")));
    }

    tracing::debug!(profile = %name, modes = packed.len(), "parsed GDTF description");
    Ok(ParsedProfile {
        draft: ProfileDraft {
            manufacturer,
            name,
            modes: packed,
            source,
        },
        warnings,
    })
}

/// `"Attr:Dimmer"` → `"Dimmer"`.
fn strip_namespace(attribute: &str) -> String {
    attribute.rsplit(':').next().unwrap_or(attribute).trim().to_string()
}

fn fallback_name(source: &ProfileSource) -> Option<String> {
    let raw = match source {
        ProfileSource::Embedded { file_name } => file_name,
        ProfileSource::External { path } => path,
        ProfileSource::Inline => return None,
    };
    Path::new(raw)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
}

/// Order channels by their first offset, fill gaps with reserved attributes,
/// and make duplicate attribute names unique.
fn pack_mode(raw: RawMode, profile: &str, warnings: &mut Vec<String>) -> DmxMode {
    let mut channels: Vec<(u16, u16, String)> = Vec::new();
    for (i, ch) in raw.channels.into_iter().enumerate() {
        if !ch.in_first_break {
            continue;
        }
        let Some(&first) = ch.offsets.iter().min() else {
            // Virtual channel with no DMX footprint.
            continue;
        };
        let width = u16::try_from(ch.offsets.len()).unwrap_or(u16::MAX);
        let name = ch.attribute.unwrap_or_else(|| format!("Channel {}", i + 1));
        channels.push((first, width, name));
    }
    channels.sort_by_key(|(first, _, _)| *first);

    let mut attributes: Vec<AttributeDef> = Vec::new();
    let mut next: u16 = 1;
    for (first, width, name) in channels {
        if first < next {
            warnings.push(format!(
                "{profile}: mode '{}' channel '{name}' at offset {first} overlaps a previous channel, skipped",
                raw.name
            ));
            continue;
        }
        if first > next {
            attributes.push(AttributeDef::new(unique_name(&attributes, RESERVED_ATTRIBUTE), first - next));
        }
        attributes.push(AttributeDef::new(unique_name(&attributes, &name), width));
        next = first.saturating_add(width);
    }
    DmxMode {
        name: raw.name,
        attributes,
    }
}

/// `name`, or `name 2`, `name 3` ... if already taken.
fn unique_name(existing: &[AttributeDef], name: &str) -> String {
    if !existing.iter().any(|a| a.name == name) {
        return name.to_string();
    }
    (2u32..)
        .map(|n| format!("{name} {n}"))
        .find(|candidate| !existing.iter().any(|a| &a.name == candidate))
        .unwrap_or_else(|| name.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
pub(crate) mod tests {
    use super::*;
    use crate::import::tests::zip_bytes;

    pub(crate) const VIPER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<GDTF DataVersion="1.1">
  <FixtureType Name="Mac Viper" Manufacturer="Martin" ShortName="Viper">
    <DMXModes>
      <DMXMode Name="Standard 16bit" Geometry="Base">
        <DMXChannels>
          <DMXChannel DMXBreak="1" Offset="1,2" Geometry="Yoke">
            <LogicalChannel Attribute="Pan"><ChannelFunction Attribute="Pan"/></LogicalChannel>
          </DMXChannel>
          <DMXChannel DMXBreak="1" Offset="3,4" Geometry="Head">
            <LogicalChannel Attribute="Tilt"/>
          </DMXChannel>
          <DMXChannel DMXBreak="1" Offset="6" Geometry="Head">
            <LogicalChannel Attribute="Dimmer"/>
          </DMXChannel>
          <DMXChannel DMXBreak="1" Offset="7" Geometry="Head2">
            <LogicalChannel Attribute="Dimmer"/>
          </DMXChannel>
          <DMXChannel DMXBreak="1" Offset="" Geometry="Head">
            <LogicalChannel Attribute="NoFeature"/>
          </DMXChannel>
        </DMXChannels>
      </DMXMode>
      <DMXMode Name="Basic" Geometry="Base">
        <DMXChannels>
          <DMXChannel DMXBreak="1" Offset="1"><LogicalChannel Attribute="Dimmer"/></DMXChannel>
        </DMXChannels>
      </DMXMode>
    </DMXModes>
  </FixtureType>
</GDTF>"#;

    #[test]
    fn parses_modes_widths_and_gaps() {
        let parsed = parse_description_xml(VIPER, ProfileSource::Inline).unwrap();
        let draft = parsed.draft;
        assert_eq!(draft.name, "Mac Viper");
        assert_eq!(draft.manufacturer, "Martin");
        assert_eq!(draft.modes.len(), 2);

        let standard = &draft.modes[0];
        let names: Vec<_> = standard.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Pan", "Tilt", "Reserved", "Dimmer", "Dimmer 2"]);
        let widths: Vec<_> = standard.attributes.iter().map(|a| a.width).collect();
        assert_eq!(widths, vec![2, 2, 1, 1, 1]);
        assert_eq!(standard.footprint(), 7);
    }

    #[test]
    fn mode_wider_than_a_universe_is_skipped() {
        let wide = VIPER.replace(r#"Offset="7""#, r#"Offset="65535""#);
        let parsed = parse_description_xml(&wide, ProfileSource::Inline).unwrap();
        assert_eq!(parsed.draft.modes.len(), 1);
        assert_eq!(parsed.draft.modes[0].name, "Basic");
        assert!(parsed.warnings.iter().any(|w| w.contains("Standard 16bit")), "{:?}", parsed.warnings);

        let only_wide = r#"<GDTF><FixtureType Name="Wide" Manufacturer="X"><DMXModes>
          <DMXMode Name="M"><DMXChannels>
            <DMXChannel DMXBreak="1" Offset="1"><LogicalChannel Attribute="Dimmer"/></DMXChannel>
            <DMXChannel DMXBreak="1" Offset="60000,60001"><LogicalChannel Attribute="Pan"/></DMXChannel>
          </DMXChannels></DMXMode>
        </DMXModes></FixtureType></GDTF>"#;
        let err = parse_description_xml(only_wide, ProfileSource::Inline).unwrap_err();
        assert!(matches!(err, ImportError::Malformed { .. }), "got {err:?}");
    }

    #[test]
    fn missing_fixture_type_is_malformed() {
        let err = parse_description_xml("<GDTF/>", ProfileSource::Inline).unwrap_err();
        assert!(matches!(err, ImportError::Malformed { .. }));
    }

    #[test]
    fn broken_xml_reports_position() {
        let err = parse_description_xml("<GDTF><FixtureType Name=\"x\"></GDTF>", ProfileSource::Inline)
            .unwrap_err();
        assert!(matches!(err, ImportError::Xml { .. }), "got {err:?}");
    }

    #[test]
    fn loads_from_archive_bytes() {
        let bytes = zip_bytes(&[("description.xml", VIPER.as_bytes())]);
        let parsed = load_gdtf_bytes(
            &bytes,
            ProfileSource::Embedded {
                file_name: "Martin@Mac_Viper.gdtf".into(),
            },
        )
        .unwrap();
        assert_eq!(parsed.draft.modes[1].name, "Basic");
    }

    #[test]
    fn folder_loader_skips_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("viper.gdtf"),
            zip_bytes(&[("description.xml", VIPER.as_bytes())]),
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.gdtf"), b"not a zip").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let batch = load_gdtf_folder(dir.path()).unwrap();
        assert_eq!(batch.profiles.len(), 1);
        assert_eq!(batch.warnings.len(), 1);
        assert!(batch.warnings[0].contains("broken.gdtf"));
    }
}
