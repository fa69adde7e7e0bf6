//! grandMA3 DMX remote import file.
//!
//! One `DmxRemote` element per fixture attribute. Levels are written the way
//! the console stores them: a byte value repeated as three hex pairs.

use std::fmt;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::ExportFixture;
use crate::error::EngineError;

const DATA_VERSION: &str = "2.2.5.2";
const SEQUENCE_POOL: &str = "ShowData.DataPools.Default.Sequences";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema, TS)]
#[ts(export)]
pub enum Resolution {
    #[serde(rename = "8bit")]
    Bit8,
    #[default]
    #[serde(rename = "16bit")]
    Bit16,
    #[serde(rename = "24bit")]
    Bit24,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resolution::Bit8 => "8bit",
            Resolution::Bit16 => "16bit",
            Resolution::Bit24 => "24bit",
        })
    }
}

/// Levels and ranges stamped on every exported remote.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
#[serde(default)]
#[ts(export)]
pub struct Ma3Settings {
    pub trigger_on: u8,
    pub trigger_off: u8,
    pub in_from: u8,
    pub in_to: u8,
    /// Percent, 0-100.
    pub out_from: f32,
    /// Percent, 0-100.
    pub out_to: f32,
    pub resolution: Resolution,
}

impl Default for Ma3Settings {
    fn default() -> Self {
        Self {
            trigger_on: 255,
            trigger_off: 0,
            in_from: 0,
            in_to: 255,
            out_from: 0.0,
            out_to: 100.0,
            resolution: Resolution::Bit16,
        }
    }
}

impl Ma3Settings {
    pub fn validate(&self) -> Result<(), EngineError> {
        let percent = 0.0..=100.0;
        if !percent.contains(&self.out_from) || !percent.contains(&self.out_to) {
            return Err(EngineError::config("MA3 output range must lie within 0-100%"));
        }
        if self.out_from > self.out_to {
            return Err(EngineError::config("MA3 out_from must not exceed out_to"));
        }
        if self.in_from > self.in_to {
            return Err(EngineError::config("MA3 in_from must not exceed in_to"));
        }
        Ok(())
    }
}

fn level_hex(value: u8) -> String {
    format!("{value:02X}").repeat(3)
}

/// Console-style GUID: uppercase, dash separated groups turned into spaces.
pub fn random_guid() -> String {
    uuid::Uuid::new_v4().to_string().replace('-', " ").to_uppercase()
}

pub(super) fn write_error(e: impl fmt::Display) -> EngineError {
    EngineError::Io {
        message: format!("MA3 export failed: {e}"),
    }
}

/// XML declaration and the opening `GMA3` root.
pub(super) fn begin_document() -> Result<Writer<Vec<u8>>, EngineError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(write_error)?;
    writer
        .write_event(Event::Start(
            BytesStart::new("GMA3").with_attributes([("DataVersion", DATA_VERSION)]),
        ))
        .map_err(write_error)?;
    Ok(writer)
}

/// Close the root and hand back the document text.
pub(super) fn finish_document(mut writer: Writer<Vec<u8>>) -> Result<String, EngineError> {
    writer
        .write_event(Event::End(BytesEnd::new("GMA3")))
        .map_err(write_error)?;
    String::from_utf8(writer.into_inner()).map_err(write_error)
}

/// Render the view. `guid` is called once per remote.
pub fn render(
    view: &[ExportFixture],
    settings: &Ma3Settings,
    guid: &mut dyn FnMut() -> String,
) -> Result<String, EngineError> {
    let mut writer = begin_document()?;

    let trigger_on = level_hex(settings.trigger_on);
    let trigger_off = level_hex(settings.trigger_off);
    let in_from = level_hex(settings.in_from);
    let in_to = level_hex(settings.in_to);
    let out_from = format!("{:6.1}", settings.out_from);
    let out_to = format!("{:6.1}", settings.out_to);
    let resolution = settings.resolution.to_string();

    let mut count = 0usize;
    for fixture in view {
        let target = fixture.sequence.map(|seq| format!("{SEQUENCE_POOL}.{seq}"));
        for attr in &fixture.attributes {
            let name = format!("{}_{}_{}", fixture.id, fixture.name, attr.name);
            let id = guid();
            let address = attr.patch();
            let mut remote = BytesStart::new("DmxRemote");
            remote.push_attribute(("Name", name.as_str()));
            remote.push_attribute(("Guid", id.as_str()));
            if let Some(target) = &target {
                remote.push_attribute(("Target", target.as_str()));
            }
            remote.extend_attributes([
                ("TriggerOn", trigger_on.as_str()),
                ("TriggerOff", trigger_off.as_str()),
                ("InFrom", in_from.as_str()),
                ("InTo", in_to.as_str()),
                ("OutFrom", out_from.as_str()),
                ("OutTo", out_to.as_str()),
                ("Address", address.as_str()),
                ("Resolution", resolution.as_str()),
            ]);
            writer.write_event(Event::Empty(remote)).map_err(write_error)?;
            count += 1;
        }
    }

    tracing::debug!(remotes = count, "MA3 remotes written");
    finish_document(writer)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    use super::*;
    use crate::export::export_view;
    use crate::export::tests::sample_session;

    /// Attribute maps of every `DmxRemote` in document order.
    fn remotes(xml: &str) -> Vec<Vec<(String, String)>> {
        let mut reader = Reader::from_str(xml);
        let mut out = Vec::new();
        loop {
            match reader.read_event().unwrap() {
                Event::Empty(e) if e.local_name().as_ref() == b"DmxRemote" => {
                    out.push(
                        e.attributes()
                            .map(|a| {
                                let a = a.unwrap();
                                (
                                    String::from_utf8(a.key.as_ref().to_vec()).unwrap(),
                                    a.unescape_value().unwrap().into_owned(),
                                )
                            })
                            .collect(),
                    );
                }
                Event::Eof => break,
                _ => {}
            }
        }
        out
    }

    fn get<'a>(remote: &'a [(String, String)], key: &str) -> Option<&'a str> {
        remote.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    fn counter() -> impl FnMut() -> String {
        let mut n = 0;
        move || {
            n += 1;
            format!("GUID {n}")
        }
    }

    #[test]
    fn one_remote_per_fixture_attribute() {
        let view = export_view(&sample_session()).unwrap();
        let xml = render(&view, &Ma3Settings::default(), &mut counter()).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<GMA3 DataVersion=\"2.2.5.2\">"));

        let remotes = remotes(&xml);
        assert_eq!(remotes.len(), 4);
        let first = &remotes[0];
        assert_eq!(get(first, "Name"), Some("10_Spot L_Pan"));
        assert_eq!(get(first, "Guid"), Some("GUID 1"));
        assert_eq!(get(first, "Target"), Some("ShowData.DataPools.Default.Sequences.1"));
        assert_eq!(get(first, "TriggerOn"), Some("FFFFFF"));
        assert_eq!(get(first, "TriggerOff"), Some("000000"));
        assert_eq!(get(first, "OutFrom"), Some("   0.0"));
        assert_eq!(get(first, "OutTo"), Some(" 100.0"));
        assert_eq!(get(first, "Address"), Some("2.001"));
        assert_eq!(get(first, "Resolution"), Some("16bit"));
        assert_eq!(get(&remotes[3], "Name"), Some("20_Spot R_Dimmer"));
        assert_eq!(get(&remotes[3], "Address"), Some("1.015"));
    }

    #[test]
    fn settings_flow_into_remotes() {
        let settings = Ma3Settings {
            trigger_on: 0x80,
            in_to: 200,
            out_to: 50.0,
            resolution: Resolution::Bit8,
            ..Ma3Settings::default()
        };
        let view = export_view(&sample_session()).unwrap();
        let xml = render(&view, &settings, &mut counter()).unwrap();
        let first = &remotes(&xml)[0];
        assert_eq!(get(first, "TriggerOn"), Some("808080"));
        assert_eq!(get(first, "InTo"), Some("C8C8C8"));
        assert_eq!(get(first, "OutTo"), Some("  50.0"));
        assert_eq!(get(first, "Resolution"), Some("8bit"));
    }

    #[test]
    fn unnumbered_fixture_has_no_target() {
        let mut view = export_view(&sample_session()).unwrap();
        view[0].sequence = None;
        let xml = render(&view, &Ma3Settings::default(), &mut counter()).unwrap();
        assert_eq!(get(&remotes(&xml)[0], "Target"), None);
    }

    #[test]
    fn generated_guids_are_unique() {
        let view = export_view(&sample_session()).unwrap();
        let xml = render(&view, &Ma3Settings::default(), &mut random_guid).unwrap();
        let mut ids: Vec<String> = remotes(&xml)
            .iter()
            .map(|r| get(r, "Guid").unwrap().to_string())
            .collect();
        assert!(ids.iter().all(|g| g.len() == 36 && !g.contains('-')));
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn invalid_ranges_rejected() {
        let bad = Ma3Settings {
            out_from: 60.0,
            out_to: 40.0,
            ..Ma3Settings::default()
        };
        assert!(bad.validate().is_err());
        let bad = Ma3Settings {
            out_to: 120.0,
            ..Ma3Settings::default()
        };
        assert!(bad.validate().is_err());
        let bad = Ma3Settings {
            in_from: 10,
            in_to: 5,
            ..Ma3Settings::default()
        };
        assert!(bad.validate().is_err());
        assert!(Ma3Settings::default().validate().is_ok());
    }
}
