//! grandMA3 sequence pool import files.
//!
//! Two layouts share the same cue scaffolding (OffCue, CueZero, Cue 1):
//!
//! * [`render_per_attribute`]: one sequence per fixture attribute, named
//!   `{fixture id}_{attribute}`, with a single phaser at full level.
//! * [`render_by_attribute`]: one sequence per attribute name, with a phaser
//!   for every fixture carrying it, addressed by sequence number.
//!
//! Fixtures without a sequence number are left out of both.

use indexmap::IndexMap;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::Writer;

use super::ma3::{begin_document, finish_document, write_error, Ma3Settings};
use super::ExportFixture;
use crate::error::EngineError;

const SEQUENCE_FLAGS: &[(&str, &str)] = &[
    ("AutoStart", "Yes"),
    ("AutoStop", "Yes"),
    ("AutoFix", "No"),
    ("AutoStomp", "No"),
    ("SoftLTP", "Yes"),
    ("XFadeReload", "No"),
    ("SwapProtect", "No"),
    ("KillProtect", "No"),
    ("UseExecutorTime", "Yes"),
    ("OffwhenOverridden", "Yes"),
    ("SequMIB", "Enabled"),
    ("AutoPrePos", "No"),
    ("WrapAround", "Yes"),
    ("MasterGoMode", "None"),
    ("SpeedfromRate", "No"),
    ("Tracking", "Yes"),
    ("IncludeLinkLastGo", "Yes"),
    ("RateScale", "One"),
    ("SpeedScale", "One"),
    ("PreferCueAppearance", "No"),
    ("ExecutorDisplayMode", "Both"),
    ("Action", "Pool Default"),
];

const PART_FLAGS: &[(&str, &str)] = &[
    ("AlignRangeX", "No"),
    ("AlignRangeY", "No"),
    ("AlignRangeZ", "No"),
    ("PreserveGridPositions", "No"),
    ("MAgic", "No"),
    ("Mode", "0"),
    ("Action", "Pool Default"),
];

/// Level written by the per-attribute layout.
const FULL_LEVEL: &str = "100";

/// Console attribute name for a profile attribute. Unknown names pass through.
pub fn console_attribute(name: &str) -> &str {
    match name {
        "Dim" => "Dimmer",
        "R" => "ColorRGB_R",
        "G" => "ColorRGB_G",
        "B" => "ColorRGB_B",
        "W" => "ColorRGB_W",
        "WW" => "ColorRGB_WW",
        "CW" => "ColorRGB_CW",
        "White" => "ColorRGB_White",
        "Pan" => "Position_Pan",
        "Tilt" => "Position_Tilt",
        "Zoom" => "Beam_Zoom",
        "Focus" => "Beam_Focus",
        "Iris" => "Beam_Iris",
        other => other,
    }
}

struct Phaser<'a> {
    id: String,
    attribute: &'a str,
    level: &'a str,
}

fn part(guid: &str) -> BytesStart<'static> {
    let mut part = BytesStart::new("Part");
    part.push_attribute(("Guid", guid));
    part.extend_attributes(PART_FLAGS.iter().copied());
    part
}

fn start(writer: &mut Writer<Vec<u8>>, element: BytesStart<'_>) -> Result<(), EngineError> {
    writer.write_event(Event::Start(element)).map_err(write_error)
}

fn end(writer: &mut Writer<Vec<u8>>, name: &str) -> Result<(), EngineError> {
    writer.write_event(Event::End(BytesEnd::new(name))).map_err(write_error)
}

fn write_sequence(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    phasers: &[Phaser<'_>],
    guid: &mut dyn FnMut() -> String,
) -> Result<(), EngineError> {
    let mut sequence = BytesStart::new("Sequence");
    sequence.push_attribute(("Name", name));
    sequence.push_attribute(("Guid", guid().as_str()));
    sequence.extend_attributes(SEQUENCE_FLAGS.iter().copied());
    start(writer, sequence)?;

    start(
        writer,
        BytesStart::new("Cue").with_attributes([
            ("Name", "OffCue"),
            ("Release", "Yes"),
            ("Assert", "Assert"),
            ("AllowDuplicates", ""),
            ("TrigType", ""),
        ]),
    )?;
    writer.write_event(Event::Empty(part(&guid()))).map_err(write_error)?;
    end(writer, "Cue")?;

    start(
        writer,
        BytesStart::new("Cue").with_attributes([("Name", "CueZero"), ("No", "  0")]),
    )?;
    writer.write_event(Event::Empty(part(&guid()))).map_err(write_error)?;
    end(writer, "Cue")?;

    start(
        writer,
        BytesStart::new("Cue").with_attributes([("No", "  1"), ("AllowDuplicates", "")]),
    )?;
    let mut main = part(&guid());
    main.extend_attributes([("Sync", ""), ("Morph", "")]);
    start(writer, main)?;
    let size = phasers.len().to_string();
    start(writer, BytesStart::new("PresetData").with_attributes([("Size", size.as_str())]))?;
    for phaser in phasers {
        start(
            writer,
            BytesStart::new("Phaser").with_attributes([
                ("IDType", "0"),
                ("ID", phaser.id.as_str()),
                ("Attribute", phaser.attribute),
                ("GridPos", "0"),
                ("GridPosMatr", "0"),
                ("Selective", "true"),
            ]),
        )?;
        writer
            .write_event(Event::Empty(
                BytesStart::new("Step").with_attributes([("Function", phaser.attribute), ("Absolute", phaser.level)]),
            ))
            .map_err(write_error)?;
        end(writer, "Phaser")?;
    }
    end(writer, "PresetData")?;
    end(writer, "Part")?;
    end(writer, "Cue")?;
    end(writer, "Sequence")
}

/// One sequence per numbered fixture attribute. `guid` is called four times
/// per sequence.
pub fn render_per_attribute(view: &[ExportFixture], guid: &mut dyn FnMut() -> String) -> Result<String, EngineError> {
    let mut writer = begin_document()?;
    let mut count = 0usize;
    for fixture in view.iter().filter(|f| f.sequence.is_some()) {
        let id = fixture.id.to_string();
        for attr in &fixture.attributes {
            let phaser = Phaser {
                id: id.clone(),
                attribute: console_attribute(&attr.name),
                level: FULL_LEVEL,
            };
            write_sequence(&mut writer, &format!("{id}_{}", attr.name), &[phaser], guid)?;
            count += 1;
        }
    }
    tracing::debug!(sequences = count, "MA3 fixture sequences written");
    finish_document(writer)
}

/// One sequence per attribute name, in first-seen order, holding a phaser per
/// numbered fixture. Phasers carry `out_to` as their level.
pub fn render_by_attribute(
    view: &[ExportFixture],
    settings: &Ma3Settings,
    guid: &mut dyn FnMut() -> String,
) -> Result<String, EngineError> {
    let level = format!("{:.1}", settings.out_to);
    let mut by_attribute: IndexMap<&str, Vec<Phaser<'_>>> = IndexMap::new();
    for fixture in view {
        let Some(sequence) = fixture.sequence else {
            continue;
        };
        for attr in &fixture.attributes {
            by_attribute.entry(attr.name.as_str()).or_default().push(Phaser {
                id: sequence.to_string(),
                attribute: console_attribute(&attr.name),
                level: &level,
            });
        }
    }

    let mut writer = begin_document()?;
    for (name, phasers) in &by_attribute {
        write_sequence(&mut writer, name, phasers, guid)?;
    }
    tracing::debug!(sequences = by_attribute.len(), "MA3 attribute sequences written");
    finish_document(writer)
}
