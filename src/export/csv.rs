//! A `Fixture` row per fixture, followed by one `Attribute` row per selected
//! attribute.

use super::ExportFixture;
use crate::error::EngineError;

const HEADER: [&str; 13] = [
    "Type",
    "Fixture ID",
    "Name",
    "Role",
    "Master ID",
    "Sequence",
    "Profile",
    "Mode",
    "Attribute",
    "Universe",
    "Channel",
    "Absolute DMX",
    "Width",
];

fn write_error(e: impl std::fmt::Display) -> EngineError {
    EngineError::Io {
        message: format!("CSV export failed: {e}"),
    }
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub fn render(view: &[ExportFixture]) -> Result<String, EngineError> {
    let mut writer = ::csv::Writer::from_writer(Vec::new());
    writer.write_record(HEADER).map_err(write_error)?;

    for fixture in view {
        let id = fixture.id.to_string();
        let master = opt(fixture.master);
        let sequence = opt(fixture.sequence);
        let (universe, channel, absolute) = (
            fixture.universe.to_string(),
            fixture.channel.to_string(),
            fixture.absolute.to_string(),
        );
        writer
            .write_record([
                "Fixture",
                id.as_str(),
                fixture.name.as_str(),
                fixture.role.label(),
                master.as_str(),
                sequence.as_str(),
                fixture.profile_name.as_str(),
                fixture.mode_name.as_str(),
                "",
                universe.as_str(),
                channel.as_str(),
                absolute.as_str(),
                "",
            ])
            .map_err(write_error)?;
        for attr in &fixture.attributes {
            let (universe, channel, absolute, width) = (
                attr.universe.to_string(),
                attr.channel.to_string(),
                attr.absolute.to_string(),
                attr.width.to_string(),
            );
            writer
                .write_record([
                    "Attribute",
                    id.as_str(),
                    fixture.name.as_str(),
                    fixture.role.label(),
                    master.as_str(),
                    sequence.as_str(),
                    "",
                    "",
                    attr.name.as_str(),
                    universe.as_str(),
                    channel.as_str(),
                    absolute.as_str(),
                    width.as_str(),
                ])
                .map_err(write_error)?;
        }
    }

    let bytes = writer.into_inner().map_err(|e| write_error(e.error()))?;
    String::from_utf8(bytes).map_err(write_error)
}
