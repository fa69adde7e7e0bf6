pub mod csv;
pub mod json;
pub mod ma3;
pub mod ma3_sequences;
pub mod text;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::addressing::{resolve_session, AttributeAddress};
use crate::error::EngineError;
use crate::model::{FixtureId, GroupRole};
use crate::project::atomic_write;
use crate::session::Session;

pub use ma3::{Ma3Settings, Resolution};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ExportFormat {
    #[default]
    Text,
    Csv,
    Json,
    /// DMX remotes triggering each fixture's sequence.
    Ma3Xml,
    /// One sequence per fixture attribute.
    Ma3Sequences,
    /// One sequence per attribute across all fixtures.
    Ma3AttributeSequences,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 6] = [
        ExportFormat::Text,
        ExportFormat::Csv,
        ExportFormat::Json,
        ExportFormat::Ma3Xml,
        ExportFormat::Ma3Sequences,
        ExportFormat::Ma3AttributeSequences,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Text => "txt",
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Ma3Xml | ExportFormat::Ma3Sequences | ExportFormat::Ma3AttributeSequences => "xml",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportFormat::Text => "text",
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Ma3Xml => "ma3xml",
            ExportFormat::Ma3Sequences => "ma3sequences",
            ExportFormat::Ma3AttributeSequences => "ma3attributesequences",
        })
    }
}

impl FromStr for ExportFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace(['-', '_'], "");
        ExportFormat::ALL
            .into_iter()
            .find(|f| f.to_string() == wanted || (wanted == "txt" && *f == ExportFormat::Text))
            .ok_or_else(|| EngineError::config(format!("unknown export format '{s}'")))
    }
}

// ── Export view ─────────────────────────────────────────────────────

/// One fixture as every format sees it: resolved, numbered, selected
/// attributes only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportFixture {
    pub id: FixtureId,
    pub name: String,
    pub type_label: String,
    pub profile_name: String,
    pub mode_name: String,
    pub role: GroupRole,
    pub master: Option<FixtureId>,
    pub sequence: Option<u32>,
    pub universe: u16,
    pub channel: u16,
    pub absolute: u32,
    pub attributes: Vec<AttributeAddress>,
}

impl ExportFixture {
    /// `"u.ccc"` of the base channel.
    pub fn patch(&self) -> String {
        format!("{}.{:03}", self.universe, self.channel)
    }
}

/// Fixtures with at least one selected attribute, ascending by id.
pub fn export_view(session: &Session) -> Result<Vec<ExportFixture>, EngineError> {
    let resolved = resolve_session(session)?;
    let mut view = Vec::with_capacity(resolved.len());
    for fixture in resolved {
        let Some(record) = session.fixture(fixture.id) else {
            continue;
        };
        let attributes: Vec<AttributeAddress> = fixture.selected().cloned().collect();
        if attributes.is_empty() {
            continue;
        }
        view.push(ExportFixture {
            id: fixture.id,
            name: fixture.name,
            type_label: record.type_label.clone(),
            profile_name: fixture.profile_name,
            mode_name: fixture.mode_name,
            role: record.role(),
            master: session.linked_master(fixture.id),
            sequence: session.sequence_number(fixture.id),
            universe: record.universe.get(),
            channel: record.channel.get(),
            absolute: crate::addressing::absolute_address(record.universe, record.channel),
            attributes,
        });
    }
    Ok(view)
}

/// Render the session in `format`.
pub fn export(session: &Session, format: ExportFormat, ma3: &Ma3Settings) -> Result<String, EngineError> {
    ma3.validate()?;
    let view = export_view(session)?;
    let out = match format {
        ExportFormat::Text => text::render(&view),
        ExportFormat::Csv => csv::render(&view)?,
        ExportFormat::Json => json::render(&view)?,
        ExportFormat::Ma3Xml => ma3::render(&view, ma3, &mut ma3::random_guid)?,
        ExportFormat::Ma3Sequences => ma3_sequences::render_per_attribute(&view, &mut ma3::random_guid)?,
        ExportFormat::Ma3AttributeSequences => {
            ma3_sequences::render_by_attribute(&view, ma3, &mut ma3::random_guid)?
        }
    };
    tracing::info!(%format, fixtures = view.len(), bytes = out.len(), "export rendered");
    Ok(out)
}

/// Render and write atomically.
pub fn export_to_file(
    session: &Session,
    format: ExportFormat,
    ma3: &Ma3Settings,
    path: &Path,
) -> Result<(), EngineError> {
    let out = export(session, format, ma3)?;
    atomic_write(path, out.as_bytes())?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
pub(crate) mod tests {
    use super::*;
    use crate::grouping::SequenceSettings;
    use crate::session::tests::{dimmer_draft, record};

    /// Two matched fixtures, a Master with a linked Remote, numbered.
    pub(crate) fn sample_session() -> Session {
        let mut session = Session::with_fixtures(vec![
            record(20, "Spot R", 1, 11),
            record(10, "Spot L", 2, 1),
            record(30, "Unmatched", 1, 100),
        ])
        .unwrap();
        let pid = session.add_profiles(vec![dimmer_draft("Mac Viper", &[("Pan", 2), ("Tilt", 2), ("Dimmer", 1)])])[0];
        for id in [10, 20] {
            session.set_manual_match(FixtureId(id), pid, None).unwrap();
            session.select_attributes(FixtureId(id), &["Pan", "Dimmer"]).unwrap();
        }
        session.assign_role(FixtureId(10), GroupRole::Master).unwrap();
        session.assign_role(FixtureId(20), GroupRole::Remote).unwrap();
        session.link_remote(FixtureId(20), FixtureId(10)).unwrap();
        session.generate_sequence_numbers(&SequenceSettings::new(false)).unwrap();
        session
    }

    #[test]
    fn view_is_sorted_and_skips_unmatched() {
        let view = export_view(&sample_session()).unwrap();
        let ids: Vec<u32> = view.iter().map(|f| f.id.0).collect();
        assert_eq!(ids, vec![10, 20]);
        assert_eq!(view[1].master, Some(FixtureId(10)));
        assert_eq!(view[1].sequence, Some(1));
        assert_eq!(view[0].attributes.len(), 2);
        assert_eq!(view[0].absolute, 513);
    }

    #[test]
    fn format_names_parse() {
        assert_eq!("MA3-XML".parse::<ExportFormat>().unwrap(), ExportFormat::Ma3Xml);
        assert_eq!("txt".parse::<ExportFormat>().unwrap(), ExportFormat::Text);
        assert_eq!("ma3_sequences".parse::<ExportFormat>().unwrap(), ExportFormat::Ma3Sequences);
        assert_eq!(
            "ma3-attribute-sequences".parse::<ExportFormat>().unwrap(),
            ExportFormat::Ma3AttributeSequences
        );
        for format in ExportFormat::ALL {
            assert_eq!(serde_json::to_value(format).unwrap(), serde_json::json!(format.to_string()));
            assert_eq!(format.to_string().parse::<ExportFormat>().unwrap(), format);
        }
        assert!("pdf".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn export_is_deterministic_for_plain_formats() {
        let session = sample_session();
        for format in [ExportFormat::Text, ExportFormat::Csv, ExportFormat::Json] {
            let a = export(&session, format, &Ma3Settings::default()).unwrap();
            let b = export(&session, format, &Ma3Settings::default()).unwrap();
            assert_eq!(a, b, "{format}");
        }
    }

    #[test]
    fn export_to_file_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        export_to_file(&sample_session(), ExportFormat::Csv, &Ma3Settings::default(), &path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("Type,"));
    }
}
