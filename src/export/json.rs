use serde::Serialize;

use super::ExportFixture;
use crate::error::EngineError;

#[derive(Serialize)]
struct JsonFixture<'a> {
    fixture_id: u32,
    name: &'a str,
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    master_fixture_id: Option<u32>,
    sequence: Option<u32>,
    profile: &'a str,
    mode: &'a str,
    address: String,
    attributes: Vec<JsonAttribute<'a>>,
}

#[derive(Serialize)]
struct JsonAttribute<'a> {
    name: &'a str,
    universe: u16,
    channel: u16,
    absolute: u32,
    width: u16,
    address: String,
}

/// Pretty-printed array of fixture objects with nested attributes.
pub fn render(view: &[ExportFixture]) -> Result<String, EngineError> {
    let fixtures: Vec<JsonFixture<'_>> = view
        .iter()
        .map(|f| JsonFixture {
            fixture_id: f.id.0,
            name: &f.name,
            role: f.role.label(),
            master_fixture_id: f.master.map(|m| m.0),
            sequence: f.sequence,
            profile: &f.profile_name,
            mode: &f.mode_name,
            address: format!("{}.{}", f.universe, f.channel),
            attributes: f
                .attributes
                .iter()
                .map(|a| JsonAttribute {
                    name: &a.name,
                    universe: a.universe,
                    channel: a.channel,
                    absolute: a.absolute,
                    width: a.width,
                    address: format!("{}.{}", a.universe, a.channel),
                })
                .collect(),
        })
        .collect();
    serde_json::to_string_pretty(&fixtures).map_err(|e| EngineError::Io {
        message: format!("JSON export failed: {e}"),
    })
}
