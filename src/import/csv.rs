//! CSV fixture list normalizer.
//!
//! The caller supplies a `{column header: semantic field}` mapping. A type
//! column and either an address column or universe + channel columns are
//! required. Without a fixture id column ids are generated as 1, 2, 3 ... in
//! row order.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{ImportBatch, ImportError};
use crate::model::{parse_patch, DmxAddress, FixtureId, FixtureRecord, Universe};

/// Semantic meaning of a CSV column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CsvField {
    FixtureId,
    Name,
    Type,
    Mode,
    Universe,
    Channel,
    /// `u.c` or absolute address; replaces universe + channel.
    Address,
}

impl CsvField {
    pub fn key(self) -> &'static str {
        match self {
            CsvField::FixtureId => "fixture_id",
            CsvField::Name => "name",
            CsvField::Type => "type",
            CsvField::Mode => "mode",
            CsvField::Universe => "universe",
            CsvField::Channel => "channel",
            CsvField::Address => "address",
        }
    }
}

/// Column header → field. Unmapped columns are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CsvMapping {
    pub columns: IndexMap<String, CsvField>,
}

impl CsvMapping {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn map(mut self, column: impl Into<String>, field: CsvField) -> Self {
        self.columns.insert(column.into(), field);
        self
    }

    pub fn column_for(&self, field: CsvField) -> Option<&str> {
        self.columns
            .iter()
            .find(|(_, f)| **f == field)
            .map(|(c, _)| c.as_str())
    }

    /// Check that every required field is mapped.
    pub fn validate(&self) -> Result<(), ImportError> {
        if self.column_for(CsvField::Type).is_none() {
            return Err(ImportError::MissingMapping(CsvField::Type.key().into()));
        }
        if self.column_for(CsvField::Address).is_none() {
            for field in [CsvField::Universe, CsvField::Channel] {
                if self.column_for(field).is_none() {
                    return Err(ImportError::MissingMapping(field.key().into()));
                }
            }
        }
        Ok(())
    }
}

/// Propose a mapping from header names. Each field and each header is used
/// at most once; more specific patterns are tried first.
pub fn guess_mapping(headers: &[String]) -> CsvMapping {
    const RULES: &[(CsvField, &[&str])] = &[
        (CsvField::FixtureId, &["fixture_id", "fixtureid", "fid", "id", "unit_number", "number"]),
        (CsvField::Type, &["fixture_type", "fixturetype", "type", "model", "gdtf"]),
        (CsvField::Mode, &["dmx_mode", "mode"]),
        (CsvField::Universe, &["universe", "univ"]),
        (CsvField::Channel, &["start_channel", "dmx_channel", "channel"]),
        (CsvField::Address, &["start_address", "base_address", "address", "patch", "dmx"]),
        (CsvField::Name, &["name", "label", "fixture", "unit"]),
    ];

    let normalized: Vec<String> = headers
        .iter()
        .map(|h| {
            h.trim()
                .to_lowercase()
                .chars()
                .map(|c| if c.is_alphanumeric() { c } else { '_' })
                .collect()
        })
        .collect();

    let mut mapping = CsvMapping::new();
    let mut used = HashSet::new();
    for (field, patterns) in RULES {
        // Exact matches win over substring matches.
        let pick = patterns
            .iter()
            .find_map(|p| {
                normalized
                    .iter()
                    .position(|h| h.as_str() == *p)
                    .filter(|i| !used.contains(i))
            })
            .or_else(|| {
                patterns.iter().find_map(|p| {
                    normalized
                        .iter()
                        .enumerate()
                        .find(|(i, h)| !used.contains(i) && p.len() > 2 && h.contains(p))
                        .map(|(i, _)| i)
                })
            });
        if let Some(i) = pick {
            if let Some(header) = headers.get(i) {
                used.insert(i);
                mapping.columns.insert(header.clone(), *field);
            }
        }
    }
    mapping
}

/// Comma, semicolon or tab, whichever occurs most in the header line.
fn sniff_delimiter(content: &str) -> u8 {
    let first = content.lines().next().unwrap_or_default();
    [b',', b';', b'\t']
        .into_iter()
        .max_by_key(|d| (first.bytes().filter(|b| b == d).count(), *d == b','))
        .unwrap_or(b',')
}

fn reader(content: &str) -> ::csv::Reader<&[u8]> {
    ::csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(sniff_delimiter(content))
        .trim(::csv::Trim::All)
        .flexible(true)
        .from_reader(content.as_bytes())
}

/// Header row of a CSV document.
pub fn read_headers(content: &str) -> Result<Vec<String>, ImportError> {
    let mut rdr = reader(content);
    Ok(rdr.headers()?.iter().map(str::to_string).collect())
}

/// Parse a CSV document with the given mapping.
pub fn parse_csv(content: &str, mapping: &CsvMapping) -> Result<ImportBatch, ImportError> {
    mapping.validate()?;
    let mut rdr = reader(content);
    let headers = rdr.headers()?.clone();

    let mut columns: IndexMap<CsvField, usize> = IndexMap::new();
    for (column, field) in &mapping.columns {
        let index = headers
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| ImportError::malformed("csv header", format!("column '{column}' not found")))?;
        columns.insert(*field, index);
    }

    let mut batch = ImportBatch::default();
    let mut ids = HashSet::new();
    let mut next_id: u32 = 1;
    for (row_index, row) in rdr.records().enumerate() {
        let row = row?;
        if row.iter().all(str::is_empty) {
            continue;
        }
        // Header is line 1.
        let location = format!("csv row {}", row_index + 2);
        let cell = |field: CsvField| {
            columns
                .get(&field)
                .and_then(|&i| row.get(i))
                .filter(|v| !v.is_empty())
        };

        let id = match columns.get(&CsvField::FixtureId) {
            Some(_) => {
                let raw = cell(CsvField::FixtureId)
                    .ok_or_else(|| ImportError::malformed(&location, "empty fixture id"))?;
                raw.parse::<u32>()
                    .map_err(|_| ImportError::malformed(&location, format!("invalid fixture id '{raw}'")))?
            }
            None => next_id,
        };
        next_id += 1;
        if !ids.insert(id) {
            return Err(ImportError::malformed(&location, format!("duplicate fixture id {id}")));
        }

        let type_label = cell(CsvField::Type)
            .ok_or_else(|| ImportError::malformed(&location, "empty fixture type"))?
            .to_string();
        let (universe, channel) = match cell(CsvField::Address) {
            Some(address) => parse_patch(address)
                .ok_or_else(|| ImportError::malformed(&location, format!("invalid address '{address}'")))?,
            None => {
                let universe = cell(CsvField::Universe)
                    .and_then(|u| u.parse::<u16>().ok())
                    .and_then(Universe::new)
                    .ok_or_else(|| ImportError::malformed(&location, "missing or invalid universe"))?;
                let channel = cell(CsvField::Channel)
                    .and_then(|c| c.parse::<u16>().ok())
                    .and_then(DmxAddress::new)
                    .ok_or_else(|| ImportError::malformed(&location, "missing or invalid channel (1-512)"))?;
                (universe, channel)
            }
        };
        let name = cell(CsvField::Name).map_or_else(|| format!("Fixture {id}"), str::to_string);
        let mode = cell(CsvField::Mode).map(str::to_string);

        batch
            .fixtures
            .push(FixtureRecord::new(FixtureId(id), name, type_label, universe, channel).with_mode(mode));
    }
    tracing::info!(rows = batch.fixtures.len(), "parsed CSV");
    Ok(batch)
}
