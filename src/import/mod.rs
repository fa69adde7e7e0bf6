pub mod csv;
pub mod gdtf;
pub mod ma3;
pub mod mvr;

use std::fmt;
use std::io::{Read, Seek};
use std::path::Path;

use quick_xml::events::BytesStart;

use crate::model::{FixtureRecord, ProfileDraft};

/// Scene description entry inside an MVR archive.
pub const MVR_SCENE_FILE: &str = "GeneralSceneDescription.xml";

/// Profile description entry inside a GDTF archive.
pub const GDTF_DESCRIPTION_FILE: &str = "description.xml";

pub const GDTF_EXT: &str = "gdtf";

// ── Error type (shared across all importers) ────────────────────────

#[derive(Debug)]
pub enum ImportError {
    Io(std::io::Error),
    /// XML syntax error. `location` names the document and byte offset.
    Xml {
        location: String,
        source: quick_xml::Error,
    },
    Zip(zip::result::ZipError),
    Csv(::csv::Error),
    /// Well-formed input that lacks a required element or value.
    Malformed { location: String, message: String },
    MissingMapping(String),
}

impl ImportError {
    pub(crate) fn malformed(location: impl Into<String>, message: impl Into<String>) -> Self {
        ImportError::Malformed {
            location: location.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportError::Io(e) => write!(f, "I/O error: {e}"),
            ImportError::Xml { location, source } => write!(f, "XML error at {location}: {source}"),
            ImportError::Zip(e) => write!(f, "Archive error: {e}"),
            ImportError::Csv(e) => write!(f, "CSV error: {e}"),
            ImportError::Malformed { location, message } => write!(f, "{location}: {message}"),
            ImportError::MissingMapping(field) => write!(f, "No column mapped to '{field}'"),
        }
    }
}

impl std::error::Error for ImportError {}

impl From<std::io::Error> for ImportError {
    fn from(e: std::io::Error) -> Self {
        ImportError::Io(e)
    }
}

impl From<zip::result::ZipError> for ImportError {
    fn from(e: zip::result::ZipError) -> Self {
        ImportError::Zip(e)
    }
}

impl From<::csv::Error> for ImportError {
    fn from(e: ::csv::Error) -> Self {
        ImportError::Csv(e)
    }
}

// ── Import result ───────────────────────────────────────────────────

/// Normalized output of one importer: unassigned, unmatched records plus any
/// profiles that travelled with the source.
#[derive(Debug, Clone, Default)]
pub struct ImportBatch {
    pub fixtures: Vec<FixtureRecord>,
    pub profiles: Vec<ProfileDraft>,
    /// Non-fatal problems (skipped embedded profiles, unreadable entries).
    pub warnings: Vec<String>,
}

impl ImportBatch {
    pub(crate) fn warn(&mut self, message: String) {
        tracing::warn!("{message}");
        self.warnings.push(message);
    }
}

/// Load a fixture source by extension: `.mvr`, `.xml` (MVR scene or grandMA3
/// patch), or `.csv` with the given or guessed column mapping.
pub fn load_source(
    path: &Path,
    mapping: Option<&csv::CsvMapping>,
) -> Result<ImportBatch, ImportError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mvr" | "zip" => mvr::load_mvr(path),
        "csv" => {
            let content = std::fs::read_to_string(path)?;
            match mapping {
                Some(m) => csv::parse_csv(&content, m),
                None => {
                    let headers = csv::read_headers(&content)?;
                    let guessed = csv::guess_mapping(&headers);
                    tracing::info!(?guessed, "using guessed CSV mapping");
                    csv::parse_csv(&content, &guessed)
                }
            }
        }
        "xml" => {
            let content = std::fs::read_to_string(path)?;
            if ma3::is_ma3_document(&content) {
                ma3::parse_ma3_xml(&content)
            } else {
                mvr::parse_scene_xml(&content)
            }
        }
        other => Err(ImportError::malformed(
            path.display().to_string(),
            format!("unsupported source type '.{other}'"),
        )),
    }
}

// ── Shared helpers ──────────────────────────────────────────────────

/// Element name without any namespace prefix.
pub(crate) fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_string()
}

/// Value of the attribute named `key`, unescaped where possible.
pub(crate) fn attr(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.local_name().as_ref() != key.as_bytes() {
            return None;
        }
        Some(
            a.unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&a.value).to_string()),
        )
    })
}

pub(crate) fn xml_error(document: &str, position: u64, source: quick_xml::Error) -> ImportError {
    ImportError::Xml {
        location: format!("{document} byte {position}"),
        source,
    }
}

/// Read a whole archive entry as UTF-8 text.
pub(crate) fn read_entry_text<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<String, ImportError> {
    let mut entry = archive.by_name(name)?;
    let mut text = String::new();
    entry.read_to_string(&mut text)?;
    Ok(text)
}

/// Read a whole archive entry as bytes.
pub(crate) fn read_entry_bytes<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Vec<u8>, ImportError> {
    let mut entry = archive.by_name(name)?;
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes)?;
    Ok(bytes)
}

pub(crate) fn has_extension(name: &str, ext: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
pub(crate) mod tests {
    use std::io::Write;

    use super::*;

    /// Build an in-memory zip archive from `(name, content)` pairs.
    pub(crate) fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, content) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn extension_check_ignores_case() {
        assert!(has_extension("Robe@Spiider.GDTF", GDTF_EXT));
        assert!(!has_extension("scene.xml", GDTF_EXT));
    }

    #[test]
    fn load_source_dispatches_ma3_xml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patch.xml");
        std::fs::write(
            &path,
            r#"<GMA3 DataVersion="2.2.5.2"><Fixture Name="Spot 1" FID="101" Patch="1.001" Mode="Spot.DMXModes.Standard"/></GMA3>"#,
        )
        .unwrap();
        let batch = load_source(&path, None).unwrap();
        assert_eq!(batch.fixtures.len(), 1);
        assert_eq!(batch.fixtures[0].id.0, 101);
    }

    #[test]
    fn load_source_rejects_unknown_extension() {
        let err = load_source(Path::new("rig.txt"), None).unwrap_err();
        assert!(matches!(err, ImportError::Malformed { .. }));
    }
}
