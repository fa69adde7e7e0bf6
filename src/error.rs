use std::fmt;

use serde::Serialize;
use ts_rs::TS;

/// Structured error type for the engine. The UI layer matches on `code` and
/// shows `detail` next to the offending file row or fixture.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(tag = "code", content = "detail")]
#[ts(export)]
pub enum EngineError {
    /// Input file is structurally invalid. `location` is a file position,
    /// CSV row or fixture identity.
    MalformedSource { location: String, message: String },
    /// CSV column mapping does not supply a required field.
    MissingMapping { field: String },
    /// A role/link operation referenced a missing or wrong-role fixture.
    InvalidLink { fixture_id: u32, reason: String },
    /// The fixture's footprint runs past channel 512 of its universe.
    OutOfRange {
        fixture_id: u32,
        channel: u16,
        footprint: u16,
    },
    NotFound { what: String },
    InvalidIndex { what: String, index: usize },
    InvalidConfig { message: String },
    Io { message: String },
}

impl EngineError {
    pub(crate) fn malformed(location: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::MalformedSource {
            location: location.into(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid_link(fixture_id: u32, reason: impl Into<String>) -> Self {
        EngineError::InvalidLink {
            fixture_id,
            reason: reason.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        EngineError::InvalidConfig {
            message: message.into(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::MalformedSource { location, message } => {
                write!(f, "Malformed source at {location}: {message}")
            }
            EngineError::MissingMapping { field } => {
                write!(f, "CSV mapping is missing required field '{field}'")
            }
            EngineError::InvalidLink { fixture_id, reason } => {
                write!(f, "Invalid link for fixture {fixture_id}: {reason}")
            }
            EngineError::OutOfRange {
                fixture_id,
                channel,
                footprint,
            } => write!(
                f,
                "Fixture {fixture_id} at channel {channel} with {footprint} channels overflows its universe"
            ),
            EngineError::NotFound { what } => write!(f, "{what} not found"),
            EngineError::InvalidIndex { what, index } => {
                write!(f, "Invalid {what} index: {index}")
            }
            EngineError::InvalidConfig { message } => write!(f, "Invalid configuration: {message}"),
            EngineError::Io { message } => write!(f, "I/O error: {message}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io {
            message: e.to_string(),
        }
    }
}

impl From<crate::import::ImportError> for EngineError {
    fn from(e: crate::import::ImportError) -> Self {
        use crate::import::ImportError;
        match e {
            ImportError::Io(io_err) => EngineError::Io {
                message: io_err.to_string(),
            },
            ImportError::Xml { location, source } => EngineError::MalformedSource {
                location,
                message: source.to_string(),
            },
            ImportError::Zip(zip_err) => EngineError::MalformedSource {
                location: "archive".into(),
                message: zip_err.to_string(),
            },
            ImportError::Csv(csv_err) => EngineError::MalformedSource {
                location: csv_err
                    .position()
                    .map_or_else(|| "csv".to_string(), |p| format!("csv line {}", p.line())),
                message: csv_err.to_string(),
            },
            ImportError::Malformed { location, message } => {
                EngineError::MalformedSource { location, message }
            }
            ImportError::MissingMapping(field) => EngineError::MissingMapping { field },
        }
    }
}

impl From<crate::project::ProjectError> for EngineError {
    fn from(e: crate::project::ProjectError) -> Self {
        match e {
            crate::project::ProjectError::Io(io_err) => EngineError::Io {
                message: io_err.to_string(),
            },
            crate::project::ProjectError::Json(json_err) => EngineError::MalformedSource {
                location: format!("project line {}", json_err.line()),
                message: json_err.to_string(),
            },
            crate::project::ProjectError::InvalidProject(msg) => {
                EngineError::MalformedSource {
                    location: "project".into(),
                    message: msg,
                }
            }
        }
    }
}

/// Allow converting EngineError to String at the UI/CLI boundary.
impl From<EngineError> for String {
    fn from(e: EngineError) -> String {
        e.to_string()
    }
}
