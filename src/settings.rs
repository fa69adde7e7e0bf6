use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::EngineError;
use crate::export::{ExportFormat, Ma3Settings};
use crate::grouping::SequenceSettings;
use crate::project::{read_json, write_json};

fn default_threshold() -> f64 {
    0.5
}

/// Engine configuration persisted next to a project or passed to the CLI.
///
/// `sequence.shared_counter` has no default, so a settings file must always
/// say how Masters and Remotes are counted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
#[ts(export)]
pub struct EngineSettings {
    /// Minimum similarity (0-1) for an automatic profile match.
    #[serde(default = "default_threshold")]
    pub match_threshold: f64,
    pub sequence: SequenceSettings,
    #[serde(default)]
    pub ma3: Ma3Settings,
    #[serde(default)]
    pub default_format: ExportFormat,
}

impl EngineSettings {
    pub fn new(sequence: SequenceSettings) -> Self {
        Self {
            match_threshold: default_threshold(),
            sequence,
            ma3: Ma3Settings::default(),
            default_format: ExportFormat::default(),
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(0.0..=1.0).contains(&self.match_threshold) {
            return Err(EngineError::config(format!(
                "match_threshold must lie in [0, 1], got {}",
                self.match_threshold
            )));
        }
        self.sequence.validate()?;
        self.ma3.validate()
    }
}

/// Read and validate a settings file.
pub fn load_settings(path: &Path) -> Result<EngineSettings, EngineError> {
    let settings: EngineSettings = read_json(path)?;
    settings.validate()?;
    tracing::debug!(path = %path.display(), "settings loaded");
    Ok(settings)
}

/// Validate, then write atomically.
pub fn save_settings(path: &Path, settings: &EngineSettings) -> Result<(), EngineError> {
    settings.validate()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    write_json(path, settings)?;
    Ok(())
}

/// JSON schema of the settings file.
pub fn settings_schema() -> serde_json::Value {
    let schema = schemars::schema_for!(EngineSettings);
    serde_json::to_value(schema).unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::export::Resolution;

    #[test]
    fn settings_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("settings.json");
        let mut settings = EngineSettings::new(SequenceSettings::new(true));
        settings.match_threshold = 0.7;
        settings.ma3.resolution = Resolution::Bit24;
        settings.default_format = ExportFormat::Ma3Xml;

        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path).unwrap(), settings);
    }

    #[test]
    fn minimal_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "sequence": { "shared_counter": false } }"#).unwrap();

        let loaded = load_settings(&path).unwrap();
        assert!((loaded.match_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(loaded.sequence, SequenceSettings::new(false));
        assert_eq!(loaded.ma3, Ma3Settings::default());
        assert_eq!(loaded.default_format, ExportFormat::Text);
    }

    #[test]
    fn counter_mode_is_required() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "sequence": { "start_number": 5 } }"#).unwrap();
        assert!(matches!(
            load_settings(&path),
            Err(EngineError::MalformedSource { .. })
        ));
    }

    #[test]
    fn invalid_values_rejected() {
        let mut settings = EngineSettings::new(SequenceSettings::new(false));
        settings.match_threshold = 1.5;
        assert!(matches!(settings.validate(), Err(EngineError::InvalidConfig { .. })));

        let mut settings = EngineSettings::new(SequenceSettings::new(false));
        settings.sequence.interval = 0;
        assert!(settings.validate().is_err());

        let mut settings = EngineSettings::new(SequenceSettings::new(false));
        settings.ma3.out_from = -1.0;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        assert!(save_settings(&path, &settings).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn schema_describes_fields() {
        let schema = settings_schema();
        let props = &schema["properties"];
        assert!(props.get("match_threshold").is_some());
        assert!(props.get("sequence").is_some());
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|r| r == "sequence"));
    }
}
