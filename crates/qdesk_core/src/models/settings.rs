//! Engine settings and data directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::QdeskError;

/// File name of the settings file inside the data directory.
pub const SETTINGS_FILE: &str = "settings.json";

/// Query engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Wrap queries to cap reply size, capture console text and trap errors.
    pub query_wrapped: bool,
    /// Keep the connection open between queries.
    pub connection_persisted: bool,
    /// Maximum reply size in bytes, 0 for unbounded.
    pub max_return_size: u64,
    /// Text prepended to every query before wrapping.
    pub query_wrap_prefix: String,
    /// Text appended to every query before wrapping.
    pub query_wrap_postfix: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            query_wrapped: true,
            connection_persisted: false,
            max_return_size: 0,
            query_wrap_prefix: String::new(),
            query_wrap_postfix: String::new(),
        }
    }
}

impl EngineSettings {
    /// Load settings from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, QdeskError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let settings = serde_json::from_str(&text)?;
        tracing::debug!(path = %path.display(), "Settings loaded");
        Ok(settings)
    }

    /// Save settings as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), QdeskError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

/// Get the default data directory.
///
/// Debug builds keep everything next to the working directory.
pub fn default_data_dir() -> PathBuf {
    #[cfg(debug_assertions)]
    {
        PathBuf::from("./qdesk_data")
    }

    #[cfg(not(debug_assertions))]
    {
        dirs::data_dir()
            .map(|d| d.join("qdesk"))
            .unwrap_or_else(|| PathBuf::from("./qdesk_data"))
    }
}

/// Get the default settings file path.
pub fn default_settings_path() -> PathBuf {
    default_data_dir().join(SETTINGS_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_wrap_and_close() {
        let settings = EngineSettings::default();
        assert!(settings.query_wrapped);
        assert!(!settings.connection_persisted);
        assert_eq!(settings.max_return_size, 0);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = EngineSettings::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings, EngineSettings::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE);
        let settings = EngineSettings {
            connection_persisted: true,
            max_return_size: 1_000_000,
            query_wrap_prefix: "\\l init.q\n".to_string(),
            ..EngineSettings::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(EngineSettings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, r#"{"max_return_size": 42}"#).unwrap();
        let settings = EngineSettings::load(&path).unwrap();
        assert_eq!(settings.max_return_size, 42);
        assert!(settings.query_wrapped);
    }

    #[test]
    fn test_corrupt_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "{not json").unwrap();
        let err = EngineSettings::load(&path).unwrap_err();
        assert_eq!(err.category(), "Storage");
    }
}
