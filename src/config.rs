//! Config module.
//! Holds every tunable the converter uses (paths, timeout, namespaces, fixed path segment).
//! Uses serde for JSON serialization; any key missing from a config file keeps its default.
//! CLI flags are applied on top of whatever the file provides.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_ANTENNA_HEIGHT_M: f64 = 10.0;
pub const DEFAULT_BASE_SEGMENT: &str = "potential";
const DEFAULT_CHUNK_SIZE: usize = 128 * 1024;

/// Namespaces tried in order before the namespace-free fallback.
pub const DEFAULT_NAMESPACES: [&str; 3] = [
    "http://www.opengis.net/kml/2.2",
    "http://earth.google.com/kml/2.2",
    "http://earth.google.com/kml/2.1",
];

/// Which extraction policy to apply to each document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeMode {
    /// Image file named after the overlay's icon reference
    #[default]
    Original,
    /// Image file named after the KML file itself
    Alternate,
    /// Alternate when `<stem>.png` sits next to the document, else original
    Auto,
}

impl std::fmt::Display for ShapeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShapeMode::Original => write!(f, "original"),
            ShapeMode::Alternate => write!(f, "alternate"),
            ShapeMode::Auto => write!(f, "auto"),
        }
    }
}

impl std::str::FromStr for ShapeMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "original" => Ok(ShapeMode::Original),
            "alternate" => Ok(ShapeMode::Alternate),
            "auto" => Ok(ShapeMode::Auto),
            other => anyhow::bail!("Unknown document shape '{}'", other),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub timeout_secs: u64,
    pub skip_downloads: bool,
    pub shape: ShapeMode,
    /// First segment of every path written into manifests and the index.
    pub base_segment: String,
    pub default_antenna_height_m: f64,
    pub namespaces: Vec<String>,
    /// Key holding the site name inside the embedded CloudRF JSON.
    pub metadata_name_field: String,
    pub chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("."),
            output_dir: PathBuf::from("out"),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            skip_downloads: false,
            shape: ShapeMode::default(),
            base_segment: DEFAULT_BASE_SEGMENT.to_string(),
            default_antenna_height_m: DEFAULT_ANTENNA_HEIGHT_M,
            namespaces: DEFAULT_NAMESPACES.iter().map(|ns| ns.to_string()).collect(),
            metadata_name_field: "nam".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Config {
    /// Loads a JSON config file. Keys not present in the file keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_cli_contract() {
        let config = Config::default();
        assert_eq!(config.input_dir, PathBuf::from("."));
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.timeout(), Duration::from_secs(120));
        assert_eq!(config.default_antenna_height_m, 10.0);
        assert_eq!(config.base_segment, "potential");
        assert!(!config.skip_downloads);
        assert_eq!(config.namespaces.len(), 3);
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "base_segment": "coverage", "shape": "alternate", "namespaces": ["urn:test"] }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.base_segment, "coverage");
        assert_eq!(config.shape, ShapeMode::Alternate);
        assert_eq!(config.namespaces, vec!["urn:test".to_string()]);
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.metadata_name_field, "nam");
    }

    #[test]
    fn test_load_invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.json"));
    }

    #[test]
    fn test_shape_mode_parse_and_display() {
        assert_eq!("Alternate".parse::<ShapeMode>().unwrap(), ShapeMode::Alternate);
        assert_eq!(format!("{}", ShapeMode::Auto), "auto");
        assert!("sideways".parse::<ShapeMode>().is_err());
    }
}
