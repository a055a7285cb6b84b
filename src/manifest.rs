//! Manifest assembly.
//! Pure mapping from an extracted `SiteRecord` and its asset outcomes to the JSON documents a
//! Leaflet front end reads: one `manifest.json` per site plus the top-level `index.json`.

use crate::assets::AssetOutcome;
use crate::extract::{OverlayDescriptor, SiteRecord};
use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use std::sync::LazyLock;

static UNSAFE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.-]+").expect("slug pattern is valid"));

#[derive(Debug, Serialize, PartialEq)]
pub struct SiteEntry {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub antenna_agl_m: f64,
    pub antenna_agl_note: String,
    pub folder_name: Option<String>,
    pub placemark_name: Option<String>,
    pub source_kml: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct OverlayEntry {
    pub name: String,
    pub source_url: Option<String>,
    pub bounds: Option<[[f64; 2]; 2]>,
    pub rotation: Option<f64>,
    pub image: Option<String>,
    pub download_ok: bool,
    pub http_status: Option<u16>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct SiteManifest {
    pub site: SiteEntry,
    pub overlays: Vec<OverlayEntry>,
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct Index {
    pub manifests: Vec<String>,
}

/// Filesystem-safe directory name for a site. Never empty.
pub fn slugify(name: &str) -> String {
    let slug = UNSAFE_RUN.replace_all(name.trim(), "_");
    if slug.is_empty() {
        "site".to_string()
    } else {
        slug.into_owned()
    }
}

/// `<base>/<site>/manifest.json` as listed in `index.json`.
pub fn index_entry(base_segment: &str, site_name: &str) -> String {
    format!("{}/{}/manifest.json", base_segment, site_name)
}

pub fn assemble(record: &SiteRecord, overlays: &[(OverlayDescriptor, AssetOutcome)]) -> SiteManifest {
    SiteManifest {
        site: SiteEntry {
            name: record.name.clone(),
            lat: record.latitude,
            lon: record.longitude,
            antenna_agl_m: record.antenna_height_m,
            antenna_agl_note: String::new(),
            folder_name: record.folder_name.clone(),
            placemark_name: record.placemark_name.clone(),
            source_kml: record.source_document_name.clone(),
        },
        overlays: overlays
            .iter()
            .map(|(overlay, outcome)| OverlayEntry {
                name: overlay.label.clone(),
                source_url: overlay.image_reference.clone(),
                bounds: Some(overlay.bounds.corners()),
                rotation: overlay.rotation_degrees,
                image: outcome.resolved_path.clone(),
                download_ok: outcome.success,
                http_status: outcome.http_status,
                error: outcome.error_message.clone(),
            })
            .collect(),
    }
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::Resolution;
    use crate::extract::Bounds;
    use serde_json::json;

    fn record() -> SiteRecord {
        SiteRecord {
            name: "BERA".to_string(),
            latitude: 37.8,
            longitude: -122.4,
            antenna_height_m: 10.0,
            source_document_name: "bera.kml".to_string(),
            folder_name: None,
            placemark_name: Some("BERA pin".to_string()),
            overlays: Vec::new(),
        }
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("BERA"), "BERA");
        assert_eq!(slugify("  Mt. Diablo / North  "), "Mt._Diablo_North");
        assert_eq!(slugify("a  &&  b"), "a_b");
        assert_eq!(slugify(""), "site");
        assert_eq!(slugify("   "), "site");
        assert_eq!(slugify("Zürich-1"), "Z_rich-1");
    }

    #[test]
    fn test_slugify_idempotent() {
        for input in ["BERA", "Mt. Diablo / North", "", "__x__", "é è", "a..b--c", " _ "] {
            let once = slugify(input);
            assert_eq!(slugify(&once), once, "input {:?}", input);
        }
    }

    #[test]
    fn test_index_entry_uses_site_name() {
        assert_eq!(index_entry("potential", "BERA"), "potential/BERA/manifest.json");
    }

    #[test]
    fn test_manifest_shape() {
        let overlay = OverlayDescriptor {
            label: "BERA".to_string(),
            image_reference: Some("https://h/BERA.png".to_string()),
            file_name: Some("BERA.png".to_string()),
            bounds: Bounds {
                south_west: [37.5, -122.8],
                north_east: [38.0, -122.0],
            },
            rotation_degrees: None,
        };
        let outcome = AssetOutcome {
            resolution: Resolution::RemoteFailure,
            intended_path: Some("/potential/BERA/overlays/BERA.png".to_string()),
            resolved_path: None,
            success: false,
            http_status: Some(404),
            error_message: Some("404 Not Found".to_string()),
        };

        let manifest = assemble(&record(), &[(overlay, outcome)]);
        let value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(
            value,
            json!({
                "site": {
                    "name": "BERA",
                    "lat": 37.8,
                    "lon": -122.4,
                    "antenna_agl_m": 10.0,
                    "antenna_agl_note": "",
                    "folder_name": null,
                    "placemark_name": "BERA pin",
                    "source_kml": "bera.kml"
                },
                "overlays": [{
                    "name": "BERA",
                    "source_url": "https://h/BERA.png",
                    "bounds": [[37.5, -122.8], [38.0, -122.0]],
                    "rotation": null,
                    "image": null,
                    "download_ok": false,
                    "http_status": 404,
                    "error": "404 Not Found"
                }]
            })
        );
    }

    #[test]
    fn test_write_json_pretty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let index = Index {
            manifests: vec!["potential/BERA/manifest.json".to_string()],
        };
        write_json(&path, &index).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains('\n'));
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, json!({ "manifests": ["potential/BERA/manifest.json"] }));
    }
}
