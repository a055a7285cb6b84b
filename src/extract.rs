//! Site & overlay extraction.
//! Turns one KML document into a `SiteRecord`: who the site is, where it is, how high the
//! antenna sits, and which georeferenced overlays it carries.
//!
//! Two document shapes exist for what is nominally the same file type, and they disagree on
//! how overlay images are named. They are kept as separate `SiteExtractor` strategies that
//! share the walker below rather than being merged:
//! - **Original**: image file named after the overlay's `Icon/href`
//! - **Alternate**: image file named `<kml-stem>.png` for every overlay in the document

use crate::assets;
use crate::config::{Config, ShapeMode};
use crate::kml::{self, KmlAccessor};
use crate::metadata;
use regex::Regex;
use roxmltree::Node;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

static TX_HEIGHT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)TX\s*Height:\s*([-+]?\d*\.?\d+)\s*m").expect("tx height pattern is valid")
});
static HEIGHT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Height:\s*([-+]?\d*\.?\d+)\s*m").expect("height pattern is valid")
});

const BOUNDS_EDGES: [&str; 4] = ["south", "west", "north", "east"];

// *************** Types ***************

/// Fatal problems: the whole document is skipped when one of these comes back.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed XML: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("no <Placemark> found")]
    MissingPlacemark,
    #[error("no <Point><coordinates> found for site lat/lon")]
    MissingCoordinates,
    #[error("invalid coordinates '{0}', expected 'lon,lat[,alt]'")]
    InvalidCoordinates(String),
    #[error("missing <LatLonBox><{0}>")]
    MissingBoundsEdge(&'static str),
    #[error("invalid number '{value}' in <{field}>")]
    InvalidNumber { field: &'static str, value: String },
}

/// Overlay rectangle as `[lat, lon]` corners.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub south_west: [f64; 2],
    pub north_east: [f64; 2],
}

impl Bounds {
    pub fn corners(&self) -> [[f64; 2]; 2] {
        [self.south_west, self.north_east]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OverlayDescriptor {
    /// Always the owning site's name.
    pub label: String,
    /// `Icon/href` exactly as written: a URL, a local file name, or nothing.
    pub image_reference: Option<String>,
    /// Name the image is stored under in the output `overlays/` directory.
    pub file_name: Option<String>,
    pub bounds: Bounds,
    pub rotation_degrees: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SiteRecord {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub antenna_height_m: f64,
    pub source_document_name: String,
    pub folder_name: Option<String>,
    pub placemark_name: Option<String>,
    pub overlays: Vec<OverlayDescriptor>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentShape {
    Original,
    Alternate,
}

impl std::fmt::Display for DocumentShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentShape::Original => write!(f, "original"),
            DocumentShape::Alternate => write!(f, "alternate"),
        }
    }
}

impl DocumentShape {
    /// Resolves the configured mode for one document. `Auto` looks for `<stem>.png` beside it.
    pub fn select(mode: ShapeMode, document: &Path) -> Self {
        match mode {
            ShapeMode::Original => DocumentShape::Original,
            ShapeMode::Alternate => DocumentShape::Alternate,
            ShapeMode::Auto => {
                if document.with_extension("png").is_file() {
                    DocumentShape::Alternate
                } else {
                    DocumentShape::Original
                }
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct ExtractSettings {
    pub accessor: KmlAccessor,
    pub default_antenna_height_m: f64,
    pub metadata_name_field: String,
}

impl ExtractSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            accessor: KmlAccessor::new(config.namespaces.clone()),
            default_antenna_height_m: config.default_antenna_height_m,
            metadata_name_field: config.metadata_name_field.clone(),
        }
    }
}

// *************** Strategies ***************

pub trait SiteExtractor {
    fn shape(&self) -> DocumentShape;

    fn settings(&self) -> &ExtractSettings;

    /// Output file name for the `index`-th (1-based) retained overlay.
    fn image_file_name(&self, document_stem: &str, reference: Option<&str>, index: usize) -> Option<String>;

    fn extract(&self, path: &Path) -> Result<SiteRecord, ExtractError> {
        let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let text = String::from_utf8_lossy(&bytes);
        self.extract_str(&text, path)
    }

    /// Extracts from already-loaded text; `path` only supplies names.
    fn extract_str(&self, text: &str, path: &Path) -> Result<SiteRecord, ExtractError> {
        let settings = self.settings();
        let acc = &settings.accessor;
        let doc = kml::parse_document(text)?;
        let root = doc.root();

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let source_document_name = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let folder_name = acc
            .find(root, ".//Folder")
            .and_then(|folder| acc.find_text(folder, "name"))
            .map(str::to_string);

        let placemark = acc
            .find(root, ".//Placemark")
            .ok_or(ExtractError::MissingPlacemark)?;
        let placemark_name = acc.find_text(placemark, "name").map(str::to_string);
        let coordinates = acc
            .find_text(placemark, ".//Point/coordinates")
            .ok_or(ExtractError::MissingCoordinates)?;
        let (longitude, latitude) = parse_coordinates(coordinates)?;

        let document = acc.find(root, ".//Document");
        let document_name = document.and_then(|d| acc.find_text_any(d, &["name", "n"]));
        let embedded_name = [Some(placemark), document]
            .into_iter()
            .flatten()
            .filter_map(|node| acc.find_text(node, "description"))
            .find_map(|desc| metadata::embedded_site_name(desc, &settings.metadata_name_field));

        let name = embedded_name
            .or_else(|| document_name.map(str::to_string))
            .or_else(|| placemark_name.clone())
            .or_else(|| folder_name.clone())
            .unwrap_or_else(|| if stem.is_empty() { "site".to_string() } else { stem.clone() });

        let ground_overlays = acc.find_all(root, ".//GroundOverlay");
        let antenna_height_m = ground_overlays
            .iter()
            .find_map(|overlay| antenna_height(acc, *overlay))
            .unwrap_or(settings.default_antenna_height_m);

        let mut overlays = Vec::new();
        for overlay in ground_overlays {
            let (Some(icon), Some(lat_lon_box)) = (acc.find(overlay, "Icon"), acc.find(overlay, "LatLonBox"))
            else {
                debug!(document = %source_document_name, "GroundOverlay without Icon or LatLonBox skipped");
                continue;
            };

            let image_reference = acc.find_text(icon, "href").map(str::to_string);
            let bounds = parse_bounds(acc, lat_lon_box)?;
            let rotation_degrees = acc.find_text(lat_lon_box, "rotation").and_then(|raw| {
                raw.parse::<f64>()
                    .inspect_err(|_| warn!(document = %source_document_name, rotation = raw, "Unreadable rotation ignored"))
                    .ok()
            });
            let file_name = self.image_file_name(&stem, image_reference.as_deref(), overlays.len() + 1);

            overlays.push(OverlayDescriptor {
                label: name.clone(),
                image_reference,
                file_name,
                bounds,
                rotation_degrees,
            });
        }

        Ok(SiteRecord {
            name,
            latitude,
            longitude,
            antenna_height_m,
            source_document_name,
            folder_name,
            placemark_name,
            overlays,
        })
    }
}

#[derive(Clone, Debug)]
pub struct OriginalExtractor {
    settings: ExtractSettings,
}

impl OriginalExtractor {
    pub fn new(settings: ExtractSettings) -> Self {
        Self { settings }
    }
}

impl SiteExtractor for OriginalExtractor {
    fn shape(&self) -> DocumentShape {
        DocumentShape::Original
    }

    fn settings(&self) -> &ExtractSettings {
        &self.settings
    }

    fn image_file_name(&self, _document_stem: &str, reference: Option<&str>, index: usize) -> Option<String> {
        let reference = reference?;
        Some(assets::reference_file_name(reference).unwrap_or_else(|| format!("overlay_{}.png", index)))
    }
}

#[derive(Clone, Debug)]
pub struct AlternateExtractor {
    settings: ExtractSettings,
}

impl AlternateExtractor {
    pub fn new(settings: ExtractSettings) -> Self {
        Self { settings }
    }
}

impl SiteExtractor for AlternateExtractor {
    fn shape(&self) -> DocumentShape {
        DocumentShape::Alternate
    }

    fn settings(&self) -> &ExtractSettings {
        &self.settings
    }

    fn image_file_name(&self, document_stem: &str, _reference: Option<&str>, _index: usize) -> Option<String> {
        Some(format!("{}.png", document_stem))
    }
}

// *************** Helpers ***************

/// Parses `"<lon>,<lat>[,<alt>]"`, returning `(lon, lat)` in source order.
pub fn parse_coordinates(text: &str) -> Result<(f64, f64), ExtractError> {
    let invalid = || ExtractError::InvalidCoordinates(text.to_string());
    let mut fields = text.split(',').map(str::trim);
    let lon = fields.next().and_then(|f| f.parse::<f64>().ok()).ok_or_else(invalid)?;
    let lat = fields.next().and_then(|f| f.parse::<f64>().ok()).ok_or_else(invalid)?;
    Ok((lon, lat))
}

fn parse_bounds(acc: &KmlAccessor, lat_lon_box: Node) -> Result<Bounds, ExtractError> {
    let mut edges = [0.0f64; 4];
    for (slot, edge) in edges.iter_mut().zip(BOUNDS_EDGES) {
        let raw = acc
            .find_text(lat_lon_box, edge)
            .ok_or(ExtractError::MissingBoundsEdge(edge))?;
        *slot = raw.parse().map_err(|_| ExtractError::InvalidNumber {
            field: edge,
            value: raw.to_string(),
        })?;
    }
    let [south, west, north, east] = edges;
    Ok(Bounds {
        south_west: [south, west],
        north_east: [north, east],
    })
}

/// Antenna height announced in an overlay's name or description, `TX Height` first.
fn antenna_height(acc: &KmlAccessor, overlay: Node) -> Option<f64> {
    let text = ["name", "description"]
        .iter()
        .filter_map(|tag| acc.find_text(overlay, tag))
        .collect::<Vec<_>>()
        .join("\n");
    [&*TX_HEIGHT, &*HEIGHT]
        .iter()
        .find_map(|pattern| pattern.captures(&text)?.get(1)?.as_str().parse::<f64>().ok())
}

// *************** Tests ***************
