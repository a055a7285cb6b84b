//! Batch driver.
//! Walks the input directory in lexicographic order and, one document at a time, extracts the
//! site, resolves each overlay in document order, and writes the site manifest. A document that
//! fails extraction is logged and left out of `index.json`; nothing short of having no input
//! at all stops the batch.

use crate::assets::{self, AssetResolver};
use crate::config::Config;
use crate::extract::{AlternateExtractor, DocumentShape, ExtractSettings, OriginalExtractor, SiteExtractor};
use crate::manifest::{self, Index};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Debug)]
pub enum BatchOutcome {
    NoDocuments,
    Completed(BatchReport),
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub documents: usize,
    pub index: Index,
    /// Documents skipped as a whole, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

/// `.kml` files directly inside `dir`, sorted. A missing directory holds no documents.
pub fn discover_documents(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("Failed to list {}", dir.display())),
    };

    let mut documents = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("Failed to list {}", dir.display()))?
            .path();
        let is_kml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("kml"));
        if is_kml && path.is_file() {
            documents.push(path);
        }
    }
    documents.sort();
    Ok(documents)
}

pub async fn run(config: &Config) -> Result<BatchOutcome> {
    let resolver = AssetResolver::new(config)?;
    run_with(config, &resolver).await
}

pub async fn run_with(config: &Config, resolver: &AssetResolver) -> Result<BatchOutcome> {
    let documents = discover_documents(&config.input_dir)?;
    if documents.is_empty() {
        warn!(input = %config.input_dir.display(), "No KML files found");
        return Ok(BatchOutcome::NoDocuments);
    }

    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Failed to create {}", config.output_dir.display()))?;

    let settings = ExtractSettings::from_config(config);
    let original = OriginalExtractor::new(settings.clone());
    let alternate = AlternateExtractor::new(settings);

    let mut report = BatchReport {
        documents: documents.len(),
        ..BatchReport::default()
    };

    for document in &documents {
        let extractor: &dyn SiteExtractor = match DocumentShape::select(config.shape, document) {
            DocumentShape::Original => &original,
            DocumentShape::Alternate => &alternate,
        };
        info!(document = %document.display(), shape = %extractor.shape(), "Processing");

        match process_document(config, resolver, extractor, document).await {
            Ok(entry) => report.index.manifests.push(entry),
            Err(e) => {
                error!(document = %document.display(), "Failed to process KML: {:#}", e);
                report.failed.push((document.clone(), format!("{:#}", e)));
            }
        }
    }

    let index_path = config.output_dir.join("index.json");
    manifest::write_json(&index_path, &report.index)?;
    info!(
        path = %index_path.display(),
        written = report.index.manifests.len(),
        failed = report.failed.len(),
        "Wrote index"
    );

    Ok(BatchOutcome::Completed(report))
}

/// Extracts, resolves and writes one site. Returns its `index.json` entry.
async fn process_document(
    config: &Config,
    resolver: &AssetResolver,
    extractor: &dyn SiteExtractor,
    path: &Path,
) -> Result<String> {
    let record = extractor.extract(path)?;

    let site_dir = config.output_dir.join(manifest::slugify(&record.name));
    std::fs::create_dir_all(&site_dir)
        .with_context(|| format!("Failed to create {}", site_dir.display()))?;
    let overlays_dir = site_dir.join("overlays");
    let document_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut resolved = Vec::with_capacity(record.overlays.len());
    for overlay in &record.overlays {
        let plan = assets::plan(overlay, document_dir);
        let outcome = resolver.resolve(&plan, &record.name, &overlays_dir).await;
        if outcome.success {
            info!(file = plan.file_name().unwrap_or_default(), "PNG resolved");
        } else {
            warn!(
                source = overlay.image_reference.as_deref().unwrap_or("-"),
                intended = outcome.intended_path.as_deref().unwrap_or("-"),
                status = ?outcome.http_status,
                "PNG failed: {}",
                outcome.error_message.as_deref().unwrap_or("unknown error")
            );
        }
        resolved.push((overlay.clone(), outcome));
    }

    let site_manifest = manifest::assemble(&record, &resolved);
    let manifest_path = site_dir.join("manifest.json");
    manifest::write_json(&manifest_path, &site_manifest)?;
    info!(path = %manifest_path.display(), "Wrote manifest");

    Ok(manifest::index_entry(&config.base_segment, &record.name))
}
