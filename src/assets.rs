//! Overlay asset resolution.
//! Decides where each overlay image comes from (remote URL, file next to the KML, or nowhere),
//! then makes exactly one attempt to put it under `<site>/overlays/`.
//! Failures never escape: every attempt ends in an `AssetOutcome` the manifest can record.
//! Planning and manifest-path computation are pure; only `AssetResolver::resolve` touches
//! the network or the filesystem.

use crate::config::Config;
use crate::extract::OverlayDescriptor;
use anyhow::{Context, Result};
use image::ImageFormat;
use reqwest::{Client, StatusCode, Url};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

pub const SKIPPED_MESSAGE: &str = "Downloads skipped by --skip-downloads";
pub const NO_SOURCE_MESSAGE: &str = "No href in GroundOverlay";

// *************** Planning ***************

/// Where an overlay image will be taken from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssetPlan {
    Remote { url: String, file_name: String },
    Local { source: PathBuf, file_name: String },
    NoSource,
}

impl AssetPlan {
    pub fn file_name(&self) -> Option<&str> {
        match self {
            AssetPlan::Remote { file_name, .. } | AssetPlan::Local { file_name, .. } => Some(file_name),
            AssetPlan::NoSource => None,
        }
    }
}

pub fn is_remote_url(reference: &str) -> bool {
    Url::parse(reference)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Last path component of a URL or local reference, if it has one.
pub fn reference_file_name(reference: &str) -> Option<String> {
    let name = if is_remote_url(reference) {
        let url = Url::parse(reference).ok()?;
        url.path_segments()?.next_back()?.to_string()
    } else {
        Path::new(reference).file_name()?.to_string_lossy().into_owned()
    };
    (!name.is_empty()).then_some(name)
}

/// `/<base>/<site>/overlays/<file>`, the path the web map loads the image from.
pub fn manifest_image_path(base_segment: &str, site_name: &str, file_name: &str) -> String {
    format!("/{}/{}/overlays/{}", base_segment, site_name, file_name)
}

pub fn plan(overlay: &OverlayDescriptor, document_dir: &Path) -> AssetPlan {
    let Some(file_name) = overlay.file_name.clone() else {
        return AssetPlan::NoSource;
    };
    match overlay.image_reference.as_deref() {
        Some(reference) if is_remote_url(reference) => AssetPlan::Remote {
            url: reference.to_string(),
            file_name,
        },
        Some(reference) => {
            let local_name = reference_file_name(reference).unwrap_or_else(|| file_name.clone());
            AssetPlan::Local {
                source: document_dir.join(local_name),
                file_name,
            }
        }
        None => AssetPlan::Local {
            source: document_dir.join(&file_name),
            file_name,
        },
    }
}

// *************** Outcomes ***************

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    RemoteSuccess,
    RemoteFailure,
    LocalCopySuccess,
    LocalCopyFailure,
    NoSource,
    Skipped,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssetOutcome {
    pub resolution: Resolution,
    /// Where the image would live; known whenever the plan had a file name.
    pub intended_path: Option<String>,
    /// Path written to the manifest (`image`). Set on success and in skip mode only.
    pub resolved_path: Option<String>,
    pub success: bool,
    pub http_status: Option<u16>,
    pub error_message: Option<String>,
}

impl AssetOutcome {
    fn succeeded(resolution: Resolution, path: String, http_status: Option<u16>) -> Self {
        Self {
            resolution,
            intended_path: Some(path.clone()),
            resolved_path: Some(path),
            success: true,
            http_status,
            error_message: None,
        }
    }

    fn failed(resolution: Resolution, intended: String, http_status: Option<u16>, message: String) -> Self {
        Self {
            resolution,
            intended_path: Some(intended),
            resolved_path: None,
            success: false,
            http_status,
            error_message: Some(message),
        }
    }

    fn skipped(path: String) -> Self {
        Self {
            resolution: Resolution::Skipped,
            intended_path: Some(path.clone()),
            resolved_path: Some(path),
            success: false,
            http_status: None,
            error_message: Some(SKIPPED_MESSAGE.to_string()),
        }
    }

    fn no_source() -> Self {
        Self {
            resolution: Resolution::NoSource,
            intended_path: None,
            resolved_path: None,
            success: false,
            http_status: None,
            error_message: Some(NO_SOURCE_MESSAGE.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum FetchError {
    #[error("404 Not Found")]
    NotFound,
    #[error("HTTP {0}")]
    Status(u16),
    #[error("Timeout after {0}s")]
    Timeout(u64),
    #[error("Connection error: {0}")]
    Connect(#[source] reqwest::Error),
    #[error("{0}")]
    Request(#[source] reqwest::Error),
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),
}

impl FetchError {
    fn http_status(&self) -> Option<u16> {
        match self {
            FetchError::NotFound => Some(StatusCode::NOT_FOUND.as_u16()),
            FetchError::Status(code) => Some(*code),
            _ => None,
        }
    }
}

// *************** Resolver ***************

pub struct AssetResolver {
    client: Client,
    timeout: Duration,
    chunk_size: usize,
    skip_downloads: bool,
    base_segment: String,
}

impl AssetResolver {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self::with_client(client, config))
    }

    /// Uses a caller-built client; the client's own timeout is what bounds requests.
    pub fn with_client(client: Client, config: &Config) -> Self {
        Self {
            client,
            timeout: config.timeout(),
            chunk_size: config.chunk_size.max(1),
            skip_downloads: config.skip_downloads,
            base_segment: config.base_segment.clone(),
        }
    }

    /// One attempt at materialising `plan` under `overlays_dir`. Never fails.
    pub async fn resolve(&self, plan: &AssetPlan, site_name: &str, overlays_dir: &Path) -> AssetOutcome {
        let Some(file_name) = plan.file_name() else {
            return AssetOutcome::no_source();
        };
        let intended = manifest_image_path(&self.base_segment, site_name, file_name);
        if self.skip_downloads {
            return AssetOutcome::skipped(intended);
        }

        let dest = overlays_dir.join(file_name);
        match plan {
            AssetPlan::Remote { url, .. } => match self.download(url, &dest).await {
                Ok(status) => AssetOutcome::succeeded(Resolution::RemoteSuccess, intended, Some(status)),
                Err(e) => AssetOutcome::failed(Resolution::RemoteFailure, intended, e.http_status(), e.to_string()),
            },
            AssetPlan::Local { source, .. } => copy_local(source, &dest, intended).await,
            AssetPlan::NoSource => AssetOutcome::no_source(),
        }
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u16, FetchError> {
        let mut response = self.client.get(url).send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Body goes to a sibling `.part` file so a failed transfer never leaves a truncated PNG.
        let partial = partial_path(dest);
        let written: Result<(), FetchError> = async {
            self.stream_body(&mut response, &partial, url).await?;
            tokio::fs::rename(&partial, dest).await?;
            Ok(())
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
        Ok(status.as_u16())
    }

    async fn stream_body(&self, response: &mut reqwest::Response, path: &Path, url: &str) -> Result<(), FetchError> {
        let file = tokio::fs::File::create(path).await?;
        let mut writer = BufWriter::with_capacity(self.chunk_size, file);
        let mut first = true;

        while let Some(chunk) = response.chunk().await.map_err(|e| self.classify(e))? {
            if first {
                check_png(&chunk, url);
                first = false;
            }
            writer.write_all(&chunk).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout.as_secs())
        } else if err.is_connect() {
            FetchError::Connect(err)
        } else {
            FetchError::Request(err)
        }
    }
}

async fn copy_local(source: &Path, dest: &Path, intended: String) -> AssetOutcome {
    let exists = tokio::fs::metadata(source).await.map(|m| m.is_file()).unwrap_or(false);
    if !exists {
        return AssetOutcome::failed(
            Resolution::LocalCopyFailure,
            intended,
            None,
            format!("Local file not found: {}", source.display()),
        );
    }

    let copied = async {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(source, dest).await
    }
    .await;

    match copied {
        Ok(_) => AssetOutcome::succeeded(Resolution::LocalCopySuccess, intended, None),
        Err(e) => AssetOutcome::failed(
            Resolution::LocalCopyFailure,
            intended,
            None,
            format!("Filesystem error: {}", e),
        ),
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Logs payloads that are not PNG. The outcome is not affected.
fn check_png(head: &[u8], url: &str) {
    match image::guess_format(head) {
        Ok(ImageFormat::Png) => debug!(url, "PNG payload"),
        Ok(format) => warn!(url, ?format, "Overlay payload is not a PNG"),
        Err(_) => warn!(url, "Overlay payload is not a recognised image"),
    }
}

// *************** Tests ***************
