//! Source resource access.
//!
//! A [`ResourceAccessor`] turns a tracking record's `source_ref` into bytes
//! plus the format the source declares. [`LocatorAccessor`] handles
//! `http(s)://` URLs, `file://` URLs, and bare filesystem paths.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;
use url::Url;

use iatigen_shared::{IatiError, Result};

/// Maximum number of redirects followed for HTTP sources.
const MAX_REDIRECTS: usize = 5;

/// The format a source declares for its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Other(String),
}

impl SourceFormat {
    /// Interpret a declared format tag (`CSV`, `csv`, `text/csv`, ...).
    pub fn from_declared(declared: &str) -> Self {
        let trimmed = declared.trim();
        match media_type(trimmed).as_str() {
            "csv" | "text/csv" | "application/csv" | "text/comma-separated-values" => Self::Csv,
            _ => Self::Other(trimmed.to_string()),
        }
    }

    /// Format implied by a file extension, if the path has one.
    pub fn from_extension(path: &str) -> Option<Self> {
        let ext = Path::new(path).extension()?.to_str()?;
        Some(Self::from_declared(ext))
    }

    pub fn is_csv(&self) -> bool {
        matches!(self, Self::Csv)
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Csv => f.write_str("CSV"),
            Self::Other(tag) => f.write_str(tag),
        }
    }
}

/// Lowercased media type without parameters (`text/csv; charset=utf-8` -> `text/csv`).
fn media_type(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Content types that say nothing about the payload.
fn is_generic_content_type(media: &str) -> bool {
    matches!(
        media,
        "" | "text/plain" | "application/octet-stream" | "binary/octet-stream"
    )
}

/// Content fetched for one source.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub bytes: Vec<u8>,
    pub format: SourceFormat,
}

/// Fetches the content behind a `source_ref`.
#[async_trait]
pub trait ResourceAccessor: Send + Sync {
    /// Fetch the bytes and declared format of a source.
    ///
    /// Failures are reported as [`IatiError::FetchFailure`].
    async fn fetch(&self, source_ref: &str) -> Result<FetchedResource>;
}

// ---------------------------------------------------------------------------
// LocatorAccessor
// ---------------------------------------------------------------------------

/// Resolves `source_ref` values as URLs or filesystem paths.
pub struct LocatorAccessor {
    client: Client,
    base_dir: Option<PathBuf>,
}

impl LocatorAccessor {
    /// Build an accessor with its own HTTP client.
    ///
    /// Relative paths are resolved against `base_dir` when one is given.
    pub fn new(user_agent: &str, timeout: Duration, base_dir: Option<PathBuf>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(timeout)
            .build()
            .map_err(|e| IatiError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, base_dir })
    }

    async fn fetch_http(&self, source_ref: &str, url: &Url) -> Result<FetchedResource> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| IatiError::fetch(source_ref, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IatiError::fetch(source_ref, format!("HTTP {status}")));
        }

        let declared = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(media_type)
            .unwrap_or_default();

        let format = if is_generic_content_type(&declared) {
            SourceFormat::from_extension(url.path())
                .unwrap_or_else(|| SourceFormat::Other(declared.clone()))
        } else {
            SourceFormat::from_declared(&declared)
        };

        let bytes = response
            .bytes()
            .await
            .map_err(|e| IatiError::fetch(source_ref, format!("body read failed: {e}")))?;

        debug!(source_ref, size = bytes.len(), %format, "fetched over HTTP");
        Ok(FetchedResource {
            bytes: bytes.to_vec(),
            format,
        })
    }

    async fn fetch_file(&self, source_ref: &str, path: PathBuf) -> Result<FetchedResource> {
        let path = match (&self.base_dir, path.is_relative()) {
            (Some(base), true) => base.join(path),
            _ => path,
        };

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| IatiError::fetch(source_ref, format!("{}: {e}", path.display())))?;

        let format = path
            .to_str()
            .and_then(SourceFormat::from_extension)
            .unwrap_or_else(|| SourceFormat::Other("unknown".into()));

        debug!(source_ref, size = bytes.len(), %format, "read from filesystem");
        Ok(FetchedResource { bytes, format })
    }
}

#[async_trait]
impl ResourceAccessor for LocatorAccessor {
    async fn fetch(&self, source_ref: &str) -> Result<FetchedResource> {
        match Url::parse(source_ref) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                self.fetch_http(source_ref, &url).await
            }
            Ok(url) if url.scheme() == "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|()| IatiError::fetch(source_ref, "invalid file URL"))?;
                self.fetch_file(source_ref, path).await
            }
            // Single-letter schemes are Windows drive letters.
            Ok(url) if url.scheme().len() > 1 => Err(IatiError::fetch(
                source_ref,
                format!("unsupported scheme '{}'", url.scheme()),
            )),
            _ => self.fetch_file(source_ref, PathBuf::from(source_ref)).await,
        }
    }
}
