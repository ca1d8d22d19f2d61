//! Host resource registry.
//!
//! The host owns the externally visible resources that merged documents are
//! published into. [`DirectoryHost`] keeps one directory per resource id:
//!
//! ```text
//! <root>/<id>/resource.json     metadata (name, format, role, checksum)
//! <root>/<id>/<display_name>    current payload
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use iatigen_shared::{FileType, IatiError, Result};

const METADATA_FILE: &str = "resource.json";

/// What gets written to a host resource.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    pub display_name: String,
    pub format_tag: String,
    pub payload: Vec<u8>,
    pub role_tag: FileType,
}

impl ResourceDescriptor {
    /// SHA-256 of the payload, hex encoded.
    pub fn content_hash(&self) -> String {
        sha256_hex(&self.payload)
    }
}

/// Externally managed resources that can be created, replaced, and linked to.
#[async_trait]
pub trait HostRegistry: Send + Sync {
    /// Create a new resource and return its id.
    async fn create(&self, descriptor: &ResourceDescriptor) -> Result<String>;

    /// Replace the content of an existing resource, keeping its id.
    ///
    /// Fails when `id` does not exist; never creates.
    async fn update(&self, id: &str, descriptor: &ResourceDescriptor) -> Result<String>;

    /// Public locator of a resource, or `None` if the id is unknown.
    async fn locate(&self, id: &str) -> Result<Option<Url>>;
}

/// Stored alongside each payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ResourceMeta {
    id: String,
    display_name: String,
    format_tag: String,
    role: FileType,
    sha256: String,
    size_bytes: usize,
    updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// DirectoryHost
// ---------------------------------------------------------------------------

/// Host registry backed by a local directory tree.
pub struct DirectoryHost {
    root: PathBuf,
    public_base_url: Option<Url>,
}

impl DirectoryHost {
    /// Resources live under `root`; locators are built from
    /// `public_base_url` when given, otherwise as `file://` URLs.
    pub fn new(root: impl Into<PathBuf>, public_base_url: Option<Url>) -> Self {
        let public_base_url = public_base_url.map(|mut url| {
            // Url::join drops the last segment unless the base ends with '/'.
            if !url.path().ends_with('/') {
                let path = format!("{}/", url.path());
                url.set_path(&path);
            }
            url
        });
        Self {
            root: root.into(),
            public_base_url,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resource_dir(&self, id: &str) -> Result<PathBuf> {
        if !is_plain_name(id) {
            return Err(IatiError::Publish(format!("invalid resource id '{id}'")));
        }
        Ok(self.root.join(id))
    }

    async fn read_meta(&self, id: &str) -> Result<Option<ResourceMeta>> {
        let path = self.resource_dir(id)?.join(METADATA_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| IatiError::Publish(format!("corrupt metadata for {id}: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(IatiError::io(path, e)),
        }
    }

    /// Stage payload and metadata as temp files, then rename both into place.
    ///
    /// Nothing visible changes until both temp files are fully written.
    async fn write_resource(
        &self,
        id: &str,
        descriptor: &ResourceDescriptor,
        previous: Option<&ResourceMeta>,
    ) -> Result<()> {
        if !is_plain_name(&descriptor.display_name) {
            return Err(IatiError::Publish(format!(
                "invalid display name '{}'",
                descriptor.display_name
            )));
        }

        let dir = self.resource_dir(id)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| IatiError::io(&dir, e))?;

        let meta = ResourceMeta {
            id: id.to_string(),
            display_name: descriptor.display_name.clone(),
            format_tag: descriptor.format_tag.clone(),
            role: descriptor.role_tag,
            sha256: descriptor.content_hash(),
            size_bytes: descriptor.payload.len(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| IatiError::Publish(format!("failed to serialize metadata: {e}")))?;

        let payload_temp = write_temp(&dir, &descriptor.display_name, &descriptor.payload).await?;
        let meta_temp = match write_temp(&dir, METADATA_FILE, &json).await {
            Ok(path) => path,
            Err(e) => {
                discard(&payload_temp).await;
                return Err(e);
            }
        };

        if let Err(e) = commit(&payload_temp, &dir.join(&descriptor.display_name)).await {
            discard(&payload_temp).await;
            discard(&meta_temp).await;
            return Err(e);
        }
        if let Err(e) = commit(&meta_temp, &dir.join(METADATA_FILE)).await {
            discard(&meta_temp).await;
            return Err(e);
        }

        if let Some(prev) = previous.filter(|p| p.display_name != descriptor.display_name) {
            let stale = dir.join(&prev.display_name);
            if let Err(e) = tokio::fs::remove_file(&stale).await {
                debug!(path = %stale.display(), error = %e, "could not remove renamed payload");
            }
        }

        debug!(id, file = %descriptor.display_name, size = meta.size_bytes, "wrote resource");
        Ok(())
    }
}

#[async_trait]
impl HostRegistry for DirectoryHost {
    async fn create(&self, descriptor: &ResourceDescriptor) -> Result<String> {
        let id = Uuid::now_v7().to_string();
        self.write_resource(&id, descriptor, None).await?;
        info!(%id, role = %descriptor.role_tag, "created host resource");
        Ok(id)
    }

    async fn update(&self, id: &str, descriptor: &ResourceDescriptor) -> Result<String> {
        let previous = self.read_meta(id).await?.ok_or_else(|| {
            IatiError::Publish(format!("destination resource {id} does not exist"))
        })?;
        self.write_resource(id, descriptor, Some(&previous)).await?;
        Ok(id.to_string())
    }

    async fn locate(&self, id: &str) -> Result<Option<Url>> {
        let Some(meta) = self.read_meta(id).await? else {
            return Ok(None);
        };

        let url = match &self.public_base_url {
            Some(base) => base
                .join(&format!("{id}/{}", meta.display_name))
                .map_err(|e| IatiError::config(format!("invalid public_base_url: {e}")))?,
            None => {
                let path = self.resource_dir(id)?.join(&meta.display_name);
                let absolute = std::path::absolute(&path).map_err(|e| IatiError::io(&path, e))?;
                Url::from_file_path(&absolute).map_err(|()| {
                    IatiError::validation(format!("cannot build a URL for {}", absolute.display()))
                })?
            }
        };
        Ok(Some(url))
    }
}

/// A single path component with no separators or dot segments.
fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.starts_with('.')
}

/// Write `content` to a uniquely named hidden temp file next to `filename`.
///
/// Every writer gets its own temp file, so concurrent publishes to one
/// resource never rename each other's files away.
async fn write_temp(dir: &Path, filename: &str, content: &[u8]) -> Result<PathBuf> {
    let temp = dir.join(format!(".{filename}.{}.tmp", Uuid::now_v7().simple()));
    if let Err(e) = tokio::fs::write(&temp, content).await {
        discard(&temp).await;
        return Err(IatiError::io(&temp, e));
    }
    Ok(temp)
}

async fn commit(temp: &Path, target: &Path) -> Result<()> {
    tokio::fs::rename(temp, target)
        .await
        .map_err(|e| IatiError::io(target, e))
}

async fn discard(temp: &Path) {
    match tokio::fs::remove_file(temp).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = %temp.display(), error = %e, "could not remove temp file"),
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
