//! Artifact publisher.
//!
//! Writes the converted document into the destination resource tagged for a
//! namespace and domain. The destination's id never changes: publishing is
//! always an in-place update on the host.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};
use url::Url;

use iatigen_shared::{Domain, FileType, IatiError, Namespace, Result, TrackingRecord, Validity};
use iatigen_storage::TrackingRepository;

use crate::host::{HostRegistry, ResourceDescriptor};

/// Format tag of every published document.
const PUBLISHED_FORMAT: &str = "XML";

/// Outcome of a successful publish.
#[derive(Debug, Clone, Serialize)]
pub struct PublishedArtifact {
    pub destination_id: String,
    pub content_hash: String,
    pub size_bytes: usize,
}

#[derive(Clone)]
pub struct ArtifactPublisher {
    host: Arc<dyn HostRegistry>,
}

impl ArtifactPublisher {
    pub fn new(host: Arc<dyn HostRegistry>) -> Self {
        Self { host }
    }

    /// Replace the destination's content with the file at `output`.
    #[instrument(skip_all, fields(destination = %destination.source_ref))]
    pub async fn publish(
        &self,
        destination: &TrackingRecord,
        output: &Path,
    ) -> Result<PublishedArtifact> {
        let payload = tokio::fs::read(output).await.map_err(|e| {
            IatiError::Publish(format!(
                "cannot read converted output {}: {e}",
                output.display()
            ))
        })?;

        let descriptor = ResourceDescriptor {
            display_name: destination.file_type.filename().to_string(),
            format_tag: PUBLISHED_FORMAT.to_string(),
            payload,
            role_tag: destination.file_type,
        };
        let content_hash = descriptor.content_hash();
        let size_bytes = descriptor.payload.len();

        let destination_id = self
            .host
            .update(&destination.source_ref, &descriptor)
            .await
            .map_err(|e| match e {
                IatiError::Publish(_) => e,
                other => IatiError::Publish(other.to_string()),
            })?;

        info!(%destination_id, size_bytes, %content_hash, "published artifact");
        Ok(PublishedArtifact {
            destination_id,
            content_hash,
            size_bytes,
        })
    }

    /// Public locator of a destination resource.
    pub async fn locate(&self, destination: &TrackingRecord) -> Result<Option<Url>> {
        self.host.locate(&destination.source_ref).await
    }

    /// Create an empty destination resource on the host and tag it as the
    /// final artifact of `domain` in `namespace`.
    #[instrument(skip_all, fields(%namespace, %domain))]
    pub async fn provision(
        &self,
        repo: &dyn TrackingRepository,
        namespace: &Namespace,
        domain: Domain,
    ) -> Result<TrackingRecord> {
        let file_type = FileType::final_artifact(domain);
        let descriptor = ResourceDescriptor {
            display_name: file_type.filename().to_string(),
            format_tag: PUBLISHED_FORMAT.to_string(),
            payload: Vec::new(),
            role_tag: file_type,
        };
        let id = self.host.create(&descriptor).await?;
        let record = repo.upsert_tag(&id, namespace, file_type).await?;
        info!(%id, "provisioned destination");
        Ok(record)
    }
}

/// Pick the destination among final-artifact records.
///
/// Valid records win, then the most recent success, then repository order.
pub fn preferred_destination(records: &[TrackingRecord]) -> Option<&TrackingRecord> {
    records
        .iter()
        .filter(|r| r.file_type.is_final_artifact())
        .enumerate()
        .max_by(|(ia, a), (ib, b)| {
            (a.is_valid == Validity::Valid)
                .cmp(&(b.is_valid == Validity::Valid))
                .then(a.last_success_at.cmp(&b.last_success_at))
                // Earlier in repository order wins ties.
                .then(ib.cmp(ia))
        })
        .map(|(_, r)| r)
}
