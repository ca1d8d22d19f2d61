//! Tagging events.
//!
//! Host-side resource changes reach the tracking store through these two
//! calls instead of through storage hooks.

use std::sync::Arc;

use tracing::{info, instrument};

use iatigen_shared::{Namespace, Result, TrackingRecord, registry};
use iatigen_storage::TrackingRepository;

#[derive(Clone)]
pub struct TaggingService {
    repo: Arc<dyn TrackingRepository>,
}

impl TaggingService {
    pub fn new(repo: Arc<dyn TrackingRepository>) -> Self {
        Self { repo }
    }

    /// A resource was tagged (or re-tagged) with a file type.
    ///
    /// `file_type` accepts a code or a name; `namespace` is normalized and
    /// defaults when absent. Invalid file types are rejected before any write.
    #[instrument(skip_all, fields(source_ref = %source_ref, file_type = %file_type))]
    pub async fn on_resource_tagged(
        &self,
        source_ref: &str,
        file_type: &str,
        namespace: Option<&str>,
    ) -> Result<TrackingRecord> {
        let file_type = registry::resolve(file_type)?;
        let namespace = Namespace::from_option(namespace);
        let record = self
            .repo
            .upsert_tag(source_ref, &namespace, file_type)
            .await?;
        info!(id = %record.id, %namespace, %file_type, "resource tagged");
        Ok(record)
    }

    /// A resource was deleted or its tag cleared. Returns whether a record existed.
    #[instrument(skip_all, fields(source_ref = %source_ref))]
    pub async fn on_resource_removed(&self, source_ref: &str) -> Result<bool> {
        let removed = self.repo.remove_tag(source_ref).await?;
        if removed {
            info!("tracking record removed");
        }
        Ok(removed)
    }
}
