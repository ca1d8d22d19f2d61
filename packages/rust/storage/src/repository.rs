//! The tracking repository interface.

use async_trait::async_trait;

use iatigen_shared::{AttemptOutcome, Domain, FileType, Namespace, Result, TrackingRecord};

/// Persistent per-source processing state.
///
/// Every mutation is atomic per row, so concurrent runs or retries touching
/// the same record never lose an update; the last committed write wins.
#[async_trait]
pub trait TrackingRepository: Send + Sync {
    /// Create the record for `source_ref`, or rebind an existing one.
    ///
    /// Rebinding to a different namespace or file type resets `is_valid`
    /// and `last_error`; an identical binding keeps the history.
    async fn upsert_tag(
        &self,
        source_ref: &str,
        namespace: &Namespace,
        file_type: FileType,
    ) -> Result<TrackingRecord>;

    /// Delete the record for `source_ref`. Returns whether one existed.
    async fn remove_tag(&self, source_ref: &str) -> Result<bool>;

    /// All records of a domain in a namespace, ordered by code, creation time, id.
    async fn find_by_domain_and_namespace(
        &self,
        domain: Domain,
        namespace: &Namespace,
    ) -> Result<Vec<TrackingRecord>>;

    /// The record tagged on `source_ref`, if any.
    async fn find_by_source_ref(&self, source_ref: &str) -> Result<Option<TrackingRecord>>;

    /// A record by id.
    async fn get(&self, id: &str) -> Result<Option<TrackingRecord>>;

    /// Stamp the outcome of a processing attempt on a record.
    async fn record_attempt(&self, id: &str, outcome: &AttemptOutcome) -> Result<()>;

    /// Records carrying one file type in a namespace.
    async fn find_by_file_type(
        &self,
        namespace: &Namespace,
        file_type: FileType,
    ) -> Result<Vec<TrackingRecord>> {
        let records = self
            .find_by_domain_and_namespace(file_type.domain(), namespace)
            .await?;
        Ok(records
            .into_iter()
            .filter(|r| r.file_type == file_type)
            .collect())
    }
}

/// Ordering shared by every implementation.
pub(crate) fn sort_records(records: &mut [TrackingRecord]) {
    records.sort_by(|a, b| {
        a.file_type
            .code()
            .cmp(&b.file_type.code())
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}
