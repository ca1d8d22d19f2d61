//! In-memory [`TrackingRepository`] for tests and dry runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use iatigen_shared::{
    AttemptOutcome, Domain, FileType, IatiError, Namespace, Result, TrackingRecord,
};

use crate::repository::{TrackingRepository, sort_records};

/// Records keyed by `source_ref`; each mutation happens under one write lock.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    records: RwLock<HashMap<String, TrackingRecord>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record, in repository order.
    pub async fn all(&self) -> Vec<TrackingRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        sort_records(&mut records);
        records
    }
}

#[async_trait]
impl TrackingRepository for MemoryRepository {
    async fn upsert_tag(
        &self,
        source_ref: &str,
        namespace: &Namespace,
        file_type: FileType,
    ) -> Result<TrackingRecord> {
        let mut records = self.records.write().await;
        let record = records
            .entry(source_ref.to_string())
            .and_modify(|r| r.rebind(namespace.clone(), file_type, Utc::now()))
            .or_insert_with(|| TrackingRecord::new(source_ref, namespace.clone(), file_type));
        Ok(record.clone())
    }

    async fn remove_tag(&self, source_ref: &str) -> Result<bool> {
        Ok(self.records.write().await.remove(source_ref).is_some())
    }

    async fn find_by_domain_and_namespace(
        &self,
        domain: Domain,
        namespace: &Namespace,
    ) -> Result<Vec<TrackingRecord>> {
        let mut found: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.domain() == domain && &r.namespace == namespace)
            .cloned()
            .collect();
        sort_records(&mut found);
        Ok(found)
    }

    async fn find_by_source_ref(&self, source_ref: &str) -> Result<Option<TrackingRecord>> {
        Ok(self.records.read().await.get(source_ref).cloned())
    }

    async fn get(&self, id: &str) -> Result<Option<TrackingRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn record_attempt(&self, id: &str, outcome: &AttemptOutcome) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .values_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| IatiError::Storage(format!("tracking record {id} not found")))?;
        record.apply(outcome, Utc::now());
        Ok(())
    }
}
