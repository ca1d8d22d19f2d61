//! Turso Embedded / libSQL storage layer for source tracking state.
//!
//! The [`Storage`] struct wraps a libSQL database holding one
//! [`TrackingRecord`] per tagged source resource and implements
//! [`TrackingRepository`]. [`MemoryRepository`] implements the same trait
//! without persistence.
//!
//! **Access rules:**
//! - Pipeline runs and tagging events: read-write via [`Storage::open`]
//! - Public destination lookups: read-only via [`Storage::open_readonly`]

mod memory;
mod migrations;
mod repository;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iatigen_shared::{
    AttemptOutcome, Domain, FileType, IatiError, Namespace, Result, TrackingRecord, Validity,
};
use libsql::{Connection, Database, params};
use uuid::Uuid;

pub use memory::MemoryRepository;
pub use repository::TrackingRepository;

const RECORD_COLUMNS: &str = "id, source_ref, namespace, file_type, is_valid, last_processed_at,
     last_success_at, last_error, created_at, updated_at";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IatiError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| IatiError::Storage(e.to_string()))?;

        let conn = db.connect().map_err(|e| IatiError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode (public read surface).
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| IatiError::Storage(e.to_string()))?;

        let conn = db.connect().map_err(|e| IatiError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        IatiError::Storage(format!("migration v{} failed: {e}", migration.version))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(IatiError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    /// Run a record query and collect every row.
    async fn query_records(
        &self,
        where_clause: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<TrackingRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM tracking_records WHERE {where_clause}
             ORDER BY file_type, created_at, id"
        );
        let mut rows = self
            .conn
            .query(&sql, params)
            .await
            .map_err(|e| IatiError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| IatiError::Storage(e.to_string()))?
        {
            results.push(row_to_record(&row)?);
        }
        Ok(results)
    }
}

#[async_trait]
impl TrackingRepository for Storage {
    async fn upsert_tag(
        &self,
        source_ref: &str,
        namespace: &Namespace,
        file_type: FileType,
    ) -> Result<TrackingRecord> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        // SET expressions see the pre-update row, so the CASEs compare the old binding.
        self.conn
            .execute(
                "INSERT INTO tracking_records
                   (id, source_ref, namespace, domain, file_type, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(source_ref) DO UPDATE SET
                   is_valid = CASE
                     WHEN namespace = excluded.namespace AND file_type = excluded.file_type
                     THEN is_valid ELSE NULL END,
                   last_error = CASE
                     WHEN namespace = excluded.namespace AND file_type = excluded.file_type
                     THEN last_error ELSE NULL END,
                   namespace = excluded.namespace,
                   domain = excluded.domain,
                   file_type = excluded.file_type,
                   updated_at = excluded.updated_at",
                params![
                    id.as_str(),
                    source_ref,
                    namespace.as_str(),
                    file_type.domain().as_str(),
                    i64::from(file_type.code()),
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| IatiError::Storage(e.to_string()))?;

        self.find_by_source_ref(source_ref).await?.ok_or_else(|| {
            IatiError::Storage(format!("tracking record for {source_ref} vanished after upsert"))
        })
    }

    async fn remove_tag(&self, source_ref: &str) -> Result<bool> {
        self.check_writable()?;
        let deleted = self
            .conn
            .execute(
                "DELETE FROM tracking_records WHERE source_ref = ?1",
                params![source_ref],
            )
            .await
            .map_err(|e| IatiError::Storage(e.to_string()))?;
        Ok(deleted > 0)
    }

    async fn find_by_domain_and_namespace(
        &self,
        domain: Domain,
        namespace: &Namespace,
    ) -> Result<Vec<TrackingRecord>> {
        self.query_records(
            "domain = ?1 AND namespace = ?2",
            params![domain.as_str(), namespace.as_str()],
        )
        .await
    }

    async fn find_by_source_ref(&self, source_ref: &str) -> Result<Option<TrackingRecord>> {
        let mut found = self
            .query_records("source_ref = ?1", params![source_ref])
            .await?;
        Ok(found.pop())
    }

    async fn get(&self, id: &str) -> Result<Option<TrackingRecord>> {
        let mut found = self.query_records("id = ?1", params![id]).await?;
        Ok(found.pop())
    }

    async fn record_attempt(&self, id: &str, outcome: &AttemptOutcome) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let updated = match outcome {
            AttemptOutcome::Success => self
                .conn
                .execute(
                    "UPDATE tracking_records SET
                       is_valid = 1,
                       last_error = NULL,
                       last_processed_at = ?1,
                       last_success_at = ?1,
                       updated_at = ?1
                     WHERE id = ?2",
                    params![now.as_str(), id],
                )
                .await,
            AttemptOutcome::Failure(message) => self
                .conn
                .execute(
                    "UPDATE tracking_records SET
                       is_valid = 0,
                       last_error = ?1,
                       last_processed_at = ?2,
                       updated_at = ?2
                     WHERE id = ?3",
                    params![message.as_str(), now.as_str(), id],
                )
                .await,
        }
        .map_err(|e| IatiError::Storage(e.to_string()))?;

        if updated == 0 {
            return Err(IatiError::Storage(format!("tracking record {id} not found")));
        }
        Ok(())
    }
}

/// Convert a database row to a [`TrackingRecord`].
fn row_to_record(row: &libsql::Row) -> Result<TrackingRecord> {
    let code: i64 = row
        .get(3)
        .map_err(|e| IatiError::Storage(e.to_string()))?;
    let file_type = u16::try_from(code)
        .ok()
        .and_then(FileType::from_code)
        .ok_or_else(|| IatiError::Storage(format!("unknown file type code {code} in database")))?;

    Ok(TrackingRecord {
        id: row
            .get::<String>(0)
            .map_err(|e| IatiError::Storage(e.to_string()))?,
        source_ref: row
            .get::<String>(1)
            .map_err(|e| IatiError::Storage(e.to_string()))?,
        namespace: Namespace::new(
            &row.get::<String>(2)
                .map_err(|e| IatiError::Storage(e.to_string()))?,
        ),
        file_type,
        is_valid: Validity::from_db(row.get::<i64>(4).ok()),
        last_processed_at: row.get::<String>(5).ok().map(|s| parse_date(&s)).transpose()?,
        last_success_at: row.get::<String>(6).ok().map(|s| parse_date(&s)).transpose()?,
        last_error: row.get::<String>(7).ok(),
        created_at: parse_date(
            &row.get::<String>(8)
                .map_err(|e| IatiError::Storage(e.to_string()))?,
        )?,
        updated_at: parse_date(
            &row.get::<String>(9)
                .map_err(|e| IatiError::Storage(e.to_string()))?,
        )?,
    })
}

fn parse_date(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| IatiError::Storage(format!("invalid date: {e}")))
}
