//! Staging assembler.
//!
//! Validates the tagged components of one namespace and domain against the
//! file type catalog, fetches them, and writes each under its canonical
//! filename into a private per-run directory. The directory is removed when
//! the [`StagingSet`] is dropped, whichever way the run ends.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};

use iatigen_shared::{
    AttemptOutcome, Domain, FileType, IatiError, MaxCount, Namespace, Result, TrackingRecord,
};
use iatigen_storage::TrackingRepository;

use crate::accessor::{FetchedResource, ResourceAccessor};
use crate::pipeline::{ProgressReporter, record_best_effort};

/// A component written into the staging directory.
#[derive(Debug, Clone, Serialize)]
pub struct StagedComponent {
    pub tracking_id: String,
    pub source_ref: String,
    pub file_type: FileType,
    pub path: PathBuf,
}

/// An optional component left out of the run because it could not be fetched.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedComponent {
    pub tracking_id: String,
    pub source_ref: String,
    pub file_type: FileType,
    pub reason: String,
}

/// The staged inputs of one run.
///
/// Layout: `<root>/input/<canonical filename>` for components and
/// `<root>/output/` for the converter's result.
#[derive(Debug)]
pub struct StagingSet {
    root: TempDir,
    input_dir: PathBuf,
    pub namespace: Namespace,
    pub domain: Domain,
    pub components: Vec<StagedComponent>,
    pub skipped: Vec<SkippedComponent>,
}

impl StagingSet {
    async fn create(root: TempDir, namespace: &Namespace, domain: Domain) -> Result<Self> {
        let input_dir = root.path().join("input");
        let output_dir = root.path().join("output");
        for dir in [&input_dir, &output_dir] {
            tokio::fs::create_dir(dir)
                .await
                .map_err(|e| IatiError::io(dir, e))?;
        }
        Ok(Self {
            root,
            input_dir,
            namespace: namespace.clone(),
            domain,
            components: Vec::new(),
            skipped: Vec::new(),
        })
    }

    /// Directory holding the staged component files.
    pub fn path(&self) -> &Path {
        &self.input_dir
    }

    /// Where the converter writes the merged document.
    pub fn output_path(&self) -> PathBuf {
        self.root
            .path()
            .join("output")
            .join(FileType::final_artifact(self.domain).filename())
    }

    /// Root of the run's private directory; removed on drop.
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// The staged component a converter-reported filename refers to.
    pub fn component_for_filename(&self, filename: &str) -> Option<&StagedComponent> {
        let file_type = FileType::from_filename(self.domain, filename)?;
        self.components.iter().find(|c| c.file_type == file_type)
    }

    /// Fail with [`IatiError::NoInputData`] when nothing was staged.
    pub fn ensure_not_empty(&self) -> Result<()> {
        if self.components.is_empty() {
            return Err(IatiError::NoInputData {
                namespace: self.namespace.clone(),
                domain: self.domain,
            });
        }
        Ok(())
    }
}

/// Check every component file type of `domain` against the tagged records.
///
/// Returns the records to fetch in catalog order. Runs before any fetch so a
/// cardinality violation leaves every record untouched.
pub fn validate_components(
    domain: Domain,
    records: &[TrackingRecord],
) -> Result<Vec<&TrackingRecord>> {
    let mut selected = Vec::new();

    for file_type in FileType::components(domain) {
        let tagged: Vec<&TrackingRecord> = records
            .iter()
            .filter(|r| r.file_type == file_type)
            .collect();

        if tagged.is_empty() {
            if file_type.required() {
                return Err(IatiError::MissingRequiredComponent { file_type });
            }
            continue;
        }

        if let MaxCount::Limited(max) = file_type.max_count() {
            if tagged.len() > max {
                return Err(IatiError::TooManyComponents {
                    file_type,
                    found: tagged.len(),
                    max,
                });
            }
        }

        selected.extend(tagged);
    }

    Ok(selected)
}

// ---------------------------------------------------------------------------
// Assembler
// ---------------------------------------------------------------------------

/// Fetches validated components into a fresh staging directory.
pub struct StagingAssembler<'a> {
    pub repo: &'a dyn TrackingRepository,
    pub accessor: &'a dyn ResourceAccessor,
    pub fetch_timeout: Duration,
    pub staging_root: Option<&'a Path>,
}

impl StagingAssembler<'_> {
    #[instrument(skip_all, fields(%namespace, %domain))]
    pub async fn assemble(
        &self,
        namespace: &Namespace,
        domain: Domain,
        records: &[TrackingRecord],
        progress: &dyn ProgressReporter,
    ) -> Result<StagingSet> {
        let selected = validate_components(domain, records)?;

        let root = self.create_dir(domain).await?;
        let mut set = StagingSet::create(root, namespace, domain).await?;

        let total = selected.len();
        for (i, record) in selected.into_iter().enumerate() {
            let file_type = record.file_type;

            let fetched = match self.fetch_csv(&record.source_ref).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    record_best_effort(
                        self.repo,
                        &record.id,
                        &AttemptOutcome::failure(e.to_string()),
                    )
                    .await;
                    if file_type.required() {
                        return Err(e);
                    }
                    warn!(
                        file_type = %file_type,
                        source_ref = %record.source_ref,
                        error = %e,
                        "skipping optional component"
                    );
                    set.skipped.push(SkippedComponent {
                        tracking_id: record.id.clone(),
                        source_ref: record.source_ref.clone(),
                        file_type,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let path = set.path().join(file_type.filename());
            tokio::fs::write(&path, &fetched.bytes)
                .await
                .map_err(|e| IatiError::io(&path, e))?;

            debug!(
                file = file_type.filename(),
                size = fetched.bytes.len(),
                "staged component"
            );
            progress.component_staged(file_type.filename(), i + 1, total);

            set.components.push(StagedComponent {
                tracking_id: record.id.clone(),
                source_ref: record.source_ref.clone(),
                file_type,
                path,
            });
        }

        info!(
            staged = set.components.len(),
            skipped = set.skipped.len(),
            dir = %set.root().display(),
            "staging complete"
        );
        Ok(set)
    }

    async fn create_dir(&self, domain: Domain) -> Result<TempDir> {
        let prefix = format!("iatigen-{domain}-");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        match self.staging_root {
            Some(root) => {
                tokio::fs::create_dir_all(root)
                    .await
                    .map_err(|e| IatiError::io(root, e))?;
                builder.tempdir_in(root).map_err(|e| IatiError::io(root, e))
            }
            None => builder
                .tempdir()
                .map_err(|e| IatiError::io(std::env::temp_dir(), e)),
        }
    }

    /// Fetch under the configured timeout and require CSV content.
    async fn fetch_csv(&self, source_ref: &str) -> Result<FetchedResource> {
        let fetched = tokio::time::timeout(self.fetch_timeout, self.accessor.fetch(source_ref))
            .await
            .map_err(|_| {
                IatiError::fetch(
                    source_ref,
                    format!("timed out after {}s", self.fetch_timeout.as_secs()),
                )
            })??;

        if !fetched.format.is_csv() {
            return Err(IatiError::UnsupportedFormat {
                source_ref: source_ref.to_string(),
                format: fetched.format.to_string(),
            });
        }
        Ok(fetched)
    }
}
