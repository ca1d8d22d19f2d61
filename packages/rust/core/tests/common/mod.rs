#![allow(dead_code)]

//! In-memory collaborators for pipeline tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;
use uuid::Uuid;

use iatigen_core::{
    ArtifactPublisher, ConversionInvoker, Converter, FetchedResource, HostRegistry, Pipeline,
    PipelineOptions, ResourceAccessor, ResourceDescriptor, SourceFormat,
};
use iatigen_shared::{ConversionFailure, ConversionIssue, Domain, IatiError, Result};
use iatigen_storage::{MemoryRepository, TrackingRepository};

pub const ORG_MAIN_CSV: &str =
    include_str!("../../../../../fixtures/csv/organization/organisations.csv");
pub const ORG_BUDGETS_CSV: &str =
    include_str!("../../../../../fixtures/csv/organization/budgets.csv");

// ---------------------------------------------------------------------------
// Accessor
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Source {
    Content(Vec<u8>, SourceFormat),
    Fail(String),
    Hang,
}

/// Sources keyed by `source_ref`; counts every fetch.
#[derive(Default)]
pub struct MemoryAccessor {
    sources: Mutex<HashMap<String, Source>>,
    fetches: AtomicUsize,
}

impl MemoryAccessor {
    pub fn csv(&self, source_ref: &str, content: &str) {
        self.insert(
            source_ref,
            Source::Content(content.as_bytes().to_vec(), SourceFormat::Csv),
        );
    }

    pub fn with_format(&self, source_ref: &str, content: &[u8], format: &str) {
        self.insert(
            source_ref,
            Source::Content(content.to_vec(), SourceFormat::from_declared(format)),
        );
    }

    pub fn failing(&self, source_ref: &str, message: &str) {
        self.insert(source_ref, Source::Fail(message.to_string()));
    }

    pub fn hanging(&self, source_ref: &str) {
        self.insert(source_ref, Source::Hang);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn insert(&self, source_ref: &str, source: Source) {
        self.sources
            .lock()
            .unwrap()
            .insert(source_ref.to_string(), source);
    }
}

#[async_trait]
impl ResourceAccessor for MemoryAccessor {
    async fn fetch(&self, source_ref: &str) -> Result<FetchedResource> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let source = self.sources.lock().unwrap().get(source_ref).cloned();
        match source {
            Some(Source::Content(bytes, format)) => Ok(FetchedResource { bytes, format }),
            Some(Source::Fail(message)) => Err(IatiError::fetch(source_ref, message)),
            Some(Source::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(IatiError::fetch(source_ref, "unreachable"))
            }
            None => Err(IatiError::fetch(source_ref, "no such resource")),
        }
    }
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// One converter invocation as seen from inside.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub domain: Domain,
    pub input_dir: PathBuf,
    pub files: Vec<String>,
}

/// Merges staged CSVs into a pseudo-XML document.
///
/// Rejects a `budgets.csv` whose header does not mention `budget`.
#[derive(Default)]
pub struct FakeConverter {
    invocations: Mutex<Vec<Invocation>>,
    barrier: Option<Arc<tokio::sync::Barrier>>,
}

impl FakeConverter {
    /// Every invocation waits until `parties` invocations are in flight.
    pub fn rendezvous(parties: usize) -> Self {
        Self {
            invocations: Mutex::default(),
            barrier: Some(Arc::new(tokio::sync::Barrier::new(parties))),
        }
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl Converter for FakeConverter {
    async fn convert(
        &self,
        domain: Domain,
        input_dir: &Path,
        output: &Path,
    ) -> std::result::Result<bool, ConversionFailure> {
        let mut files: Vec<String> = std::fs::read_dir(input_dir)
            .map_err(|e| ConversionFailure::general(e.to_string()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();

        self.invocations.lock().unwrap().push(Invocation {
            domain,
            input_dir: input_dir.to_path_buf(),
            files: files.clone(),
        });

        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }

        let mut merged = format!("<{domain}>\n");
        for name in &files {
            let content = std::fs::read_to_string(input_dir.join(name))
                .map_err(|e| ConversionFailure::general(e.to_string()))?;
            if name == "budgets.csv" && !content.lines().next().unwrap_or("").contains("budget") {
                return Err(ConversionFailure {
                    issues: vec![
                        ConversionIssue::for_file("budgets.csv", "  missing budget columns  "),
                        ConversionIssue::for_file("budgets.csv", "missing budget columns"),
                        ConversionIssue::general("document incomplete"),
                    ],
                });
            }
            merged.push_str(&format!("<file name=\"{name}\">{content}</file>\n"));
        }
        merged.push_str(&format!("</{domain}>\n"));

        std::fs::write(output, merged).map_err(|e| ConversionFailure::general(e.to_string()))?;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryHost {
    resources: Mutex<HashMap<String, ResourceDescriptor>>,
    reject_updates: AtomicBool,
    updates: AtomicUsize,
}

impl MemoryHost {
    pub fn payload(&self, id: &str) -> Option<Vec<u8>> {
        self.resources
            .lock()
            .unwrap()
            .get(id)
            .map(|d| d.payload.clone())
    }

    pub fn reject_updates(&self) {
        self.reject_updates.store(true, Ordering::SeqCst);
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn resource_count(&self) -> usize {
        self.resources.lock().unwrap().len()
    }
}

#[async_trait]
impl HostRegistry for MemoryHost {
    async fn create(&self, descriptor: &ResourceDescriptor) -> Result<String> {
        let id = Uuid::now_v7().to_string();
        self.resources
            .lock()
            .unwrap()
            .insert(id.clone(), descriptor.clone());
        Ok(id)
    }

    async fn update(&self, id: &str, descriptor: &ResourceDescriptor) -> Result<String> {
        if self.reject_updates.load(Ordering::SeqCst) {
            return Err(IatiError::Publish("host rejected the update".into()));
        }
        let mut resources = self.resources.lock().unwrap();
        let slot = resources
            .get_mut(id)
            .ok_or_else(|| IatiError::Publish(format!("resource {id} does not exist")))?;
        *slot = descriptor.clone();
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(id.to_string())
    }

    async fn locate(&self, id: &str) -> Result<Option<Url>> {
        if !self.resources.lock().unwrap().contains_key(id) {
            return Ok(None);
        }
        Url::parse(&format!("https://host.test/resources/{id}"))
            .map(Some)
            .map_err(|e| IatiError::validation(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub repo: Arc<MemoryRepository>,
    pub accessor: Arc<MemoryAccessor>,
    pub converter: Arc<FakeConverter>,
    pub host: Arc<MemoryHost>,
    pub publisher: ArtifactPublisher,
    pub pipeline: Pipeline,
    pub staging_root: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_converter(FakeConverter::default())
    }

    pub fn with_converter(converter: FakeConverter) -> Self {
        Self::build(
            Arc::new(MemoryRepository::new()),
            converter,
            Duration::from_secs(5),
        )
    }

    pub fn with_fetch_timeout(fetch_timeout: Duration) -> Self {
        Self::build(
            Arc::new(MemoryRepository::new()),
            FakeConverter::default(),
            fetch_timeout,
        )
    }

    fn build(
        repo: Arc<MemoryRepository>,
        converter: FakeConverter,
        fetch_timeout: Duration,
    ) -> Self {
        let accessor = Arc::new(MemoryAccessor::default());
        let converter = Arc::new(converter);
        let host = Arc::new(MemoryHost::default());
        let staging_root = tempfile::tempdir().expect("staging root");

        let publisher = ArtifactPublisher::new(host.clone());
        let pipeline = Pipeline::new(
            repo.clone(),
            accessor.clone(),
            ConversionInvoker::new(converter.clone(), Duration::from_secs(10)),
            publisher.clone(),
            PipelineOptions {
                fetch_timeout,
                staging_root: Some(staging_root.path().to_path_buf()),
            },
        );

        Self {
            repo,
            accessor,
            converter,
            host,
            publisher,
            pipeline,
            staging_root,
        }
    }

    /// Create a destination on the host and tag it.
    pub async fn provision(&self, namespace: &str, domain: Domain) -> String {
        let record = self
            .publisher
            .provision(
                self.repo.as_ref() as &dyn TrackingRepository,
                &iatigen_shared::Namespace::new(namespace),
                domain,
            )
            .await
            .expect("provision destination");
        record.source_ref
    }

    /// Tag a CSV component and register its content.
    pub async fn tag_csv(
        &self,
        source_ref: &str,
        namespace: &str,
        file_type: iatigen_shared::FileType,
        content: &str,
    ) -> iatigen_shared::TrackingRecord {
        self.accessor.csv(source_ref, content);
        self.tag(source_ref, namespace, file_type).await
    }

    pub async fn tag(
        &self,
        source_ref: &str,
        namespace: &str,
        file_type: iatigen_shared::FileType,
    ) -> iatigen_shared::TrackingRecord {
        self.repo
            .upsert_tag(
                source_ref,
                &iatigen_shared::Namespace::new(namespace),
                file_type,
            )
            .await
            .expect("tag")
    }

    pub async fn record(&self, source_ref: &str) -> iatigen_shared::TrackingRecord {
        self.repo
            .find_by_source_ref(source_ref)
            .await
            .expect("lookup")
            .expect("record exists")
    }
}
