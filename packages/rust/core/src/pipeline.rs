//! End-to-end run: resolve destination → stage components → convert → publish.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, instrument, warn};
use url::Url;

use iatigen_shared::{
    AppConfig, AttemptOutcome, ConversionFailure, Domain, FileType, IatiError, Namespace, Result,
    TrackingRecord, expand_home,
};
use iatigen_storage::TrackingRepository;

use crate::accessor::ResourceAccessor;
use crate::conversion::ConversionInvoker;
use crate::publisher::{ArtifactPublisher, preferred_destination};
use crate::report::ErrorReport;
use crate::staging::{SkippedComponent, StagingAssembler, StagingSet};

// ---------------------------------------------------------------------------
// Run model
// ---------------------------------------------------------------------------

/// Where a run is, or where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Resolving,
    Staging,
    Converting,
    Publishing,
    Done,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolving => "resolving",
            Self::Staging => "staging",
            Self::Converting => "converting",
            Self::Publishing => "publishing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to regenerate one destination.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub namespace: Namespace,
    pub domain: Domain,
    /// Caller-defined owner (e.g. an organization id), carried for logging.
    pub owner_scope: Option<String>,
}

impl RunRequest {
    pub fn new(namespace: Option<&str>, domain: Domain) -> Self {
        Self {
            namespace: Namespace::from_option(namespace),
            domain,
            owner_scope: None,
        }
    }

    pub fn with_owner_scope(mut self, owner: impl Into<String>) -> Self {
        self.owner_scope = Some(owner.into());
        self
    }
}

/// Outcome recorded on one tracked component during a run.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentOutcome {
    pub tracking_id: String,
    pub source_ref: String,
    pub file_type: FileType,
    pub outcome: AttemptOutcome,
}

/// Everything a caller needs to know about a finished run.
#[derive(Debug)]
pub struct RunResult {
    pub namespace: Namespace,
    pub domain: Domain,
    pub state: RunState,
    /// The state the run was in when it failed.
    pub failed_stage: Option<RunState>,
    pub error: Option<IatiError>,
    pub components: Vec<ComponentOutcome>,
    pub skipped: Vec<SkippedComponent>,
    pub destination_id: Option<String>,
    pub content_hash: Option<String>,
    pub elapsed: Duration,
}

impl RunResult {
    fn start(request: &RunRequest) -> Self {
        Self {
            namespace: request.namespace.clone(),
            domain: request.domain,
            state: RunState::Resolving,
            failed_stage: None,
            error: None,
            components: Vec::new(),
            skipped: Vec::new(),
            destination_id: None,
            content_hash: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == RunState::Done
    }

    /// Itemized, user-facing report of what went wrong (empty on a clean run).
    pub fn report(&self) -> ErrorReport {
        ErrorReport::from_run(self)
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new state.
    fn phase(&self, state: RunState);
    /// Called when a component is written to staging.
    fn component_staged(&self, filename: &str, current: usize, total: usize);
    /// Called when the run reaches a terminal state.
    fn done(&self, result: &RunResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _state: RunState) {}
    fn component_staged(&self, _filename: &str, _current: usize, _total: usize) {}
    fn done(&self, _result: &RunResult) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Tunables for a [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub fetch_timeout: Duration,
    /// Parent of per-run staging directories (system temp dir when `None`).
    pub staging_root: Option<PathBuf>,
}

impl PipelineOptions {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let staging_root = config
            .pipeline
            .staging_root
            .as_deref()
            .map(expand_home)
            .transpose()?;
        Ok(Self {
            fetch_timeout: config.pipeline.fetch_timeout(),
            staging_root,
        })
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            staging_root: None,
        }
    }
}

/// Composes the tracking store, accessor, converter, and host into runs.
///
/// Runs share nothing but the repository, so any number may execute
/// concurrently.
#[derive(Clone)]
pub struct Pipeline {
    repo: Arc<dyn TrackingRepository>,
    accessor: Arc<dyn ResourceAccessor>,
    invoker: ConversionInvoker,
    publisher: ArtifactPublisher,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        repo: Arc<dyn TrackingRepository>,
        accessor: Arc<dyn ResourceAccessor>,
        invoker: ConversionInvoker,
        publisher: ArtifactPublisher,
        options: PipelineOptions,
    ) -> Self {
        Self {
            repo,
            accessor,
            invoker,
            publisher,
            options,
        }
    }

    /// Regenerate the destination of `request.namespace` + `request.domain`.
    ///
    /// Never returns an error: failures end in [`RunState::Failed`] with the
    /// cause on [`RunResult::error`].
    #[instrument(skip_all, fields(
        namespace = %request.namespace,
        domain = %request.domain,
        owner = request.owner_scope.as_deref().unwrap_or("-"),
    ))]
    pub async fn run(&self, request: &RunRequest, progress: &dyn ProgressReporter) -> RunResult {
        let start = Instant::now();
        let mut result = RunResult::start(request);

        info!("starting run");
        match self.execute(request, progress, &mut result).await {
            Ok(()) => {
                result.state = RunState::Done;
                info!(
                    destination = result.destination_id.as_deref().unwrap_or_default(),
                    components = result.components.len(),
                    skipped = result.skipped.len(),
                    "run complete"
                );
            }
            Err(e) => {
                warn!(stage = %result.state, kind = e.kind(), error = %e, "run failed");
                result.failed_stage = Some(result.state);
                result.state = RunState::Failed;
                result.error = Some(e);
            }
        }
        result.elapsed = start.elapsed();

        progress.phase(result.state);
        progress.done(&result);
        result
    }

    async fn execute(
        &self,
        request: &RunRequest,
        progress: &dyn ProgressReporter,
        result: &mut RunResult,
    ) -> Result<()> {
        let namespace = &request.namespace;
        let domain = request.domain;

        // --- Resolving ---
        enter(result, progress, RunState::Resolving);
        let records = self
            .repo
            .find_by_domain_and_namespace(domain, namespace)
            .await?;
        let destination = single_destination(&records, namespace, domain)?.clone();
        result.destination_id = Some(destination.source_ref.clone());

        // --- Staging ---
        enter(result, progress, RunState::Staging);
        let stager = StagingAssembler {
            repo: self.repo.as_ref(),
            accessor: self.accessor.as_ref(),
            fetch_timeout: self.options.fetch_timeout,
            staging_root: self.options.staging_root.as_deref(),
        };
        let staging = match stager.assemble(namespace, domain, &records, progress).await {
            Ok(staging) => staging,
            Err(e) => {
                if let Some(record) = aborting_component(&records, &e) {
                    result.components.push(ComponentOutcome {
                        tracking_id: record.id.clone(),
                        source_ref: record.source_ref.clone(),
                        file_type: record.file_type,
                        outcome: AttemptOutcome::failure(e.to_string()),
                    });
                }
                return Err(e);
            }
        };
        result.skipped = staging.skipped.clone();
        staging.ensure_not_empty()?;

        // --- Converting ---
        enter(result, progress, RunState::Converting);
        let output = staging.output_path();
        if let Err(failure) = self.invoker.invoke(domain, staging.path(), &output).await {
            self.record_conversion_failure(&staging, &destination, &failure, result)
                .await;
            return Err(IatiError::Conversion(failure));
        }
        for component in &staging.components {
            let outcome = AttemptOutcome::Success;
            record_best_effort(self.repo.as_ref(), &component.tracking_id, &outcome).await;
            result.components.push(ComponentOutcome {
                tracking_id: component.tracking_id.clone(),
                source_ref: component.source_ref.clone(),
                file_type: component.file_type,
                outcome,
            });
        }

        // --- Publishing ---
        enter(result, progress, RunState::Publishing);
        match self.publisher.publish(&destination, &output).await {
            Ok(published) => {
                record_best_effort(
                    self.repo.as_ref(),
                    &destination.id,
                    &AttemptOutcome::Success,
                )
                .await;
                result.destination_id = Some(published.destination_id);
                result.content_hash = Some(published.content_hash);
                Ok(())
            }
            Err(e) => {
                let outcome = AttemptOutcome::failure(e.to_string());
                record_best_effort(self.repo.as_ref(), &destination.id, &outcome).await;
                Err(e)
            }
        }
        // `staging` drops here, removing the run directory.
    }

    /// Mark attributable components and the destination as failed.
    async fn record_conversion_failure(
        &self,
        staging: &StagingSet,
        destination: &TrackingRecord,
        failure: &ConversionFailure,
        result: &mut RunResult,
    ) {
        for issue in &failure.issues {
            let Some(component) = issue
                .file_name
                .as_deref()
                .and_then(|name| staging.component_for_filename(name))
            else {
                continue;
            };
            // First message per component wins.
            if result
                .components
                .iter()
                .any(|c| c.tracking_id == component.tracking_id)
            {
                continue;
            }
            let outcome = AttemptOutcome::failure(issue.message.clone());
            record_best_effort(self.repo.as_ref(), &component.tracking_id, &outcome).await;
            result.components.push(ComponentOutcome {
                tracking_id: component.tracking_id.clone(),
                source_ref: component.source_ref.clone(),
                file_type: component.file_type,
                outcome,
            });
        }

        let outcome = AttemptOutcome::failure(failure.first_message());
        record_best_effort(self.repo.as_ref(), &destination.id, &outcome).await;
    }

    /// Public locator of the destination for `namespace` + `domain`.
    ///
    /// Read-only. When several destinations are tagged, valid ones with the
    /// most recent success win.
    pub async fn resolve_destination(&self, namespace: &Namespace, domain: Domain) -> Result<Url> {
        resolve_destination(self.repo.as_ref(), &self.publisher, namespace, domain).await
    }
}

/// Read-only destination lookup, usable without a full [`Pipeline`].
pub async fn resolve_destination(
    repo: &dyn TrackingRepository,
    publisher: &ArtifactPublisher,
    namespace: &Namespace,
    domain: Domain,
) -> Result<Url> {
    let records = repo
        .find_by_file_type(namespace, FileType::final_artifact(domain))
        .await?;
    let destination =
        preferred_destination(&records).ok_or_else(|| IatiError::NoDestinationConfigured {
            namespace: namespace.clone(),
            domain,
        })?;

    publisher.locate(destination).await?.ok_or_else(|| {
        IatiError::Publish(format!(
            "destination resource {} is not present on the host",
            destination.source_ref
        ))
    })
}

fn enter(result: &mut RunResult, progress: &dyn ProgressReporter, state: RunState) {
    info!(%state, "entering state");
    result.state = state;
    progress.phase(state);
}

/// The one final-artifact record among `records`.
fn single_destination<'a>(
    records: &'a [TrackingRecord],
    namespace: &Namespace,
    domain: Domain,
) -> Result<&'a TrackingRecord> {
    let file_type = FileType::final_artifact(domain);
    let destinations: Vec<_> = records
        .iter()
        .filter(|r| r.file_type == file_type)
        .collect();

    match destinations.as_slice() {
        [] => Err(IatiError::NoDestinationConfigured {
            namespace: namespace.clone(),
            domain,
        }),
        [only] => Ok(only),
        many => Err(IatiError::TooManyComponents {
            file_type,
            found: many.len(),
            max: 1,
        }),
    }
}

/// Record an attempt; a failure here is logged and never replaces the run's own error.
pub(crate) async fn record_best_effort(
    repo: &dyn TrackingRepository,
    id: &str,
    outcome: &AttemptOutcome,
) {
    if let Err(e) = repo.record_attempt(id, outcome).await {
        warn!(id, error = %e, "failed to record processing attempt");
    }
}

/// The record whose fetch aborted staging, if the error names one.
fn aborting_component<'a>(
    records: &'a [TrackingRecord],
    error: &IatiError,
) -> Option<&'a TrackingRecord> {
    let source_ref = match error {
        IatiError::FetchFailure { source_ref, .. }
        | IatiError::UnsupportedFormat { source_ref, .. } => source_ref,
        _ => return None,
    };
    records.iter().find(|r| &r.source_ref == source_ref)
}
