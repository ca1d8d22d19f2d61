//! Core pipeline orchestration and domain logic for iatigen.
//!
//! This crate ties together source fetching, staging, conversion, and
//! publishing into one run per namespace and domain (see [`pipeline::Pipeline`]),
//! plus the tagging events that keep the tracking store current.

pub mod accessor;
pub mod conversion;
pub mod host;
pub mod pipeline;
pub mod publisher;
pub mod report;
pub mod staging;
pub mod tagging;

pub use accessor::{FetchedResource, LocatorAccessor, ResourceAccessor, SourceFormat};
pub use conversion::{CommandConverter, ConversionInvoker, Converter};
pub use host::{DirectoryHost, HostRegistry, ResourceDescriptor};
pub use pipeline::{
    ComponentOutcome, Pipeline, PipelineOptions, ProgressReporter, RunRequest, RunResult, RunState,
    SilentProgress,
};
pub use publisher::{ArtifactPublisher, PublishedArtifact};
pub use report::{ErrorReport, ReportEntry};
pub use staging::{SkippedComponent, StagedComponent, StagingSet};
pub use tagging::TaggingService;
