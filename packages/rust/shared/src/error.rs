//! Error types for iatigen.
//!
//! Library crates use [`IatiError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::registry::{Domain, FileType};
use crate::types::Namespace;

/// Top-level error type for all iatigen operations.
#[derive(Debug, thiserror::Error)]
pub enum IatiError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Network/HTTP error while talking to a collaborator.
    #[error("network error: {0}")]
    Network(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A role code or name that is not in the file type catalog.
    #[error("invalid file type: {input:?}")]
    InvalidFileType { input: String },

    /// A required component has no tagged source in the namespace.
    #[error("missing required component {file_type} ({filename})", filename = .file_type.filename())]
    MissingRequiredComponent { file_type: FileType },

    /// More sources are tagged with a file type than its cardinality allows.
    #[error("too many components for {file_type}: found {found}, max {max}")]
    TooManyComponents {
        file_type: FileType,
        found: usize,
        max: usize,
    },

    /// Fetching a source's content failed.
    #[error("failed to fetch {source_ref}: {message}")]
    FetchFailure { source_ref: String, message: String },

    /// A source declared a format other than CSV.
    #[error("unsupported format {format:?} for {source_ref} (only CSV is accepted)")]
    UnsupportedFormat { source_ref: String, format: String },

    /// The external converter rejected the staged components.
    #[error(transparent)]
    Conversion(#[from] ConversionFailure),

    /// No destination resource is tagged for the namespace and domain.
    #[error("no destination configured for {domain} in namespace {namespace}")]
    NoDestinationConfigured { namespace: Namespace, domain: Domain },

    /// Staging produced no components at all.
    #[error("no input data staged for {domain} in namespace {namespace}")]
    NoInputData { namespace: Namespace, domain: Domain },

    /// Writing the merged document to the destination failed.
    #[error("publish error: {0}")]
    Publish(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, IatiError>;

impl IatiError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a fetch failure for a source reference.
    pub fn fetch(source_ref: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::FetchFailure {
            source_ref: source_ref.into(),
            message: msg.into(),
        }
    }

    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "Config",
            Self::Storage(_) => "Storage",
            Self::Network(_) => "Network",
            Self::Io { .. } => "Io",
            Self::Validation { .. } => "Validation",
            Self::InvalidFileType { .. } => "InvalidFileType",
            Self::MissingRequiredComponent { .. } => "MissingRequiredComponent",
            Self::TooManyComponents { .. } => "TooManyComponents",
            Self::FetchFailure { .. } => "FetchFailure",
            Self::UnsupportedFormat { .. } => "UnsupportedFormat",
            Self::Conversion(_) => "ConversionError",
            Self::NoDestinationConfigured { .. } => "NoDestinationConfigured",
            Self::NoInputData { .. } => "NoInputData",
            Self::Publish(_) => "PublishError",
        }
    }
}

// ---------------------------------------------------------------------------
// Conversion issues
// ---------------------------------------------------------------------------

/// A single problem reported by the external converter.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConversionIssue {
    /// Canonical component filename the issue refers to, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Human-readable description.
    pub message: String,
}

impl ConversionIssue {
    /// An issue tied to a component filename.
    pub fn for_file(file_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            file_name: Some(file_name.into()),
            message: message.into(),
        }
    }

    /// An issue that cannot be tied to a component.
    pub fn general(message: impl Into<String>) -> Self {
        Self {
            file_name: None,
            message: message.into(),
        }
    }
}

/// The converter rejected its input; carries the normalized issue list.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("conversion failed with {} issue(s): {}", .issues.len(), first_message(.issues))]
pub struct ConversionFailure {
    /// Normalized issues, in converter order.
    pub issues: Vec<ConversionIssue>,
}

impl ConversionFailure {
    /// Fallback text used when the converter gave no message at all.
    pub const GENERIC_MESSAGE: &'static str = "converter reported a failure without details";

    /// Build a failure with a single unattributed issue.
    pub fn general(message: impl Into<String>) -> Self {
        Self {
            issues: vec![ConversionIssue::general(message)],
        }
    }

    /// Message of the first issue, or a generic text when there is none.
    pub fn first_message(&self) -> &str {
        first_message(&self.issues)
    }
}

fn first_message(issues: &[ConversionIssue]) -> &str {
    issues
        .first()
        .map(|i| i.message.as_str())
        .unwrap_or(ConversionFailure::GENERIC_MESSAGE)
}
