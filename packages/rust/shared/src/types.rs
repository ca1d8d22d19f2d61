//! Core domain types for tagged sources and their processing state.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::registry::{Domain, FileType};

/// Namespace used when a source carries no explicit namespace.
pub const DEFAULT_NAMESPACE: &str = "iati-xml";

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static whitespace pattern"));

// ---------------------------------------------------------------------------
// Namespace
// ---------------------------------------------------------------------------

/// A normalized scope grouping one owner's sources and destinations.
///
/// Normalization trims the input and collapses internal whitespace runs to
/// a single `-`. Case is preserved. Empty input falls back to
/// [`DEFAULT_NAMESPACE`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    /// Normalize a raw namespace string.
    pub fn new(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::default();
        }
        Self(WHITESPACE_RUN.replace_all(trimmed, "-").into_owned())
    }

    /// Normalize an optional namespace, defaulting when absent.
    pub fn from_option(raw: Option<&str>) -> Self {
        raw.map(Self::new).unwrap_or_default()
    }

    /// The normalized value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self(DEFAULT_NAMESPACE.to_string())
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Validity / outcomes
// ---------------------------------------------------------------------------

/// Tri-state health of a tracked source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Validity {
    /// Never processed since it was tagged (or re-tagged).
    #[default]
    Unknown,
    Valid,
    Invalid,
}

impl Validity {
    /// Storage representation (`NULL`, `1`, `0`).
    pub fn to_db(self) -> Option<i64> {
        match self {
            Self::Unknown => None,
            Self::Valid => Some(1),
            Self::Invalid => Some(0),
        }
    }

    /// Inverse of [`Validity::to_db`].
    pub fn from_db(value: Option<i64>) -> Self {
        match value {
            None => Self::Unknown,
            Some(0) => Self::Invalid,
            Some(_) => Self::Valid,
        }
    }
}

/// Result of one processing attempt on a tracked source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success,
    Failure(String),
}

impl AttemptOutcome {
    /// Failure outcome from any displayable message.
    pub fn failure(msg: impl Into<String>) -> Self {
        Self::Failure(msg.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

// ---------------------------------------------------------------------------
// TrackingRecord
// ---------------------------------------------------------------------------

/// Processing state for one tagged source resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingRecord {
    /// Unique record identifier (UUID v7).
    pub id: String,
    /// External identifier of the tagged source; unique across records.
    pub source_ref: String,
    /// Namespace the source is grouped under.
    pub namespace: Namespace,
    /// Role the source plays.
    pub file_type: FileType,
    /// Health as of the last attempt.
    pub is_valid: Validity,
    /// When the source was last processed, successfully or not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_at: Option<DateTime<Utc>>,
    /// When the source was last processed successfully.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
    /// Message from the most recent failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrackingRecord {
    /// A freshly tagged record with no processing history.
    pub fn new(source_ref: &str, namespace: Namespace, file_type: FileType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            source_ref: source_ref.to_string(),
            namespace,
            file_type,
            is_valid: Validity::Unknown,
            last_processed_at: None,
            last_success_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Domain of the record's role.
    pub fn domain(&self) -> Domain {
        self.file_type.domain()
    }

    /// Apply an attempt outcome in place, stamped at `at`.
    pub fn apply(&mut self, outcome: &AttemptOutcome, at: DateTime<Utc>) {
        self.last_processed_at = Some(at);
        self.updated_at = at;
        match outcome {
            AttemptOutcome::Success => {
                self.is_valid = Validity::Valid;
                self.last_error = None;
                self.last_success_at = Some(at);
            }
            AttemptOutcome::Failure(message) => {
                self.is_valid = Validity::Invalid;
                self.last_error = Some(message.clone());
            }
        }
    }

    /// Rebind to a new namespace/role. History resets only when the binding changes.
    pub fn rebind(&mut self, namespace: Namespace, file_type: FileType, at: DateTime<Utc>) {
        if self.namespace != namespace || self.file_type != file_type {
            self.is_valid = Validity::Unknown;
            self.last_error = None;
        }
        self.namespace = namespace;
        self.file_type = file_type;
        self.updated_at = at;
    }
}
