//! User-facing error reports.
//!
//! Turns a run's error and skipped components into itemized entries with a
//! suggested fix, keyed by component filename where one applies. The full
//! machine-readable picture is kept alongside as JSON.

use std::fmt;

use serde::Serialize;
use serde_json::json;

use iatigen_shared::{ConversionFailure, Domain, FileType, IatiError};

use crate::pipeline::RunResult;
use crate::staging::SkippedComponent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub severity: Severity,
    pub title: String,
    pub details: String,
    pub suggestion: String,
    /// Canonical filename of the component the entry is about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub entries: Vec<ReportEntry>,
    pub raw: serde_json::Value,
}

impl ErrorReport {
    pub fn from_run(result: &RunResult) -> Self {
        let mut entries = match &result.error {
            Some(error) => error_entries(error, result.domain),
            None => Vec::new(),
        };
        entries.extend(result.skipped.iter().map(skipped_entry));

        let raw = json!({
            "namespace": result.namespace,
            "domain": result.domain,
            "state": result.state,
            "failed_stage": result.failed_stage,
            "error": result.error.as_ref().map(raw_error),
            "components": result.components,
            "skipped": result.skipped,
            "destination_id": result.destination_id,
        });

        Self { entries, raw }
    }

    /// Report for an error raised outside a run (e.g. while tagging).
    pub fn from_error(error: &IatiError, domain: Domain) -> Self {
        Self {
            entries: error_entries(error, domain),
            raw: json!({ "error": raw_error(error) }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|e| e.severity == Severity::Error)
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            let marker = match entry.severity {
                Severity::Error => "error",
                Severity::Warning => "warning",
            };
            match &entry.component {
                Some(file) => writeln!(f, "{marker}: {} [{file}]", entry.title)?,
                None => writeln!(f, "{marker}: {}", entry.title)?,
            }
            for line in entry.details.lines() {
                writeln!(f, "    {line}")?;
            }
            writeln!(f, "    hint: {}", entry.suggestion)?;
        }
        Ok(())
    }
}

fn raw_error(error: &IatiError) -> serde_json::Value {
    let issues = match error {
        IatiError::Conversion(failure) => Some(&failure.issues),
        _ => None,
    };
    json!({
        "kind": error.kind(),
        "message": error.to_string(),
        "issues": issues,
    })
}

fn entry(
    title: impl Into<String>,
    details: impl Into<String>,
    suggestion: impl Into<String>,
    component: Option<FileType>,
) -> ReportEntry {
    ReportEntry {
        severity: Severity::Error,
        title: title.into(),
        details: details.into(),
        suggestion: suggestion.into(),
        component: component.map(|ft| ft.filename().to_string()),
    }
}

fn error_entries(error: &IatiError, domain: Domain) -> Vec<ReportEntry> {
    match error {
        IatiError::Conversion(failure) => conversion_entries(failure, domain),
        IatiError::MissingRequiredComponent { file_type } => vec![entry(
            "Missing required file",
            error.to_string(),
            format!(
                "Tag a CSV resource as {} ({}) in this namespace",
                file_type.name(),
                file_type.code()
            ),
            Some(*file_type),
        )],
        IatiError::TooManyComponents {
            file_type,
            found,
            max,
        } => vec![entry(
            "Too many files of one type",
            format!("{found} resources are tagged as {}", file_type.name()),
            format!("Keep at most {max} and untag the others"),
            Some(*file_type),
        )],
        IatiError::FetchFailure {
            source_ref,
            message,
        } => vec![entry(
            "Could not download a source file",
            format!("{source_ref}: {message}"),
            "Check that the resource exists and is reachable, then run again",
            None,
        )],
        IatiError::UnsupportedFormat { source_ref, format } => vec![entry(
            "Source file is not CSV",
            format!("{source_ref} declares format {format}"),
            "Upload the file as CSV",
            None,
        )],
        IatiError::NoDestinationConfigured { namespace, domain } => vec![entry(
            "No destination configured",
            format!("nothing is tagged as the {domain} output in namespace {namespace}"),
            format!(
                "Provision or tag a resource as {}",
                FileType::final_artifact(*domain).name()
            ),
            None,
        )],
        IatiError::NoInputData { namespace, domain } => vec![entry(
            "No input data",
            format!("no {domain} components could be staged in namespace {namespace}"),
            "Tag at least the required CSV files and run again",
            None,
        )],
        IatiError::Publish(message) => vec![entry(
            "Could not publish the generated file",
            message.clone(),
            "Check that the destination resource still exists on the host",
            None,
        )],
        IatiError::InvalidFileType { input } => vec![entry(
            "Unknown file type",
            format!("{input:?} is not a known file type code or name"),
            "Run `iatigen file-types` to list the valid values",
            None,
        )],
        other => vec![entry(
            "Unexpected error",
            other.to_string(),
            "Check the logs for details",
            None,
        )],
    }
}

/// One entry per resolvable component, one generic entry for the rest.
fn conversion_entries(failure: &ConversionFailure, domain: Domain) -> Vec<ReportEntry> {
    let mut entries: Vec<ReportEntry> = Vec::new();
    let mut unattributed: Vec<&str> = Vec::new();

    for issue in &failure.issues {
        let file_type = issue
            .file_name
            .as_deref()
            .and_then(|name| FileType::from_filename(domain, name));

        let Some(file_type) = file_type else {
            unattributed.push(&issue.message);
            continue;
        };

        let filename = file_type.filename();
        match entries
            .iter_mut()
            .find(|e| e.component.as_deref() == Some(filename))
        {
            Some(existing) => {
                existing.details.push('\n');
                existing.details.push_str(&issue.message);
            }
            None => entries.push(entry(
                format!("Problem in {filename}"),
                issue.message.clone(),
                format!("Fix the file tagged as {} and run again", file_type.name()),
                Some(file_type),
            )),
        }
    }

    if !unattributed.is_empty() {
        entries.push(entry(
            "Conversion failed",
            unattributed.join("\n"),
            "Review the source files; the converter could not point at a specific one",
            None,
        ));
    }
    entries
}

fn skipped_entry(skipped: &SkippedComponent) -> ReportEntry {
    ReportEntry {
        severity: Severity::Warning,
        title: "Optional file skipped".into(),
        details: format!("{}: {}", skipped.source_ref, skipped.reason),
        suggestion: format!(
            "Fix or untag the resource tagged as {}",
            skipped.file_type.name()
        ),
        component: Some(skipped.file_type.filename().to_string()),
    }
}
