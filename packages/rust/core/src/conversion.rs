//! Conversion boundary.
//!
//! The merge from staged CSV components to the final document is done by an
//! external converter. [`Converter`] is the raw capability;
//! [`ConversionInvoker`] wraps it with a timeout and turns whatever the
//! converter reports into a normalized [`ConversionFailure`].

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use iatigen_shared::{ConversionFailure, ConversionIssue, ConverterConfig, Domain};

/// Converts a directory of staged components into one output document.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Returns `Ok(true)` on success. `Ok(false)` means the converter failed
    /// without saying why.
    async fn convert(
        &self,
        domain: Domain,
        input_dir: &Path,
        output: &Path,
    ) -> Result<bool, ConversionFailure>;
}

// ---------------------------------------------------------------------------
// Invoker
// ---------------------------------------------------------------------------

/// Runs a [`Converter`] under a timeout and normalizes its failures.
#[derive(Clone)]
pub struct ConversionInvoker {
    converter: Arc<dyn Converter>,
    timeout: Duration,
}

impl ConversionInvoker {
    pub fn new(converter: Arc<dyn Converter>, timeout: Duration) -> Self {
        Self { converter, timeout }
    }

    #[instrument(skip_all, fields(%domain, input = %input_dir.display()))]
    pub async fn invoke(
        &self,
        domain: Domain,
        input_dir: &Path,
        output: &Path,
    ) -> Result<(), ConversionFailure> {
        let result = tokio::time::timeout(
            self.timeout,
            self.converter.convert(domain, input_dir, output),
        )
        .await;

        match result {
            Err(_) => {
                warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "conversion timed out"
                );
                Err(ConversionFailure::general(format!(
                    "conversion timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
            Ok(Err(failure)) => Err(normalize(failure)),
            Ok(Ok(false)) => Err(ConversionFailure::general(
                ConversionFailure::GENERIC_MESSAGE,
            )),
            Ok(Ok(true)) => {
                if tokio::fs::metadata(output).await.is_err() {
                    return Err(ConversionFailure::general(
                        "converter reported success but produced no output file",
                    ));
                }
                info!(output = %output.display(), "conversion succeeded");
                Ok(())
            }
        }
    }
}

/// Trim messages and filenames, fill empty messages, drop exact duplicates.
pub fn normalize(failure: ConversionFailure) -> ConversionFailure {
    let mut issues: Vec<ConversionIssue> = Vec::with_capacity(failure.issues.len());

    for issue in failure.issues {
        let message = match issue.message.trim() {
            "" => ConversionFailure::GENERIC_MESSAGE.to_string(),
            m => m.to_string(),
        };
        let file_name = issue
            .file_name
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty());
        let issue = ConversionIssue { file_name, message };
        if !issues.contains(&issue) {
            issues.push(issue);
        }
    }

    if issues.is_empty() {
        return ConversionFailure::general(ConversionFailure::GENERIC_MESSAGE);
    }
    ConversionFailure { issues }
}

// ---------------------------------------------------------------------------
// CommandConverter
// ---------------------------------------------------------------------------

/// Runs an external command:
/// `<command> <args..> --domain <d> --input <dir> --output <file>`.
///
/// Exit status 0 is success. On failure, each stdout line is read as a JSON
/// issue (`{"file_name": ..., "message": ...}`); other lines become
/// unattributed issues, and stderr is used when stdout is empty.
pub struct CommandConverter {
    command: String,
    args: Vec<String>,
}

impl CommandConverter {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn from_config(config: &ConverterConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone())
    }
}

#[async_trait]
impl Converter for CommandConverter {
    async fn convert(
        &self,
        domain: Domain,
        input_dir: &Path,
        output: &Path,
    ) -> Result<bool, ConversionFailure> {
        debug!(cmd = %self.command, "spawning converter");

        let result = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .arg("--domain")
            .arg(domain.as_str())
            .arg("--input")
            .arg(input_dir)
            .arg("--output")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future on timeout or cancellation kills the child.
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ConversionFailure::general(format!(
                    "failed to run converter `{}`: {e}",
                    self.command
                ))
            })?;

        if result.status.success() {
            return Ok(true);
        }

        let stdout = String::from_utf8_lossy(&result.stdout);
        let mut issues = parse_issue_lines(&stdout);
        if issues.is_empty() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            issues = stderr
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(ConversionIssue::general)
                .collect();
        }
        if issues.is_empty() {
            issues.push(ConversionIssue::general(format!(
                "converter exited with {}",
                result.status
            )));
        }
        Err(ConversionFailure { issues })
    }
}

fn parse_issue_lines(text: &str) -> Vec<ConversionIssue> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            serde_json::from_str::<ConversionIssue>(line)
                .unwrap_or_else(|_| ConversionIssue::general(line))
        })
        .collect()
}
