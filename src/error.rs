//! Error types produced by the import pipeline.
//!
//! Errors fall into two groups that never mix:
//!
//! | Type | Where | Surfaced as |
//! |------|-------|-------------|
//! | [`Rejection`] | request path (validator) | HTTP 400, or 200 for [`Rejection::Ignored`] |
//! | [`PipelineError`] / [`StepError`] | background task | log entries and [`ImportReport`](crate::ImportReport) only |
//!
//! Nothing in the background group is ever returned to an HTTP caller and no
//! error in this crate terminates the process.

use std::path::PathBuf;

use thiserror::Error;

use crate::strategy::PreparationStep;

/// Why a notification was not turned into an import.
///
/// The `Display` text is the exact message sent back to the webhook caller.
///
/// # Examples
///
/// ```rust
/// use studio_import::Rejection;
///
/// let err = Rejection::MissingField("[payload][event]");
/// assert_eq!(err.to_string(), "Missing '[payload][event]'");
/// assert!(!err.is_ignored());
///
/// let skip = Rejection::Ignored("unsupported image type: oem".into());
/// assert!(skip.is_ignored());
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Rejection {
    /// A required field is absent, null or blank.
    #[error("Missing '{0}'")]
    MissingField(&'static str),

    /// The `payload` form field is not a JSON object of the expected shape.
    #[error("Invalid '[payload]': {0}")]
    InvalidPayload(String),

    /// A field is present but cannot be used safely.
    #[error("Invalid '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Well formed but not actionable. Not an error for the caller.
    #[error("{0}")]
    Ignored(String),
}

impl Rejection {
    /// Returns true when the notification was deliberately skipped.
    pub fn is_ignored(&self) -> bool {
        matches!(self, Rejection::Ignored(_))
    }
}

/// Failure of a single external command or filesystem action.
#[derive(Error, Debug)]
pub enum StepError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}")]
    NonZeroExit {
        command: String,
        status: String,
        output: String,
    },

    #[error("cannot derive an archive file name from `{0}`")]
    ArchiveName(String),

    #[error("filesystem error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StepError {
    /// Captured command output, when the failure came from a finished process.
    pub fn output(&self) -> Option<&str> {
        match self {
            StepError::NonZeroExit { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// A failed stage inside a background import task.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("preparation step `{step}` failed: {source}")]
    Preparation {
        step: PreparationStep,
        #[source]
        source: StepError,
    },

    #[error("registry import failed: {0}")]
    Import(#[source] StepError),

    #[error("cleanup of {} failed: {source}", .path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
