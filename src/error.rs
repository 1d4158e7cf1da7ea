//! Error taxonomy for the diff pipeline, plus exit codes for the CLI.
//!
//! Library operations return [`DiffError`]. The three top-level kinds map
//! directly to how a caller should react:
//!
//! - [`DiffError::ToolUnavailable`]: the image toolkit is not installed; take a
//!   degraded path (e.g. hide the perceptual diff controls).
//! - [`DiffError::ToolFailed`]: the toolkit ran but failed, timed out or produced
//!   output we could not understand. Never cached, safe to retry.
//! - [`DiffError::Io`]: an input file could not be read.

use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Errors returned by the diff pipeline operations.
#[derive(thiserror::Error, Debug)]
pub enum DiffError {
    /// The external image toolkit is not installed or not usable.
    #[error("ImageMagick is not available")]
    ToolUnavailable,

    /// The external image toolkit ran but did not succeed.
    #[error("ImageMagick failed: {0}")]
    ToolFailed(#[from] ToolFailure),

    /// An input file could not be read.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },
}

impl DiffError {
    /// Wrap an I/O error with the path that caused it.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether repeating the same call may succeed.
    ///
    /// Tool failures are never cached, so a retry re-runs the tool.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ToolFailed(_))
    }

    /// Whether the error means the input file does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }

    /// Whether the error means the input file could not be opened for reading.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::PermissionDenied)
    }
}

/// The ways an external tool invocation can fail.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolFailure {
    /// The tool exited with a status that signals failure.
    #[error("`{program}` exited with status {code:?}: {detail}")]
    ExitStatus {
        /// Program that was run
        program: String,
        /// Exit code, `None` if the process was killed by a signal
        code: Option<i32>,
        /// Reason, or the tool's captured diagnostic output
        detail: String,
    },

    /// The tool did not finish within the configured timeout and was killed.
    #[error("`{program}` timed out after {timeout:?}")]
    Timeout {
        /// Program that was run
        program: String,
        /// Timeout that was exceeded
        timeout: Duration,
    },

    /// The tool succeeded but its output did not match the expected format.
    #[error("unexpected `{program}` output: {output:?}")]
    UnexpectedOutput {
        /// Program that was run
        program: String,
        /// Raw output
        output: String,
    },

    /// The tool could not be launched even though the probe found it.
    #[error("failed to launch `{program}`: {message}")]
    Spawn {
        /// Program that was run
        program: String,
        /// Launch error message
        message: String,
    },
}

impl ToolFailure {
    /// Whether the failure was caused by the timeout rather than the tool itself.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result alias for pipeline operations.
pub type DiffResult<T> = Result<T, DiffError>;

/// Exit codes for the webdiff CLI.
///
/// - 0: Success (files identical, or the command completed)
/// - 1: General error (unexpected failure)
/// - 2: Files differ
/// - 3: ImageMagick is not available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Success: the command completed and, for comparisons, files are identical.
    Success = 0,
    /// General error: An unexpected error occurred.
    GeneralError = 1,
    /// Different: the compared files differ.
    Different = 2,
    /// ToolUnavailable: the image toolkit is missing.
    ToolUnavailable = 3,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "WD000",
            Self::GeneralError => "WD001",
            Self::Different => "WD002",
            Self::ToolUnavailable => "WD003",
        }
    }

    /// Pick the exit code for an error bubbled up to `main`.
    #[must_use]
    pub fn for_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<DiffError>() {
            Some(DiffError::ToolUnavailable) => Self::ToolUnavailable,
            _ => Self::GeneralError,
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "WD001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message
    pub message: String,
    /// Whether retrying the same command may succeed
    pub retryable: bool,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{:#}", err),
            retryable: err
                .downcast_ref::<DiffError>()
                .is_some_and(DiffError::is_retryable),
        }
    }
}
