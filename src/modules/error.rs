//! Error taxonomy for the provisioning pipeline.
//!
//! Fatal conditions are variants of [`Error`]; non-fatal ones are
//! [`Warning`]s that a session accumulates without changing its outcome.

use super::command::CommandOutput;
use super::constants::EXIT_CANCELLED;
use super::diagnose::{self, Diagnosis};
use serde::Serialize;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal errors raised by a pipeline stage.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad profile name, mount point or username. Never retried.
    #[error("invalid {field}: {reason}")]
    Validation {
        /// What was being validated
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// The password source could not be read or was empty.
    #[error("credential error: {0}")]
    Credential(String),

    /// No candidate protocol version was accepted by the remote endpoint.
    #[error("no SMB protocol version accepted by {host} (tried {tried}): {last_output}")]
    Negotiation {
        /// Remote host that was probed
        host: String,
        /// Comma-separated list of versions tried, in order
        tried: String,
        /// Output captured from the last trial
        last_output: String,
        /// Exit status of the last trial, if it exited
        status: Option<i32>,
    },

    /// The real mount failed on every attempt, or a mount point could not
    /// be released.
    #[error("mount of {mount_point} failed after {attempts} attempt(s): {diagnosis}: {output}")]
    Mount {
        /// Target mount point
        mount_point: PathBuf,
        /// Number of attempts made
        attempts: u32,
        /// Classification of the last failure
        diagnosis: Diagnosis,
        /// Output captured from the last attempt
        output: String,
        /// Exit status of the last attempt, if it exited
        status: Option<i32>,
    },

    /// The operator answered "no" at a decision point.
    #[error("aborted: {0}")]
    Declined(String),

    /// The host is not ready to run the pipeline.
    #[error("preflight check failed: {0}")]
    Preflight(String),

    /// Termination was requested by a signal.
    #[error("interrupted by signal")]
    Cancelled,

    /// An external command could not be started at all.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Filesystem access failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted
        context: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Builds a [`Error::Validation`].
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Error::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Builds an [`Error::Io`] with a context message.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Builds an [`Error::Mount`] for an `umount` of `mount_point` that failed.
    pub fn unmount(mount_point: &Path, output: &CommandOutput) -> Self {
        Error::Mount {
            mount_point: mount_point.to_path_buf(),
            attempts: 1,
            diagnosis: diagnose::classify(output),
            output: format!("umount: {}", output.summary()),
            status: output.status,
        }
    }

    /// Process exit status for this error.
    ///
    /// Command failures propagate the failing command's own status when it
    /// exited with one; cancellation uses the signal-termination status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Negotiation {
                status: Some(code), ..
            }
            | Error::Mount {
                status: Some(code), ..
            } if *code != 0 => *code,
            Error::Cancelled => EXIT_CANCELLED,
            _ => 1,
        }
    }
}

/// Extension for attaching context to `std::io::Result`.
pub(crate) trait IoContext<T> {
    fn context_io<C: Into<String>>(self, context: impl FnOnce() -> C) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn context_io<C: Into<String>>(self, context: impl FnOnce() -> C) -> Result<T> {
        self.map_err(|e| Error::io(context(), e))
    }
}

/// Non-fatal conditions surfaced at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// The mount succeeded but the write probe failed.
    ReadOnly {
        /// Mount point that was probed
        mount_point: PathBuf,
        /// Why the probe failed
        reason: String,
    },
    /// A persistence artifact was written but could not be verified or activated.
    Persistence {
        /// What went wrong
        detail: String,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::ReadOnly {
                mount_point,
                reason,
            } => write!(
                f,
                "{} is mounted but not writable: {}",
                mount_point.display(),
                reason
            ),
            Warning::Persistence { detail } => write!(f, "persistence: {}", detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_propagates_command_status() {
        let err = Error::Mount {
            mount_point: PathBuf::from("/mnt/storagebox"),
            attempts: 3,
            diagnosis: Diagnosis::PermissionDenied,
            output: "mount error(13): Permission denied".into(),
            status: Some(32),
        };
        assert_eq!(err.exit_code(), 32);

        let err = Error::Negotiation {
            host: "u1.your-storagebox.de".into(),
            tried: "3.1.1".into(),
            last_output: String::new(),
            status: None,
        };
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_exit_code_for_cancellation() {
        assert_eq!(Error::Cancelled.exit_code(), 130);
        assert_eq!(Error::validation("profile name", "bad").exit_code(), 1);
    }

    #[test]
    fn test_warning_serializes_with_kind_tag() {
        let warning = Warning::Persistence {
            detail: "remount via fstab failed".into(),
        };
        let json = serde_json::to_value(&warning).unwrap();
        assert_eq!(json["kind"], "persistence");
    }
}
