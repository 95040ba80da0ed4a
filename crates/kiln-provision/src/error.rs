//! Errors raised while provisioning the build daemon.
//!
//! Each variant carries the context an operator needs to act on the failure
//! without re-running with verbose logging: the backend involved, the command
//! that failed, and the verbatim output of the container engine. I/O errors are
//! wrapped in `Arc` to keep the enum small.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use kiln_config::BackendKind;
use strum::Display;
use thiserror::Error;

use crate::command::CommandError;

/// Backend operation that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    /// Image build.
    Build,
    /// Container creation.
    Run,
    /// Container removal.
    Remove,
    /// Start of a stopped container.
    Start,
    /// State inspection.
    Inspect,
    /// Readiness ping.
    Ping,
}

/// Errors surfaced by the provisioning core.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The binary carries no revision and no version pin was configured.
    #[error(
        "no build revision is embedded in this binary; set KILN_DAEMON_VERSION or KILN_DAEMON_HOST"
    )]
    NoBuildInfo,

    /// No registered backend passed its availability probe.
    #[error("no usable container backend: {details}")]
    BackendUnavailable {
        /// One line per probed backend with its failure.
        details: String,
    },

    /// The configured backend is not present in the registry.
    #[error("backend '{kind}' is not registered")]
    BackendNotRegistered {
        /// Requested backend kind.
        kind: BackendKind,
    },

    /// A backend kind was registered twice.
    #[error("backend '{kind}' is already registered")]
    DuplicateBackend {
        /// Kind registered twice.
        kind: BackendKind,
    },

    /// The provisioning lock could not be acquired in time.
    #[error("timed out after {waited:?} waiting for provisioning lock {}", path.display())]
    LockTimeout {
        /// Lock file path.
        path: PathBuf,
        /// Time spent waiting.
        waited: Duration,
    },

    /// The lock file or its parent directory could not be created or locked.
    #[error("failed to open provisioning lock {}: {source}", path.display())]
    LockIo {
        /// Lock file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Inspect output for an existing daemon could not be understood.
    #[error("cannot parse {backend} inspect output {output:?}: {reason}")]
    InspectParse {
        /// Backend that produced the output.
        backend: BackendKind,
        /// Raw inspect output.
        output: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A backend command failed.
    #[error("{backend} {operation} failed: {source}")]
    BackendOperation {
        /// Backend that ran the command.
        backend: BackendKind,
        /// Operation being attempted.
        operation: Operation,
        /// Command failure, including the combined output.
        #[source]
        source: CommandError,
    },

    /// The backend reported that the resource already exists or is in use.
    ///
    /// The reconciler treats this as success because another process won the
    /// race to create or start the daemon.
    #[error("{backend} {operation} conflicted with a concurrent change: {output}")]
    Conflict {
        /// Backend that reported the conflict.
        backend: BackendKind,
        /// Operation that conflicted.
        operation: Operation,
        /// Combined output carrying the conflict marker.
        output: String,
    },

    /// The embedded build context could not be written to disk.
    #[error("failed to stage daemon build context at {}: {source}", path.display())]
    Staging {
        /// Path being written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The daemon never answered a readiness probe.
    #[error("daemon at {endpoint} did not respond after {attempts} attempts: {last_error}")]
    DaemonNotResponding {
        /// Endpoint that was probed.
        endpoint: String,
        /// Number of probes issued.
        attempts: u32,
        /// Rendering of the last probe failure.
        last_error: String,
    },

    /// The pass was cancelled.
    #[error("provisioning cancelled during {stage}")]
    Cancelled {
        /// Stage that observed the cancellation.
        stage: &'static str,
    },

    /// The configuration could not be turned into provisioning settings.
    #[error("invalid provisioning settings: {message}")]
    Settings {
        /// Description of the problem.
        message: String,
    },
}

impl ProvisionError {
    /// Reports whether the error is a benign [`ProvisionError::Conflict`].
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Reports whether the error is a [`ProvisionError::Cancelled`].
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
