//! Backend capability set and the built-in container-engine drivers.
//!
//! A [`BackendDriver`] is everything the reconciler needs from a runtime:
//! probe, install, remove, start, inspect and ping. Drivers own all parsing of
//! their control plane's textual output so that the reconciler only ever sees
//! an [`ObservedState`] or a typed [`ProvisionError`].

use std::fmt;
use std::sync::Arc;

use kiln_config::BackendKind;
use serde::Serialize;

use crate::cancel::Cancellation;
use crate::command::CommandRunner;
use crate::error::ProvisionError;
use crate::identity::DaemonIdentity;
use crate::version::DesiredVersion;

mod build_context;
mod container;

pub use build_context::{BUILD_CONTEXT_FILES, stage_build_context};
pub use container::{ContainerEngineDriver, EngineFlavor, image_tag, parse_inspect_output};

/// Point-in-time observation of the daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObservedState {
    /// Whether the daemon resource exists at all.
    pub exists: bool,
    /// Version reported by the backend, when it exists and carries one.
    pub version: Option<String>,
    /// Whether the daemon is running.
    pub running: bool,
    /// Whether the daemon shares the host network namespace. Diagnostic only.
    pub host_network: bool,
}

impl ObservedState {
    /// State of a daemon that does not exist.
    #[must_use]
    pub const fn absent() -> Self {
        Self {
            exists: false,
            version: None,
            running: false,
            host_network: false,
        }
    }

    /// State of an existing daemon.
    #[must_use]
    pub fn present(version: impl Into<String>, running: bool) -> Self {
        Self {
            exists: true,
            version: Some(version.into()),
            running,
            host_network: false,
        }
    }
}

/// Operations a runtime must provide to host the daemon.
pub trait BackendDriver: Send + Sync {
    /// Kind of runtime this driver controls.
    fn kind(&self) -> BackendKind;

    /// Probes whether the runtime's control plane is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::BackendUnavailable`] when it is not.
    fn check_available(&self, cancel: &Cancellation) -> Result<(), ProvisionError>;

    /// Removes the daemon and its state. Removing an absent daemon succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::BackendOperation`] when removal fails.
    fn remove(&self, cancel: &Cancellation) -> Result<(), ProvisionError>;

    /// Builds and launches the daemon at `version`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Conflict`] when another process created the
    /// daemon first, and other variants for genuine failures.
    fn install(&self, version: &DesiredVersion, cancel: &Cancellation)
    -> Result<(), ProvisionError>;

    /// Starts an existing, stopped daemon.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Conflict`] when another process changed the
    /// daemon concurrently, and other variants for genuine failures.
    fn start(&self, cancel: &Cancellation) -> Result<(), ProvisionError>;

    /// Observes the daemon. Absence is reported as [`ObservedState::absent`].
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InspectParse`] for unreadable output and
    /// [`ProvisionError::BackendOperation`] when the runtime fails.
    fn inspect(&self, cancel: &Cancellation) -> Result<ObservedState, ProvisionError>;

    /// Checks whether the daemon answers requests.
    ///
    /// # Errors
    ///
    /// Returns an error when the daemon is not ready yet.
    fn ping(&self, cancel: &Cancellation) -> Result<(), ProvisionError>;

    /// Address clients use to reach the daemon.
    fn endpoint(&self) -> String;
}

/// Everything a backend constructor needs.
#[derive(Clone)]
pub struct BackendContext {
    /// Names of the managed resources.
    pub identity: DaemonIdentity,
    /// Runner for control-plane commands.
    pub runner: Arc<dyn CommandRunner>,
}

impl BackendContext {
    /// Bundles an identity with a command runner.
    #[must_use]
    pub const fn new(identity: DaemonIdentity, runner: Arc<dyn CommandRunner>) -> Self {
        Self { identity, runner }
    }
}

impl fmt::Debug for BackendContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendContext")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}
