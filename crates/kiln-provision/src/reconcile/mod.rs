//! Convergence of the observed daemon onto the desired version.
//!
//! [`plan`] is the pure decision table; [`Reconciler::converge`] executes the
//! chosen action against a backend and waits for readiness. Callers run
//! `converge` while holding the provisioning lock.

use serde::Serialize;
use tracing::{info, warn};

use crate::backend::{BackendDriver, ObservedState};
use crate::cancel::Cancellation;
use crate::error::ProvisionError;
use crate::inspect::inspect_daemon;
use crate::readiness::{ReadinessBudget, wait_ready};
use crate::version::DesiredVersion;

/// Tracing target for reconciliation.
const RECONCILE_TARGET: &str = "kiln_provision::reconcile";

/// Why a fresh install is needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallReason {
    /// No daemon exists.
    Missing,
    /// A daemon exists at another version.
    VersionMismatch {
        /// Version found, if the backend reported one.
        found: Option<String>,
    },
}

/// Step that brings the daemon to the desired state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Remove whatever is there, then install the desired version.
    Install {
        /// Why the install is needed.
        reason: InstallReason,
    },
    /// Start the existing, correctly versioned daemon.
    Start,
    /// Nothing to do.
    NoOp,
}

/// Chooses the action for `observed` given `desired`.
#[must_use]
pub fn plan(observed: &ObservedState, desired: &DesiredVersion) -> Action {
    if !observed.exists {
        return Action::Install {
            reason: InstallReason::Missing,
        };
    }
    if !desired.matches(observed.version.as_deref()) {
        return Action::Install {
            reason: InstallReason::VersionMismatch {
                found: observed.version.clone(),
            },
        };
    }
    if observed.running {
        Action::NoOp
    } else {
        Action::Start
    }
}

/// Result of a successful convergence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Convergence {
    /// Address of the ready daemon.
    pub endpoint: String,
    /// Action that was taken.
    pub action: Action,
    /// Readiness probes issued, or `None` when no action was needed.
    pub probes: Option<u32>,
}

/// Drives a backend through the decision table.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler {
    readiness: ReadinessBudget,
}

impl Reconciler {
    /// Creates a reconciler with the given readiness budget.
    #[must_use]
    pub const fn new(readiness: ReadinessBudget) -> Self {
        Self { readiness }
    }

    /// Converges the daemon onto `desired` and returns its endpoint.
    ///
    /// # Errors
    ///
    /// Returns any non-benign backend failure, [`ProvisionError::InspectParse`]
    /// for unreadable state, [`ProvisionError::DaemonNotResponding`] when the
    /// daemon never becomes ready, and [`ProvisionError::Cancelled`].
    pub fn converge(
        &self,
        driver: &dyn BackendDriver,
        desired: &DesiredVersion,
        cancel: &Cancellation,
    ) -> Result<Convergence, ProvisionError> {
        let observed = inspect_daemon(driver, cancel)?;
        let action = plan(&observed, desired);
        info!(
            target: RECONCILE_TARGET,
            backend = %driver.kind(),
            desired = %desired,
            ?action,
            "reconciling daemon"
        );

        if action == Action::NoOp {
            return Ok(Convergence {
                endpoint: driver.endpoint(),
                action,
                probes: None,
            });
        }

        match &action {
            Action::NoOp => {}
            Action::Start => tolerate_conflict(driver.start(cancel))?,
            Action::Install { reason } => {
                remove_previous(driver, reason, cancel)?;
                tolerate_conflict(driver.install(desired, cancel))?;
            }
        }

        let probes = wait_ready(driver, self.readiness, cancel)?;
        Ok(Convergence {
            endpoint: driver.endpoint(),
            action,
            probes: Some(probes),
        })
    }
}

/// Clears the way for an install.
///
/// Leftovers of a missing daemon are best effort; an outdated daemon must go.
fn remove_previous(
    driver: &dyn BackendDriver,
    reason: &InstallReason,
    cancel: &Cancellation,
) -> Result<(), ProvisionError> {
    let Err(error) = driver.remove(cancel) else {
        return Ok(());
    };
    if error.is_cancelled() {
        return Err(error);
    }
    match reason {
        InstallReason::Missing => {
            warn!(
                target: RECONCILE_TARGET,
                backend = %driver.kind(),
                %error,
                "ignoring failure to clear leftovers of a missing daemon"
            );
            Ok(())
        }
        InstallReason::VersionMismatch { .. } => Err(error),
    }
}

fn tolerate_conflict(result: Result<(), ProvisionError>) -> Result<(), ProvisionError> {
    match result {
        Err(error) if error.is_conflict() => {
            warn!(
                target: RECONCILE_TARGET,
                %error,
                "daemon was changed concurrently, continuing"
            );
            Ok(())
        }
        other => other,
    }
}
