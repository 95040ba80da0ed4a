//! Entry point that turns settings into a ready daemon connection.
//!
//! [`ClientFactory::ensure_daemon`] resolves the desired version, picks a
//! backend, and reconciles the daemon inside the provisioning lock. The lock
//! is held only across inspection and convergence so that backend probing and
//! handle construction never serialise concurrent clients.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use kiln_config::BackendKind;

use crate::backend::{BackendContext, BackendDriver, ObservedState};
use crate::cancel::Cancellation;
use crate::command::{CommandRunner, SystemCommandRunner};
use crate::error::ProvisionError;
use crate::handle::ConnectionHandle;
use crate::inspect::inspect_daemon;
use crate::lock::LockGuard;
use crate::reconcile::{Action, Reconciler, plan};
use crate::registry::BackendRegistry;
use crate::settings::ProvisionSettings;
use crate::version::{BuildInfo, DesiredVersion, Resolution, VersionResolver};

/// Tracing target for the factory.
const FACTORY_TARGET: &str = "kiln_provision::factory";

/// Read-only view of the daemon for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DaemonStatus {
    /// Provisioning is bypassed by the daemon host override.
    External {
        /// Configured address.
        host: String,
    },
    /// The daemon is managed by a backend.
    Managed {
        /// Selected backend.
        backend: BackendKind,
        /// Daemon endpoint.
        endpoint: String,
        /// Version this binary expects.
        desired: String,
        /// Current state.
        observed: ObservedState,
        /// What `ensure_daemon` would do now.
        planned: Action,
    },
}

/// Produces connection handles to a ready daemon.
pub struct ClientFactory {
    settings: ProvisionSettings,
    build: BuildInfo,
    registry: BackendRegistry,
    runner: Arc<dyn CommandRunner>,
}

impl ClientFactory {
    /// Factory using the built-in backends and real child processes.
    #[must_use]
    pub fn new(settings: ProvisionSettings, build: BuildInfo) -> Self {
        Self {
            settings,
            build,
            registry: BackendRegistry::builtin().clone(),
            runner: Arc::new(SystemCommandRunner),
        }
    }

    /// Replaces the backend registry.
    #[must_use]
    pub fn with_registry(mut self, registry: BackendRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replaces the command runner handed to backend constructors.
    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Settings in use.
    #[must_use]
    pub const fn settings(&self) -> &ProvisionSettings {
        &self.settings
    }

    /// Resolves the desired version for this pass.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NoBuildInfo`] when nothing identifies the
    /// desired version.
    pub fn resolve(&self) -> Result<Resolution, ProvisionError> {
        VersionResolver::new(self.build.clone())
            .with_host_override(self.settings.daemon_host.clone())
            .with_pinned_version(self.settings.pinned_version.clone())
            .resolve()
    }

    /// Ensures a daemon of the desired version is running and ready.
    ///
    /// # Errors
    ///
    /// Returns the first [`ProvisionError`] raised by resolution, backend
    /// selection, locking, or reconciliation.
    pub fn ensure_daemon(&self, cancel: &Cancellation) -> Result<ConnectionHandle, ProvisionError> {
        let desired = match self.resolve()? {
            Resolution::External { host } => {
                info!(target: FACTORY_TARGET, host = %host, "using external daemon");
                return Ok(ConnectionHandle::external(host));
            }
            Resolution::Provision(version) => version,
        };

        let driver = self.select_backend(cancel)?;
        let convergence = {
            let _lock = LockGuard::acquire(&self.settings.lock_path, self.settings.lock, cancel)?;
            Reconciler::new(self.settings.readiness).converge(driver.as_ref(), &desired, cancel)?
        };

        info!(
            target: FACTORY_TARGET,
            backend = %driver.kind(),
            endpoint = %convergence.endpoint,
            version = %desired,
            "daemon is ready"
        );
        Ok(ConnectionHandle::provisioned(
            convergence.endpoint,
            driver.kind(),
            &desired,
        ))
    }

    /// Reports the daemon state and the action a provisioning pass would take.
    ///
    /// Does not take the lock and never changes the daemon.
    ///
    /// # Errors
    ///
    /// Returns resolution, selection, or inspection failures.
    pub fn status(&self, cancel: &Cancellation) -> Result<DaemonStatus, ProvisionError> {
        let desired: DesiredVersion = match self.resolve()? {
            Resolution::External { host } => return Ok(DaemonStatus::External { host }),
            Resolution::Provision(version) => version,
        };
        let driver = self.select_backend(cancel)?;
        let observed = inspect_daemon(driver.as_ref(), cancel)?;
        let planned = plan(&observed, &desired);
        Ok(DaemonStatus::Managed {
            backend: driver.kind(),
            endpoint: driver.endpoint(),
            desired: desired.as_str().to_owned(),
            observed,
            planned,
        })
    }

    fn select_backend(&self, cancel: &Cancellation) -> Result<Box<dyn BackendDriver>, ProvisionError> {
        let context = BackendContext::new(self.settings.identity.clone(), Arc::clone(&self.runner));
        self.registry.select(&context, self.settings.backend, cancel)
    }
}
