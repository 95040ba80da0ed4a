//! Registry of backend constructors.
//!
//! The built-in registry is a lazily initialised static populated in a fixed
//! order (Docker, then Podman) and never mutated afterwards. Embedders and
//! tests assemble their own [`BackendRegistry`] explicitly before use.

use std::fmt;
use std::sync::Arc;

use kiln_config::BackendKind;
use once_cell::sync::Lazy;
use tracing::{debug, info};

use crate::backend::{BackendContext, BackendDriver, ContainerEngineDriver, EngineFlavor};
use crate::cancel::Cancellation;
use crate::error::ProvisionError;

/// Tracing target for backend selection.
const REGISTRY_TARGET: &str = "kiln_provision::registry";

/// Builds a driver from the shared backend context.
pub type BackendConstructor =
    Arc<dyn Fn(&BackendContext) -> Box<dyn BackendDriver> + Send + Sync>;

static BUILTIN: Lazy<BackendRegistry> = Lazy::new(|| BackendRegistry {
    registrations: vec![
        container_registration(EngineFlavor::Docker),
        container_registration(EngineFlavor::Podman),
    ],
});

fn container_registration(flavor: EngineFlavor) -> BackendRegistration {
    BackendRegistration::new(flavor.kind(), move |context| {
        Box::new(ContainerEngineDriver::new(flavor, context))
    })
}

/// A backend kind paired with its constructor.
#[derive(Clone)]
pub struct BackendRegistration {
    kind: BackendKind,
    constructor: BackendConstructor,
}

impl BackendRegistration {
    /// Pairs `kind` with `constructor`.
    pub fn new<F>(kind: BackendKind, constructor: F) -> Self
    where
        F: Fn(&BackendContext) -> Box<dyn BackendDriver> + Send + Sync + 'static,
    {
        Self {
            kind,
            constructor: Arc::new(constructor),
        }
    }

    /// Kind this registration constructs.
    #[must_use]
    pub const fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Constructs a driver.
    #[must_use]
    pub fn construct(&self, context: &BackendContext) -> Box<dyn BackendDriver> {
        (self.constructor)(context)
    }
}

impl fmt::Debug for BackendRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistration")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Ordered set of backend registrations.
#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    registrations: Vec<BackendRegistration>,
}

impl BackendRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in container engines.
    #[must_use]
    pub fn builtin() -> &'static Self {
        &BUILTIN
    }

    /// Appends a registration.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::DuplicateBackend`] if the kind is already
    /// registered.
    pub fn register(&mut self, registration: BackendRegistration) -> Result<(), ProvisionError> {
        let kind = registration.kind();
        if self.registrations.iter().any(|existing| existing.kind() == kind) {
            return Err(ProvisionError::DuplicateBackend { kind });
        }
        self.registrations.push(registration);
        Ok(())
    }

    /// Registered kinds in probe order.
    #[must_use]
    pub fn kinds(&self) -> Vec<BackendKind> {
        self.registrations
            .iter()
            .map(BackendRegistration::kind)
            .collect()
    }

    /// Returns the first backend whose availability probe succeeds.
    ///
    /// When `preferred` is set only that kind is considered.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::BackendNotRegistered`] for an unknown
    /// preferred kind, [`ProvisionError::BackendUnavailable`] listing every
    /// probe failure when no backend is usable, and
    /// [`ProvisionError::Cancelled`] if a probe was cancelled.
    pub fn select(
        &self,
        context: &BackendContext,
        preferred: Option<BackendKind>,
        cancel: &Cancellation,
    ) -> Result<Box<dyn BackendDriver>, ProvisionError> {
        let candidates: Vec<&BackendRegistration> = match preferred {
            Some(kind) => {
                let registration = self
                    .registrations
                    .iter()
                    .find(|registration| registration.kind() == kind)
                    .ok_or(ProvisionError::BackendNotRegistered { kind })?;
                vec![registration]
            }
            None => self.registrations.iter().collect(),
        };

        let mut failures = Vec::new();
        for registration in candidates {
            cancel.check("backend selection")?;
            let driver = registration.construct(context);
            match driver.check_available(cancel) {
                Ok(()) => {
                    info!(
                        target: REGISTRY_TARGET,
                        backend = %registration.kind(),
                        "selected backend"
                    );
                    return Ok(driver);
                }
                Err(error) if error.is_cancelled() => return Err(error),
                Err(ProvisionError::BackendUnavailable { details }) => {
                    debug!(target: REGISTRY_TARGET, %details, "backend unavailable");
                    failures.push(details);
                }
                Err(error) => {
                    debug!(target: REGISTRY_TARGET, %error, "backend probe failed");
                    failures.push(format!("{}: {error}", registration.kind()));
                }
            }
        }

        if failures.is_empty() {
            failures.push(String::from("no backends are registered"));
        }
        Err(ProvisionError::BackendUnavailable {
            details: failures.join("; "),
        })
    }
}
