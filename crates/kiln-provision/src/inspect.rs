//! Single observation of the daemon through a backend.

use tracing::debug;

use crate::backend::{BackendDriver, ObservedState};
use crate::cancel::Cancellation;
use crate::error::ProvisionError;

/// Tracing target for state inspection.
const INSPECT_TARGET: &str = "kiln_provision::inspect";

/// Observes the daemon once.
///
/// A missing daemon is an [`ObservedState::absent`] value rather than an
/// error.
///
/// # Errors
///
/// Propagates [`ProvisionError::InspectParse`] and backend failures from the
/// driver, and [`ProvisionError::Cancelled`] if the pass was cancelled.
pub fn inspect_daemon(
    driver: &dyn BackendDriver,
    cancel: &Cancellation,
) -> Result<ObservedState, ProvisionError> {
    cancel.check("inspect")?;
    let state = driver.inspect(cancel)?;
    debug!(
        target: INSPECT_TARGET,
        backend = %driver.kind(),
        exists = state.exists,
        version = state.version.as_deref().unwrap_or("-"),
        running = state.running,
        host_network = state.host_network,
        "observed daemon state"
    );
    Ok(state)
}
