//! Bounded readiness polling after the daemon is installed or started.

use std::time::Duration;

use tracing::{debug, warn};

use crate::backend::BackendDriver;
use crate::cancel::Cancellation;
use crate::error::ProvisionError;

/// Tracing target for readiness polling.
const READINESS_TARGET: &str = "kiln_provision::readiness";

/// Stage name reported when readiness polling is cancelled.
const READINESS_STAGE: &str = "readiness wait";

/// Attempt count and spacing for readiness probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessBudget {
    /// Maximum number of probes.
    pub attempts: u32,
    /// Pause after each failed probe except the last.
    pub interval: Duration,
}

impl Default for ReadinessBudget {
    fn default() -> Self {
        Self {
            attempts: 100,
            interval: Duration::from_millis(100),
        }
    }
}

/// Pings the daemon until it answers or the budget runs out.
///
/// Returns the number of probes issued, counting the successful one.
///
/// # Errors
///
/// Returns [`ProvisionError::DaemonNotResponding`] once every attempt failed
/// and [`ProvisionError::Cancelled`] if the pass is cancelled.
pub fn wait_ready(
    driver: &dyn BackendDriver,
    budget: ReadinessBudget,
    cancel: &Cancellation,
) -> Result<u32, ProvisionError> {
    let endpoint = driver.endpoint();
    let mut last_error = String::from("no probe was issued");

    for attempt in 1..=budget.attempts {
        cancel.check(READINESS_STAGE)?;
        match driver.ping(cancel) {
            Ok(()) => {
                debug!(
                    target: READINESS_TARGET,
                    endpoint = %endpoint,
                    attempt,
                    "daemon is ready"
                );
                return Ok(attempt);
            }
            Err(error) if error.is_cancelled() => return Err(error),
            Err(error) => last_error = error.to_string(),
        }
        if attempt < budget.attempts {
            cancel.sleep(budget.interval, READINESS_STAGE)?;
        }
    }

    warn!(
        target: READINESS_TARGET,
        endpoint = %endpoint,
        attempts = budget.attempts,
        last_error = %last_error,
        "daemon did not become ready"
    );
    Err(ProvisionError::DaemonNotResponding {
        endpoint,
        attempts: budget.attempts,
        last_error,
    })
}
