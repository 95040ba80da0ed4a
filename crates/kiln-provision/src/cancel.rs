//! Cooperative cancellation shared across one provisioning pass.
//!
//! Every blocking wait in the crate (lock polling, readiness sleeps and child
//! process supervision) checks a [`Cancellation`] between slices so that a
//! caller can abandon the pass from another thread or by deadline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::ProvisionError;

/// Upper bound on a single uninterrupted sleep.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Cancellation token with an optional deadline.
///
/// Clones share the same flag, so cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// Creates a token that only fires when [`Cancellation::cancel`] is called.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a clone of this token that also fires at `deadline`.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let effective = match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        };
        Self {
            flag: Arc::clone(&self.flag),
            deadline: Some(effective),
        }
    }

    /// Returns a clone of this token that fires after `timeout`.
    ///
    /// A timeout too large to represent adds no deadline.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Instant::now()
            .checked_add(timeout)
            .map_or_else(|| self.clone(), |deadline| self.with_deadline(deadline))
    }

    /// Requests cancellation of every clone of this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Reports whether cancellation was requested or the deadline passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Fails with [`ProvisionError::Cancelled`] naming `stage` once cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Cancelled`] when the token has fired.
    pub fn check(&self, stage: &'static str) -> Result<(), ProvisionError> {
        if self.is_cancelled() {
            return Err(ProvisionError::Cancelled { stage });
        }
        Ok(())
    }

    /// Sleeps for `duration`, waking early if the token fires.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Cancelled`] if the token fires before or
    /// during the sleep.
    pub fn sleep(&self, duration: Duration, stage: &'static str) -> Result<(), ProvisionError> {
        let started = Instant::now();
        loop {
            self.check(stage)?;
            let elapsed = started.elapsed();
            if elapsed >= duration {
                return Ok(());
            }
            let remaining = duration.saturating_sub(elapsed);
            thread::sleep(remaining.min(SLEEP_SLICE));
        }
    }
}
