//! Cross-process critical section around daemon reconciliation.
//!
//! The lock is an advisory exclusive lock on a well-known file. Waiters poll
//! with `try_lock_exclusive` rather than blocking so that the wait is bounded
//! and cancellable. The file is never deleted; releasing only drops the lock.

use std::fs::{DirBuilder, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::{debug, info, warn};

use crate::cancel::Cancellation;
use crate::error::ProvisionError;

/// Tracing target for lock operations.
const LOCK_TARGET: &str = "kiln_provision::lock";

/// Stage name reported when the lock wait is cancelled.
const LOCK_STAGE: &str = "lock wait";

/// Default upper bound on the lock wait.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(600);

/// Default spacing between lock attempts.
pub const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bounds on the lock wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Give up once this much time has passed.
    pub timeout: Duration,
    /// Pause between attempts.
    pub poll_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_LOCK_TIMEOUT,
            poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
        }
    }
}

/// Exclusive possession of the provisioning lock.
///
/// Dropping the guard releases the lock on every exit path, unwinding
/// included.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    file: Option<File>,
}

impl LockGuard {
    /// Acquires the lock at `path`, polling until `options.timeout` elapses.
    ///
    /// Missing parent directories are created first.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::LockTimeout`] when the lock stays held for
    /// the whole timeout, [`ProvisionError::LockIo`] when the file cannot be
    /// created or locked, and [`ProvisionError::Cancelled`] when `cancel`
    /// fires while waiting.
    pub fn acquire(
        path: &Path,
        options: LockOptions,
        cancel: &Cancellation,
    ) -> Result<Self, ProvisionError> {
        let file = open_lock_file(path)?;
        let started = Instant::now();
        let mut announced = false;

        loop {
            cancel.check(LOCK_STAGE)?;
            match file.try_lock_exclusive() {
                Ok(()) => {
                    info!(
                        target: LOCK_TARGET,
                        file = %path.display(),
                        waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                        "provisioning lock acquired"
                    );
                    return Ok(Self {
                        path: path.to_path_buf(),
                        file: Some(file),
                    });
                }
                Err(error) if is_contended(&error) => {}
                Err(source) => {
                    return Err(ProvisionError::LockIo {
                        path: path.to_path_buf(),
                        source: Arc::new(source),
                    });
                }
            }

            let waited = started.elapsed();
            if waited >= options.timeout {
                warn!(
                    target: LOCK_TARGET,
                    file = %path.display(),
                    ?waited,
                    "gave up waiting for provisioning lock"
                );
                return Err(ProvisionError::LockTimeout {
                    path: path.to_path_buf(),
                    waited,
                });
            }
            if !announced {
                debug!(
                    target: LOCK_TARGET,
                    file = %path.display(),
                    "provisioning lock is held elsewhere, waiting"
                );
                announced = true;
            }
            let remaining = options.timeout.saturating_sub(waited);
            cancel.sleep(options.poll_interval.min(remaining), LOCK_STAGE)?;
        }
    }

    /// Lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the lock now instead of at drop.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::LockIo`] if the unlock call fails.
    pub fn release(mut self) -> Result<(), ProvisionError> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        FileExt::unlock(&file).map_err(|source| ProvisionError::LockIo {
            path: self.path.clone(),
            source: Arc::new(source),
        })?;
        debug!(target: LOCK_TARGET, file = %self.path.display(), "provisioning lock released");
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        match FileExt::unlock(&file) {
            Ok(()) => {
                debug!(target: LOCK_TARGET, file = %self.path.display(), "provisioning lock released");
            }
            Err(error) => {
                // Closing the descriptor below still drops the lock.
                warn!(
                    target: LOCK_TARGET,
                    file = %self.path.display(),
                    %error,
                    "failed to unlock provisioning lock"
                );
            }
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File, ProvisionError> {
    let lock_io = |source: io::Error| ProvisionError::LockIo {
        path: path.to_path_buf(),
        source: Arc::new(source),
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o755);
        }
        builder.create(parent).map_err(lock_io)?;
    }

    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(lock_io)
}

fn is_contended(error: &io::Error) -> bool {
    if error.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    error.raw_os_error().is_some()
        && error.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests;
