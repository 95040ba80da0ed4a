//! Provisioning settings derived from the shared configuration.

use std::path::PathBuf;

use kiln_config::{BackendKind, Config};

use crate::error::ProvisionError;
use crate::identity::{DEFAULT_STATE_DIR, DaemonIdentity};
use crate::lock::{DEFAULT_LOCK_POLL_INTERVAL, LockOptions};
use crate::readiness::ReadinessBudget;

/// Everything one provisioning pass needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionSettings {
    /// Names of the managed resources.
    pub identity: DaemonIdentity,
    /// Location of the provisioning lock file.
    pub lock_path: PathBuf,
    /// Bounds on the lock wait.
    pub lock: LockOptions,
    /// Readiness probe budget.
    pub readiness: ReadinessBudget,
    /// Existing daemon address that bypasses provisioning.
    pub daemon_host: Option<String>,
    /// Daemon version pin.
    pub pinned_version: Option<String>,
    /// Backend to use instead of probing the registry in order.
    pub backend: Option<BackendKind>,
}

impl ProvisionSettings {
    /// Default settings with the lock at `lock_path`.
    #[must_use]
    pub fn new(lock_path: impl Into<PathBuf>) -> Self {
        Self {
            identity: DaemonIdentity::default(),
            lock_path: lock_path.into(),
            lock: LockOptions::default(),
            readiness: ReadinessBudget::default(),
            daemon_host: None,
            pinned_version: None,
            backend: None,
        }
    }

    /// Builds settings from a loaded [`Config`].
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Settings`] when a resource name is blank,
    /// the readiness budget is empty, or the lock path cannot be determined.
    pub fn from_config(config: &Config) -> Result<Self, ProvisionError> {
        let identity = DaemonIdentity {
            image: required("image_name", &config.image_name)?,
            container: required("container_name", &config.container_name)?,
            volume: required("volume_name", &config.volume_name)?,
            state_dir: String::from(DEFAULT_STATE_DIR),
        };
        if config.ready_attempts == 0 {
            return Err(ProvisionError::Settings {
                message: String::from("ready_attempts must be at least 1"),
            });
        }
        let lock_path = config
            .resolved_lock_path()
            .map_err(|error| ProvisionError::Settings {
                message: error.to_string(),
            })?;

        Ok(Self {
            identity,
            lock_path: lock_path.into_std_path_buf(),
            lock: LockOptions {
                timeout: config.lock_timeout(),
                poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
            },
            readiness: ReadinessBudget {
                attempts: config.ready_attempts,
                interval: config.ready_interval(),
            },
            daemon_host: config.daemon_host().map(str::to_owned),
            pinned_version: config.daemon_version().map(str::to_owned),
            backend: config.backend(),
        })
    }
}

fn required(field: &str, value: &str) -> Result<String, ProvisionError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ProvisionError::Settings {
            message: format!("{field} must not be empty"),
        });
    }
    Ok(trimmed.to_owned())
}
