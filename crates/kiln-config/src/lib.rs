//! Shared configuration for the Kiln provisioning toolchain.
//!
//! Configuration is layered by `ortho_config`: built-in defaults, then an
//! optional TOML file (`--config-path` or `KILN_CONFIG_PATH`), then `KILN_*`
//! environment variables, and finally command-line flags. The resulting
//! [`Config`] is a plain value that the provisioning core turns into its own
//! settings object once per invocation.

use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod backend;
mod defaults;
mod logging;

pub use backend::{BackendKind, BackendKindParseError};
pub use defaults::{
    DEFAULT_CONTAINER_NAME, DEFAULT_IMAGE_NAME, DEFAULT_LOCK_TIMEOUT_SECS, DEFAULT_LOG_FILTER,
    DEFAULT_READY_ATTEMPTS, DEFAULT_READY_INTERVAL_MS, DEFAULT_VOLUME_NAME, LOCK_FILE_NAME,
    default_lock_path, default_log_filter, default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Runtime configuration shared by the CLI and the provisioning core.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "KILN")]
pub struct Config {
    /// Address of an already running daemon. When set, provisioning is
    /// skipped entirely and the address is handed out verbatim.
    pub daemon_host: Option<String>,
    /// Pins the daemon version instead of deriving it from build metadata.
    pub daemon_version: Option<String>,
    /// Forces a specific backend instead of probing the registry in order.
    pub backend: Option<BackendKind>,
    /// Image repository used when building the daemon image.
    #[ortho_config(default = String::from(DEFAULT_IMAGE_NAME))]
    pub image_name: String,
    /// Name of the daemon container.
    #[ortho_config(default = String::from(DEFAULT_CONTAINER_NAME))]
    pub container_name: String,
    /// Named volume holding the daemon state.
    #[ortho_config(default = String::from(DEFAULT_VOLUME_NAME))]
    pub volume_name: String,
    /// Overrides the provisioning lock file location.
    pub lock_path: Option<Utf8PathBuf>,
    /// Upper bound on the wait for the provisioning lock.
    #[ortho_config(default = DEFAULT_LOCK_TIMEOUT_SECS)]
    pub lock_timeout_secs: u64,
    /// Number of readiness probes issued after a start or install.
    #[ortho_config(default = DEFAULT_READY_ATTEMPTS)]
    pub ready_attempts: u32,
    /// Spacing between readiness probes.
    #[ortho_config(default = DEFAULT_READY_INTERVAL_MS)]
    pub ready_interval_ms: u64,
    /// Tracing filter expression.
    #[ortho_config(default = String::from(DEFAULT_LOG_FILTER))]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon_host: None,
            daemon_version: None,
            backend: None,
            image_name: String::from(DEFAULT_IMAGE_NAME),
            container_name: String::from(DEFAULT_CONTAINER_NAME),
            volume_name: String::from(DEFAULT_VOLUME_NAME),
            lock_path: None,
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
            ready_attempts: DEFAULT_READY_ATTEMPTS,
            ready_interval_ms: DEFAULT_READY_INTERVAL_MS,
            log_filter: String::from(DEFAULT_LOG_FILTER),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Loads configuration from the process arguments and environment.
    pub fn load_from_process() -> Result<Self, Arc<OrthoError>> {
        Self::load_from_args(std::env::args_os())
    }

    /// Loads configuration from an explicit argument list.
    ///
    /// The first argument is the program name, as with `std::env::args_os`.
    pub fn load_from_args(
        args: impl IntoIterator<Item = OsString>,
    ) -> Result<Self, Arc<OrthoError>> {
        Self::load_from_iter(args)
    }

    /// Returns the daemon host override, ignoring blank values.
    #[must_use]
    pub fn daemon_host(&self) -> Option<&str> {
        non_blank(self.daemon_host.as_deref())
    }

    /// Returns the pinned daemon version, ignoring blank values.
    #[must_use]
    pub fn daemon_version(&self) -> Option<&str> {
        non_blank(self.daemon_version.as_deref())
    }

    /// Returns the forced backend, if any.
    #[must_use]
    pub const fn backend(&self) -> Option<BackendKind> {
        self.backend
    }

    /// Resolves the lock file path, falling back to the user config directory.
    pub fn resolved_lock_path(&self) -> Result<Utf8PathBuf, ConfigPathError> {
        if let Some(path) = &self.lock_path {
            return Ok(path.clone());
        }
        default_lock_path().ok_or(ConfigPathError::MissingHomeDirectory)
    }

    /// Lock acquisition timeout as a [`Duration`].
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Readiness probe spacing as a [`Duration`].
    #[must_use]
    pub const fn ready_interval(&self) -> Duration {
        Duration::from_millis(self.ready_interval_ms)
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Errors raised while deriving filesystem locations from the configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigPathError {
    /// No home directory could be determined for the default lock path.
    #[error("cannot determine the home directory; set KILN_LOCK_PATH explicitly")]
    MissingHomeDirectory,
}
