use camino::Utf8PathBuf;

use crate::logging::LogFormat;

/// Image repository used for the daemon image.
pub const DEFAULT_IMAGE_NAME: &str = "kiln-buildkitd";

/// Container name used for the daemon.
pub const DEFAULT_CONTAINER_NAME: &str = "kiln-buildkitd";

/// Named volume holding the daemon's state directory.
pub const DEFAULT_VOLUME_NAME: &str = "kiln-buildkitd";

/// File name of the provisioning lock.
pub const LOCK_FILE_NAME: &str = ".kiln-buildkitd.lock";

/// Long enough to ride out a slow first-time image build by another process.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 600;

/// Readiness probes issued after the daemon is (re)started.
pub const DEFAULT_READY_ATTEMPTS: u32 = 100;

/// Spacing between readiness probes, in milliseconds.
pub const DEFAULT_READY_INTERVAL_MS: u64 = 100;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression used by the binaries.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the binaries.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

/// Computes `~/.config/kiln/.kiln-buildkitd.lock`.
///
/// Returns `None` when the home directory is unknown or not valid UTF-8.
#[must_use]
pub fn default_lock_path() -> Option<Utf8PathBuf> {
    let home = dirs::home_dir()?;
    let mut path = Utf8PathBuf::from_path_buf(home).ok()?;
    path.push(".config");
    path.push("kiln");
    path.push(LOCK_FILE_NAME);
    Some(path)
}
