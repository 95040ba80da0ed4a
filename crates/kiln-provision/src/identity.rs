//! Names of the resources that make up one daemon installation.

use kiln_config::{DEFAULT_CONTAINER_NAME, DEFAULT_IMAGE_NAME, DEFAULT_VOLUME_NAME};

/// Directory inside the container where the daemon keeps its state.
pub const DEFAULT_STATE_DIR: &str = "/var/lib/buildkit";

/// Image, container and volume names of the managed daemon.
///
/// Built once from configuration and threaded through every component, so two
/// identities can coexist in one process (for example in tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonIdentity {
    /// Image repository, without a tag.
    pub image: String,
    /// Container name.
    pub container: String,
    /// Named volume mounted at [`DaemonIdentity::state_dir`].
    pub volume: String,
    /// Mount point of the state volume.
    pub state_dir: String,
}

impl Default for DaemonIdentity {
    fn default() -> Self {
        Self {
            image: String::from(DEFAULT_IMAGE_NAME),
            container: String::from(DEFAULT_CONTAINER_NAME),
            volume: String::from(DEFAULT_VOLUME_NAME),
            state_dir: String::from(DEFAULT_STATE_DIR),
        }
    }
}

impl DaemonIdentity {
    /// Fully qualified image reference for `version`.
    #[must_use]
    pub fn image_reference(&self, version: &str) -> String {
        format!("{}:{version}", self.image)
    }

    /// Volume mount argument in `<volume>:<state-dir>` form.
    #[must_use]
    pub fn volume_mount(&self) -> String {
        format!("{}:{}", self.volume, self.state_dir)
    }
}
