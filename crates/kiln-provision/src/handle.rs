//! Connection details handed back to the caller.

use kiln_config::BackendKind;
use serde::Serialize;

use crate::version::DesiredVersion;

/// How the daemon behind a handle came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleOrigin {
    /// Provisioned (or confirmed) by this process.
    Provisioned,
    /// Supplied by the caller through the daemon host override.
    External,
}

/// Address of a ready daemon plus handshake metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionHandle {
    endpoint: String,
    origin: HandleOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    backend: Option<BackendKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

impl ConnectionHandle {
    /// Handle for a daemon managed by a backend.
    #[must_use]
    pub fn provisioned(endpoint: String, backend: BackendKind, version: &DesiredVersion) -> Self {
        Self {
            endpoint,
            origin: HandleOrigin::Provisioned,
            backend: Some(backend),
            version: Some(version.as_str().to_owned()),
        }
    }

    /// Handle for an externally supplied address, kept verbatim.
    #[must_use]
    pub const fn external(host: String) -> Self {
        Self {
            endpoint: host,
            origin: HandleOrigin::External,
            backend: None,
            version: None,
        }
    }

    /// Address clients connect to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Where the daemon came from.
    #[must_use]
    pub const fn origin(&self) -> HandleOrigin {
        self.origin
    }

    /// Backend hosting the daemon, when provisioned.
    #[must_use]
    pub const fn backend(&self) -> Option<BackendKind> {
        self.backend
    }

    /// Daemon version, when provisioned.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}
