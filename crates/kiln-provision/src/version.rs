//! Resolution of the daemon version a client expects.
//!
//! The desired version is derived fresh on every call, never cached, and never
//! requires network access: an explicit daemon address short-circuits
//! provisioning, a configured pin is used verbatim, and otherwise the calling
//! binary's embedded revision is shortened to [`SHORT_REVISION_LEN`]
//! characters.

use std::fmt;

use tracing::debug;

use crate::error::ProvisionError;

/// Tracing target for version resolution.
const VERSION_TARGET: &str = "kiln_provision::version";

/// Length of the revision prefix used as the daemon version.
pub const SHORT_REVISION_LEN: usize = 9;

/// Opaque daemon version token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DesiredVersion(String);

impl DesiredVersion {
    /// Wraps a version string.
    #[must_use]
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    /// The version as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compares against a version reported by a backend.
    #[must_use]
    pub fn matches(&self, observed: Option<&str>) -> bool {
        observed == Some(self.0.as_str())
    }
}

impl fmt::Display for DesiredVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build metadata embedded in the calling binary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildInfo {
    revision: Option<String>,
}

impl BuildInfo {
    /// Build info carrying `revision`, or none when it is absent or blank.
    #[must_use]
    pub fn new(revision: Option<&str>) -> Self {
        Self {
            revision: revision
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_owned),
        }
    }

    /// Build info with no revision.
    #[must_use]
    pub const fn unknown() -> Self {
        Self { revision: None }
    }

    /// Full embedded revision.
    #[must_use]
    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }
}

/// Outcome of version resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// An existing daemon address that bypasses provisioning.
    External {
        /// Address, exactly as configured.
        host: String,
    },
    /// A daemon of this version must be provisioned.
    Provision(DesiredVersion),
}

/// Derives the desired daemon version.
#[derive(Debug, Clone, Default)]
pub struct VersionResolver {
    host_override: Option<String>,
    pinned: Option<String>,
    build: BuildInfo,
}

impl VersionResolver {
    /// Resolver backed only by the embedded build metadata.
    #[must_use]
    pub fn new(build: BuildInfo) -> Self {
        Self {
            host_override: None,
            pinned: None,
            build,
        }
    }

    /// Sets the daemon address override.
    #[must_use]
    pub fn with_host_override(mut self, host: Option<String>) -> Self {
        self.host_override = host;
        self
    }

    /// Sets the version pin. Blank pins are ignored.
    #[must_use]
    pub fn with_pinned_version(mut self, pinned: Option<String>) -> Self {
        self.pinned = pinned.filter(|value| !value.trim().is_empty());
        self
    }

    /// Resolves the desired version. The first applicable source wins.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NoBuildInfo`] when no override, pin, or
    /// embedded revision is available.
    pub fn resolve(&self) -> Result<Resolution, ProvisionError> {
        if let Some(host) = &self.host_override {
            debug!(target: VERSION_TARGET, host = %host, "using external daemon address");
            return Ok(Resolution::External { host: host.clone() });
        }
        if let Some(pinned) = &self.pinned {
            debug!(target: VERSION_TARGET, version = %pinned, "using pinned daemon version");
            return Ok(Resolution::Provision(DesiredVersion::new(pinned.trim())));
        }
        let revision = self.build.revision().ok_or(ProvisionError::NoBuildInfo)?;
        let short: String = revision.chars().take(SHORT_REVISION_LEN).collect();
        debug!(target: VERSION_TARGET, version = %short, "derived daemon version from revision");
        Ok(Resolution::Provision(DesiredVersion::new(short)))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("0123456789abcdef0123456789abcdef01234567", "012345678")]
    #[case("abc1234", "abc1234")]
    #[case("0123456789", "012345678")]
    fn revision_is_shortened(#[case] revision: &str, #[case] expected: &str) {
        let resolver = VersionResolver::new(BuildInfo::new(Some(revision)));
        assert_eq!(
            resolver.resolve().expect("resolves"),
            Resolution::Provision(DesiredVersion::new(expected))
        );
    }

    #[rstest]
    #[case(None)]
    #[case(Some(""))]
    #[case(Some("  "))]
    fn missing_revision_is_an_error(#[case] revision: Option<&str>) {
        let resolver = VersionResolver::new(BuildInfo::new(revision));
        assert!(matches!(resolver.resolve(), Err(ProvisionError::NoBuildInfo)));
    }

    #[test]
    fn host_override_wins_over_everything() {
        let resolver = VersionResolver::new(BuildInfo::unknown())
            .with_host_override(Some(String::from("tcp://10.0.0.5:1234")))
            .with_pinned_version(Some(String::from("pinned")));
        assert_eq!(
            resolver.resolve().expect("resolves"),
            Resolution::External {
                host: String::from("tcp://10.0.0.5:1234")
            }
        );
    }

    #[test]
    fn pin_wins_over_revision() {
        let resolver = VersionResolver::new(BuildInfo::new(Some("0123456789abcdef")))
            .with_pinned_version(Some(String::from("v0.12.5")));
        assert_eq!(
            resolver.resolve().expect("resolves"),
            Resolution::Provision(DesiredVersion::new("v0.12.5"))
        );
    }

    #[test]
    fn blank_pin_falls_back_to_revision() {
        let resolver = VersionResolver::new(BuildInfo::new(Some("0123456789abcdef")))
            .with_pinned_version(Some(String::from("   ")));
        assert_eq!(
            resolver.resolve().expect("resolves"),
            Resolution::Provision(DesiredVersion::new("012345678"))
        );
    }

    #[test]
    fn resolution_is_deterministic() {
        let resolver = VersionResolver::new(BuildInfo::new(Some("fedcba9876543210")));
        assert_eq!(
            resolver.resolve().expect("first"),
            resolver.resolve().expect("second")
        );
    }

    #[test]
    fn desired_version_matches_exact_text() {
        let version = DesiredVersion::new("012345678");
        assert!(version.matches(Some("012345678")));
        assert!(!version.matches(Some("012345679")));
        assert!(!version.matches(None));
    }
}
