use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Container runtimes able to host the build daemon.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum BackendKind {
    /// Docker engine driven through the `docker` CLI.
    Docker,
    /// Podman driven through the `podman` CLI.
    Podman,
}

/// Errors encountered while parsing a [`BackendKind`] from text.
pub type BackendKindParseError = strum::ParseError;
