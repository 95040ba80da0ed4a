//! Driver for Docker-compatible container engines.

use std::sync::Arc;

use kiln_config::BackendKind;
use tracing::{debug, info};

use crate::cancel::Cancellation;
use crate::command::{CommandError, CommandRunner, ExternalCommand};
use crate::error::{Operation, ProvisionError};
use crate::identity::DaemonIdentity;
use crate::version::DesiredVersion;

use super::build_context::stage_build_context;
use super::{BackendContext, BackendDriver, ObservedState};

/// Tracing target for container engine operations.
const CONTAINER_TARGET: &str = "kiln_provision::backend::container";

/// Go template emitting `<image>;<running>;<host-network>`.
const INSPECT_FORMAT: &str = concat!(
    "{{.Config.Image}};{{.State.Running}};",
    r#"{{if index .NetworkSettings.Networks "host"}}{{"true"}}{{else}}{{"false"}}{{end}}"#,
);

/// Lowercased fragments an engine prints when the container does not exist.
const ABSENCE_MARKERS: &[&str] = &["no such object", "no such container"];

/// Container engines sharing the Docker CLI surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineFlavor {
    /// The `docker` CLI.
    Docker,
    /// The `podman` CLI.
    Podman,
}

impl EngineFlavor {
    /// CLI program name.
    #[must_use]
    pub const fn program(self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }

    /// Endpoint scheme for daemons hosted by this engine.
    #[must_use]
    pub const fn scheme(self) -> &'static str {
        match self {
            Self::Docker => "docker-container",
            Self::Podman => "podman-container",
        }
    }

    /// Backend kind reported by the driver.
    #[must_use]
    pub const fn kind(self) -> BackendKind {
        match self {
            Self::Docker => BackendKind::Docker,
            Self::Podman => BackendKind::Podman,
        }
    }

    /// Output fragment signalling a name clash with a concurrent creation.
    ///
    /// This is a substring heuristic over human-readable engine output and
    /// only recognises the phrasing the supported engine versions use.
    const fn conflict_marker(self) -> &'static str {
        match self {
            Self::Docker => "Error response from daemon: Conflict.",
            Self::Podman => "is already in use",
        }
    }
}

/// Runs the daemon as a privileged container with a persistent state volume.
pub struct ContainerEngineDriver {
    flavor: EngineFlavor,
    identity: DaemonIdentity,
    runner: Arc<dyn CommandRunner>,
}

impl ContainerEngineDriver {
    /// Creates a driver for `flavor` from the shared backend context.
    #[must_use]
    pub fn new(flavor: EngineFlavor, context: &BackendContext) -> Self {
        Self {
            flavor,
            identity: context.identity.clone(),
            runner: Arc::clone(&context.runner),
        }
    }

    fn command(&self) -> ExternalCommand {
        ExternalCommand::new(self.flavor.program())
    }

    fn run(
        &self,
        operation: Operation,
        command: &ExternalCommand,
        cancel: &Cancellation,
    ) -> Result<String, ProvisionError> {
        self.runner
            .run(command, cancel)
            .map_err(|error| self.command_failure(operation, error))
    }

    /// Runs `command`, classifying output carrying the conflict marker.
    fn run_detecting_conflict(
        &self,
        operation: Operation,
        command: &ExternalCommand,
        cancel: &Cancellation,
    ) -> Result<String, ProvisionError> {
        match self.runner.run(command, cancel) {
            Ok(output) => Ok(output),
            Err(error) => {
                if let Some(output) = error.output()
                    && output.contains(self.flavor.conflict_marker())
                {
                    return Err(ProvisionError::Conflict {
                        backend: self.flavor.kind(),
                        operation,
                        output: output.trim().to_owned(),
                    });
                }
                Err(self.command_failure(operation, error))
            }
        }
    }

    fn command_failure(&self, operation: Operation, error: CommandError) -> ProvisionError {
        match error {
            CommandError::Cancelled { .. } => ProvisionError::Cancelled {
                stage: "backend command",
            },
            source => ProvisionError::BackendOperation {
                backend: self.flavor.kind(),
                operation,
                source,
            },
        }
    }
}

impl BackendDriver for ContainerEngineDriver {
    fn kind(&self) -> BackendKind {
        self.flavor.kind()
    }

    fn check_available(&self, cancel: &Cancellation) -> Result<(), ProvisionError> {
        let command = self.command().arg("info");
        match self.runner.run(&command, cancel) {
            Ok(_) => Ok(()),
            Err(CommandError::Cancelled { .. }) => Err(ProvisionError::Cancelled {
                stage: "backend probe",
            }),
            Err(error) => Err(ProvisionError::BackendUnavailable {
                details: format!("{}: {error}", self.flavor.kind()),
            }),
        }
    }

    fn remove(&self, cancel: &Cancellation) -> Result<(), ProvisionError> {
        let command = self
            .command()
            .args(["rm", "-fv"])
            .arg(self.identity.container.as_str());
        match self.run(Operation::Remove, &command, cancel) {
            Ok(_) => Ok(()),
            Err(ProvisionError::BackendOperation { source, .. })
                if source.output().is_some_and(is_absence_output) =>
            {
                debug!(
                    target: CONTAINER_TARGET,
                    container = %self.identity.container,
                    "nothing to remove"
                );
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    fn install(
        &self,
        version: &DesiredVersion,
        cancel: &Cancellation,
    ) -> Result<(), ProvisionError> {
        let reference = self.identity.image_reference(version.as_str());
        let staged = stage_build_context()?;
        let context_dir = staged.path().to_string_lossy().into_owned();

        info!(
            target: CONTAINER_TARGET,
            backend = %self.flavor.kind(),
            image = %reference,
            "building daemon image"
        );
        let build = self
            .command()
            .args(["build", "-t"])
            .arg(reference.as_str())
            .arg(context_dir);
        self.run(Operation::Build, &build, cancel)?;
        drop(staged);

        info!(
            target: CONTAINER_TARGET,
            backend = %self.flavor.kind(),
            container = %self.identity.container,
            image = %reference,
            "launching daemon container"
        );
        let launch = self
            .command()
            .args(["run", "-d", "--restart", "always", "-v"])
            .arg(self.identity.volume_mount())
            .arg("--name")
            .arg(self.identity.container.as_str())
            .arg("--privileged")
            .arg(reference);
        self.run_detecting_conflict(Operation::Run, &launch, cancel)?;
        Ok(())
    }

    fn start(&self, cancel: &Cancellation) -> Result<(), ProvisionError> {
        info!(
            target: CONTAINER_TARGET,
            backend = %self.flavor.kind(),
            container = %self.identity.container,
            "starting daemon container"
        );
        let command = self
            .command()
            .arg("start")
            .arg(self.identity.container.as_str());
        self.run_detecting_conflict(Operation::Start, &command, cancel)?;
        Ok(())
    }

    fn inspect(&self, cancel: &Cancellation) -> Result<ObservedState, ProvisionError> {
        let command = self
            .command()
            .args(["inspect", "--format", INSPECT_FORMAT])
            .arg(self.identity.container.as_str());
        match self.run(Operation::Inspect, &command, cancel) {
            Ok(output) => parse_inspect_output(self.flavor.kind(), &output),
            Err(ProvisionError::BackendOperation { source, .. })
                if source.output().is_some_and(is_absence_output) =>
            {
                Ok(ObservedState::absent())
            }
            Err(error) => Err(error),
        }
    }

    fn ping(&self, cancel: &Cancellation) -> Result<(), ProvisionError> {
        let command = self
            .command()
            .arg("exec")
            .arg(self.identity.container.as_str())
            .args(["buildctl", "debug", "workers"]);
        self.run(Operation::Ping, &command, cancel).map(drop)
    }

    fn endpoint(&self) -> String {
        format!("{}://{}", self.flavor.scheme(), self.identity.container)
    }
}

fn is_absence_output(output: &str) -> bool {
    let lowered = output.to_lowercase();
    ABSENCE_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Parses `<image>;<running>;<host-network>` inspect output.
///
/// The version is the tag of the image reference. An image without a tag is
/// reported with no version so that it never matches a desired version.
///
/// # Errors
///
/// Returns [`ProvisionError::InspectParse`] when a field is missing or a flag
/// is not a boolean.
pub fn parse_inspect_output(
    backend: BackendKind,
    output: &str,
) -> Result<ObservedState, ProvisionError> {
    let parse_error = |reason: &str| ProvisionError::InspectParse {
        backend,
        output: output.to_owned(),
        reason: reason.to_owned(),
    };

    let line = output
        .lines()
        .map(str::trim)
        .find(|candidate| !candidate.is_empty())
        .ok_or_else(|| parse_error("output is empty"))?;

    let mut fields = line.split(';').map(str::trim);
    let (Some(image), Some(running), Some(host_network), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(parse_error("expected three ';'-separated fields"));
    };

    if image.is_empty() {
        return Err(parse_error("image reference is empty"));
    }
    let running = running
        .parse::<bool>()
        .map_err(|_| parse_error("running flag is not a boolean"))?;
    let host_network = host_network
        .parse::<bool>()
        .map_err(|_| parse_error("host network flag is not a boolean"))?;

    Ok(ObservedState {
        exists: true,
        version: image_tag(image).map(str::to_owned),
        running,
        host_network,
    })
}

/// Extracts the tag from an image reference such as `registry:5000/name:tag`.
#[must_use]
pub fn image_tag(reference: &str) -> Option<&str> {
    let without_digest = reference
        .split_once('@')
        .map_or(reference, |(name, _)| name);
    let last_segment = without_digest
        .rsplit_once('/')
        .map_or(without_digest, |(_, segment)| segment);
    last_segment
        .rsplit_once(':')
        .map(|(_, tag)| tag)
        .filter(|tag| !tag.is_empty())
}
