//! Command-line runtime for kiln.
//!
//! Splits configuration flags from command tokens, loads configuration,
//! installs logging, and dispatches to the provisioning core. The runtime
//! writes through caller-supplied streams so tests can drive it without a
//! subprocess.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use kiln_config::Config;
use kiln_provision::{
    BuildInfo, Cancellation, ClientFactory, ProvisionSettings, Resolution, VersionResolver,
};

mod cli;
mod config;
mod errors;
mod output;
mod telemetry;

use cli::{Cli, CliCommand, DaemonAction, OutputFormat};
use config::{ConfigArgumentSplit, ConfigLoader, OrthoConfigLoader, split_config_arguments};
pub(crate) use errors::AppError;
use output::{VersionReport, write_handle, write_status, write_version};

/// CLI flags recognised by the configuration loader.
///
/// Must list every field of [`kiln_config::Config`] exposed as a flag.
const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--daemon-host",
    "--daemon-version",
    "--backend",
    "--image-name",
    "--container-name",
    "--volume-name",
    "--lock-path",
    "--lock-timeout-secs",
    "--ready-attempts",
    "--ready-interval-ms",
    "--log-filter",
    "--log-format",
];

/// Source revision stamped in by the build script, if one was available.
const BUILD_REVISION: Option<&str> = option_env!("KILN_BUILD_REVISION");

/// Runs the CLI using the provided arguments and output streams.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with_loader(
        args,
        stdout,
        stderr,
        &OrthoConfigLoader,
        BuildInfo::new(BUILD_REVISION),
    )
}

fn run_with_loader<I, W, E, L>(
    args: I,
    stdout: &mut W,
    stderr: &mut E,
    loader: &L,
    build: BuildInfo,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    match execute(args, stdout, loader, build) {
        Ok(()) => ExitCode::SUCCESS,
        // Help and version requests are not failures.
        Err(AppError::CliUsage(error)) if !error.use_stderr() => {
            let _ = write!(stdout, "{error}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            let _ = writeln!(stderr, "kiln: {error}");
            ExitCode::FAILURE
        }
    }
}

fn execute<I, W, L>(args: I, stdout: &mut W, loader: &L, build: BuildInfo) -> Result<(), AppError>
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    L: ConfigLoader,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let split = split_config_arguments(&args);
    let cli = Cli::try_parse_from(prepare_cli_arguments(&args, &split))
        .map_err(AppError::CliUsage)?;
    let config = loader.load(&split.config_arguments)?;
    telemetry::initialise(&config)?;

    match cli.command {
        CliCommand::Version => {
            let report = VersionReport {
                version: env!("CARGO_PKG_VERSION"),
                revision: build.revision(),
                daemon_version: expected_daemon_version(&config, &build),
            };
            write_version(stdout, cli.output, &report)
        }
        CliCommand::Daemon { action } => run_daemon_action(action, cli.output, &config, build, stdout),
    }
}

fn run_daemon_action<W: Write>(
    action: DaemonAction,
    format: OutputFormat,
    config: &Config,
    build: BuildInfo,
    stdout: &mut W,
) -> Result<(), AppError> {
    let factory = ClientFactory::new(ProvisionSettings::from_config(config)?, build);
    let cancel = Cancellation::new();
    match action {
        DaemonAction::Ensure => write_handle(stdout, format, &factory.ensure_daemon(&cancel)?),
        DaemonAction::Status => write_status(stdout, format, &factory.status(&cancel)?),
    }
}

/// The version `daemon ensure` would provision, ignoring any host override.
fn expected_daemon_version(config: &Config, build: &BuildInfo) -> Option<String> {
    let resolution = VersionResolver::new(build.clone())
        .with_pinned_version(config.daemon_version().map(str::to_owned))
        .resolve();
    match resolution {
        Ok(Resolution::Provision(version)) => Some(version.as_str().to_owned()),
        Ok(Resolution::External { .. }) | Err(_) => None,
    }
}

fn prepare_cli_arguments(args: &[OsString], split: &ConfigArgumentSplit) -> Vec<OsString> {
    args.first()
        .into_iter()
        .chain(args.get(split.command_start..).unwrap_or_default())
        .cloned()
        .collect()
}
