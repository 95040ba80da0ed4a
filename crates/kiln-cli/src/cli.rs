//! CLI argument definitions for kiln.
//!
//! Shared by the runtime parser and the build script that renders the manual
//! page, so this module depends on nothing but `clap`.

use clap::{Parser, Subcommand, ValueEnum};

/// Output format for command results.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Plain text suited to shell substitution.
    #[default]
    Human,
    /// A single JSON document on stdout.
    Json,
}

/// Provision and locate the BuildKit daemon used by kiln builds.
///
/// Configuration flags such as `--daemon-host` or `--backend` must precede
/// the command; they are also read from `KILN_*` environment variables and
/// the configuration file.
#[derive(Parser, Debug)]
#[command(name = "kiln", disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// Controls how results are rendered.
    #[arg(long, value_enum, default_value_t = OutputFormat::Human, global = true)]
    pub(crate) output: OutputFormat,
    /// The command to run.
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Top-level commands.
#[derive(Subcommand, Debug, Clone, Copy)]
pub(crate) enum CliCommand {
    /// Manages the BuildKit daemon.
    Daemon {
        /// The daemon action to perform.
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// Prints the binary version and the daemon version it expects.
    Version,
}

/// Daemon actions.
#[derive(Subcommand, Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum DaemonAction {
    /// Provisions the daemon if needed and prints its address.
    Ensure,
    /// Shows the daemon state without changing it.
    Status,
}
