//! Invocation of external control-plane commands.
//!
//! Backends never spawn processes directly. They describe the command as an
//! [`ExternalCommand`] and hand it to a [`CommandRunner`], which returns the
//! combined stdout and stderr of a successful run or a [`CommandError`] that
//! carries the same output verbatim. Tests substitute a scripted runner.

use std::fmt;
use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::cancel::Cancellation;

/// Tracing target for external command execution.
const COMMAND_TARGET: &str = "kiln_provision::command";

/// Interval between exit checks while a child runs.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A program invocation with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    program: String,
    args: Vec<String>,
}

impl ExternalCommand {
    /// Starts a command for `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Program name or path.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments in order.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Returns the first argument, which for container CLIs is the subcommand.
    #[must_use]
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

impl fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Exit code of a failed command, or `None` when it died from a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitDescription(pub Option<i32>);

impl fmt::Display for ExitDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("termination by signal"),
        }
    }
}

/// Failures raised while running an external command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The program could not be started.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The program ran and reported failure.
    #[error("'{command}' failed with {status}: {}", output.trim())]
    Failed {
        /// Rendered command line.
        command: String,
        /// How the program exited.
        status: ExitDescription,
        /// Combined stdout and stderr.
        output: String,
    },

    /// The command was abandoned because the pass was cancelled.
    #[error("'{command}' was cancelled")]
    Cancelled {
        /// Rendered command line.
        command: String,
    },

    /// Supervising the child process failed.
    #[error("I/O error while supervising '{command}': {source}")]
    Io {
        /// Rendered command line.
        command: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
}

impl CommandError {
    /// Combined output of a failed run, if the program produced any.
    #[must_use]
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Failed { output, .. } => Some(output),
            Self::Spawn { .. } | Self::Cancelled { .. } | Self::Io { .. } => None,
        }
    }
}

/// Executes external commands on behalf of a backend.
pub trait CommandRunner: Send + Sync {
    /// Runs `command` to completion and returns its combined output.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the program cannot be started, exits
    /// unsuccessfully, or is cancelled.
    fn run(&self, command: &ExternalCommand, cancel: &Cancellation)
    -> Result<String, CommandError>;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(
        &self,
        command: &ExternalCommand,
        cancel: &Cancellation,
    ) -> Result<String, CommandError> {
        if cancel.is_cancelled() {
            return Err(CommandError::Cancelled {
                command: command.to_string(),
            });
        }

        debug!(target: COMMAND_TARGET, command = %command, "running external command");

        // One pipe behind both streams keeps the output in the order it was written.
        let supervise = |source| CommandError::Io {
            command: command.to_string(),
            source: Arc::new(source),
        };
        let (reader, stdout_writer) = io::pipe().map_err(supervise)?;
        let stderr_writer = stdout_writer.try_clone().map_err(supervise)?;

        let mut process = Command::new(command.program());
        process
            .args(command.arguments())
            .stdin(Stdio::null())
            .stdout(stdout_writer)
            .stderr(stderr_writer);
        let spawned = process.spawn();
        // The parent's write ends live in `process`; closing them lets the reader see EOF.
        drop(process);
        let mut child = spawned.map_err(|source| CommandError::Spawn {
            program: command.program().to_owned(),
            source: Arc::new(source),
        })?;

        let combined = spawn_reader(reader);
        let status = wait_for_exit(command, &mut child, cancel)?;
        let output = join_reader(combined);

        debug!(
            target: COMMAND_TARGET,
            command = %command,
            ?status,
            output_bytes = output.len(),
            "external command exited"
        );

        if status.success() {
            return Ok(output);
        }
        Err(CommandError::Failed {
            command: command.to_string(),
            status: ExitDescription(status.code()),
            output,
        })
    }
}

/// Drains the pipe on a helper thread so the child never blocks on a full buffer.
fn spawn_reader<R>(mut pipe: R) -> JoinHandle<String>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Err(error) = pipe.read_to_end(&mut buffer) {
            debug!(target: COMMAND_TARGET, %error, "pipe read ended early");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

fn join_reader(handle: JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

/// Kills and reaps a child that is no longer supervised.
fn abandon(child: &mut Child) {
    drop(child.kill());
    drop(child.wait());
}

/// Polls the child until it exits, killing it if the pass is cancelled.
fn wait_for_exit(
    command: &ExternalCommand,
    child: &mut Child,
    cancel: &Cancellation,
) -> Result<ExitStatus, CommandError> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {
                if cancel.is_cancelled() {
                    warn!(
                        target: COMMAND_TARGET,
                        command = %command,
                        "cancelled, killing external command"
                    );
                    abandon(child);
                    return Err(CommandError::Cancelled {
                        command: command.to_string(),
                    });
                }
                thread::sleep(EXIT_POLL_INTERVAL);
            }
            Err(source) => {
                warn!(
                    target: COMMAND_TARGET,
                    command = %command,
                    error = %source,
                    "lost track of external command, killing it"
                );
                abandon(child);
                return Err(CommandError::Io {
                    command: command.to_string(),
                    source: Arc::new(source),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests;
