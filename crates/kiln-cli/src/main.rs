//! CLI entrypoint for kiln.
//!
//! Delegates to [`kiln_cli::run`], which loads configuration and provisions
//! or inspects the BuildKit daemon.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    kiln_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
