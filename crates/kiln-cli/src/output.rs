//! Rendering of command results.
//!
//! Human output for `daemon ensure` is the bare endpoint so that
//! `BUILDKIT_HOST=$(kiln daemon ensure)` works; JSON output is one document
//! terminated by a newline.

use std::io::Write;

use serde::Serialize;

use kiln_provision::{Action, ConnectionHandle, DaemonStatus, InstallReason, ObservedState};

use crate::AppError;
use crate::cli::OutputFormat;

/// Version details printed by `kiln version`.
#[derive(Debug, Serialize)]
pub(crate) struct VersionReport<'a> {
    pub(crate) version: &'a str,
    pub(crate) revision: Option<&'a str>,
    pub(crate) daemon_version: Option<String>,
}

fn write_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<(), AppError> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

pub(crate) fn write_handle<W: Write>(
    out: &mut W,
    format: OutputFormat,
    handle: &ConnectionHandle,
) -> Result<(), AppError> {
    match format {
        OutputFormat::Human => writeln!(out, "{}", handle.endpoint())?,
        OutputFormat::Json => write_json(out, handle)?,
    }
    Ok(())
}

pub(crate) fn write_status<W: Write>(
    out: &mut W,
    format: OutputFormat,
    status: &DaemonStatus,
) -> Result<(), AppError> {
    if format == OutputFormat::Json {
        return write_json(out, status);
    }
    match status {
        DaemonStatus::External { host } => writeln!(out, "external daemon: {host}")?,
        DaemonStatus::Managed {
            backend,
            endpoint,
            desired,
            observed,
            planned,
        } => {
            writeln!(out, "backend:  {backend}")?;
            writeln!(out, "endpoint: {endpoint}")?;
            writeln!(out, "desired:  {desired}")?;
            writeln!(out, "observed: {}", describe_observed(observed))?;
            writeln!(out, "planned:  {}", describe_action(planned))?;
        }
    }
    Ok(())
}

pub(crate) fn write_version<W: Write>(
    out: &mut W,
    format: OutputFormat,
    report: &VersionReport<'_>,
) -> Result<(), AppError> {
    if format == OutputFormat::Json {
        return write_json(out, report);
    }
    writeln!(out, "kiln {}", report.version)?;
    writeln!(out, "revision: {}", report.revision.unwrap_or("unknown"))?;
    writeln!(
        out,
        "daemon version: {}",
        report.daemon_version.as_deref().unwrap_or("unknown")
    )?;
    Ok(())
}

fn describe_observed(observed: &ObservedState) -> String {
    if !observed.exists {
        return String::from("missing");
    }
    let state = if observed.running { "running" } else { "stopped" };
    match observed.version.as_deref() {
        Some(version) => format!("{state} at {version}"),
        None => format!("{state} (untagged image)"),
    }
}

fn describe_action(action: &Action) -> String {
    match action {
        Action::NoOp => String::from("nothing to do"),
        Action::Start => String::from("start the stopped daemon"),
        Action::Install {
            reason: InstallReason::Missing,
        } => String::from("install (no daemon)"),
        Action::Install {
            reason: InstallReason::VersionMismatch { found: Some(found) },
        } => format!("reinstall (found {found})"),
        Action::Install {
            reason: InstallReason::VersionMismatch { found: None },
        } => String::from("reinstall (found an untagged image)"),
    }
}
