//! Build-time helpers shared by the kiln build scripts.
//!
//! Build scripts stamp the binary with the source revision that selects the
//! daemon image tag, and render the manual page. Everything here returns
//! warnings instead of printing so the calling script decides how to surface
//! them to Cargo.

use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs::Dir};
use time::{OffsetDateTime, format_description::well_known::Iso8601};

/// Environment variable carrying the source revision into the compiled binary.
pub const REVISION_ENV: &str = "KILN_BUILD_REVISION";

const FALLBACK_DATE: &str = "1970-01-01";

enum SourceDateError {
    Missing,
    InvalidInteger { raw: String },
    InvalidTimestamp { raw: String },
}

/// Derives the manual page date from `SOURCE_DATE_EPOCH`.
///
/// Falls back to the Unix epoch so repeated builds render identical pages.
pub fn manual_date_from_env(warnings: &mut Vec<String>) -> String {
    manual_date(std::env::var("SOURCE_DATE_EPOCH").ok().as_deref(), warnings)
}

/// Formats a raw `SOURCE_DATE_EPOCH` value as an ISO 8601 date.
///
/// Invalid values produce a warning and the fallback date; a missing value
/// produces the fallback silently.
pub fn manual_date(raw: Option<&str>, warnings: &mut Vec<String>) -> String {
    let value = match parse_source_date(raw) {
        Ok(value) => value,
        Err(error) => {
            push_source_date_warning(warnings, &error);
            return FALLBACK_DATE.into();
        }
    };

    value.format(&Iso8601::DATE).unwrap_or_else(|_| {
        warnings.push(format!(
            "SOURCE_DATE_EPOCH could not be formatted; falling back to {FALLBACK_DATE}"
        ));
        FALLBACK_DATE.into()
    })
}

fn parse_source_date(raw: Option<&str>) -> Result<OffsetDateTime, SourceDateError> {
    let text = raw.ok_or(SourceDateError::Missing)?.trim();
    let timestamp = text
        .parse::<i64>()
        .map_err(|_| SourceDateError::InvalidInteger { raw: text.to_owned() })?;
    OffsetDateTime::from_unix_timestamp(timestamp)
        .map_err(|_| SourceDateError::InvalidTimestamp { raw: text.to_owned() })
}

fn push_source_date_warning(warnings: &mut Vec<String>, error: &SourceDateError) {
    match error {
        SourceDateError::Missing => {}
        SourceDateError::InvalidInteger { raw } => warnings.push(format!(
            "Invalid SOURCE_DATE_EPOCH '{raw}'; expected integer seconds since Unix epoch; \
             falling back to {FALLBACK_DATE}"
        )),
        SourceDateError::InvalidTimestamp { raw } => warnings.push(format!(
            "Invalid SOURCE_DATE_EPOCH '{raw}'; not a valid Unix timestamp; falling back to \
             {FALLBACK_DATE}"
        )),
    }
}

/// Determines the source revision to embed in the binary.
///
/// An explicit `KILN_BUILD_REVISION` wins, which lets packagers building from
/// a tarball supply the revision. Otherwise `git rev-parse HEAD` is consulted
/// from `repo_dir`. When neither yields a revision the binary is built
/// without one and provisioning refuses to guess a daemon version.
pub fn build_revision(repo_dir: &Utf8Path, warnings: &mut Vec<String>) -> Option<String> {
    let explicit = std::env::var(REVISION_ENV).ok();
    select_revision(explicit.as_deref(), || git_head(repo_dir), warnings)
}

fn select_revision(
    explicit: Option<&str>,
    from_git: impl FnOnce() -> Result<String, String>,
    warnings: &mut Vec<String>,
) -> Option<String> {
    if let Some(value) = explicit.map(str::trim).filter(|value| !value.is_empty()) {
        return Some(value.to_owned());
    }
    match from_git() {
        Ok(revision) if !revision.is_empty() => Some(revision),
        Ok(_) => {
            warnings.push(String::from(
                "git reported an empty revision; building without revision metadata",
            ));
            None
        }
        Err(reason) => {
            warnings.push(format!(
                "{reason}; building without revision metadata (set {REVISION_ENV} to supply one)"
            ));
            None
        }
    }
}

fn git_head(repo_dir: &Utf8Path) -> Result<String, String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_dir)
        .output()
        .map_err(|error| format!("failed to run git: {error}"))?;
    if !output.status.success() {
        return Err(format!(
            "git rev-parse HEAD failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
}

/// Derives the workspace target directory from an `OUT_DIR` path.
///
/// `OUT_DIR` looks like `{workspace}/target/{profile}/build/{crate}-{hash}/out`
/// natively and gains a `{target}` component when cross-compiling, so the
/// nearest ancestor named `target` is returned.
#[must_use]
pub fn workspace_target_dir(out_dir: &Utf8Path) -> Option<Utf8PathBuf> {
    out_dir
        .ancestors()
        .find(|ancestor| ancestor.file_name() == Some("target"))
        .map(Utf8Path::to_path_buf)
}

/// Computes where generated manual pages land for packaging.
#[must_use]
pub fn out_dir_for_target_profile(
    target: &str,
    profile: &str,
    out_dir: Option<&Utf8Path>,
) -> Utf8PathBuf {
    let base = out_dir
        .and_then(workspace_target_dir)
        .unwrap_or_else(|| Utf8PathBuf::from("target"));
    base.join("generated-man").join(target).join(profile)
}

/// Writes a manual page into `dir`, replacing any previous copy atomically.
///
/// # Errors
///
/// Returns any I/O error raised while creating the directory or writing the
/// page.
pub fn write_man_page(
    data: &[u8],
    dir: &Utf8Path,
    page_name: &str,
) -> std::io::Result<Utf8PathBuf> {
    std::fs::create_dir_all(dir)?;
    let handle = Dir::open_ambient_dir(dir, ambient_authority())?;
    let tmp = format!("{page_name}.tmp");
    handle.write(&tmp, data)?;
    handle.rename(&tmp, &handle, page_name)?;
    Ok(dir.join(page_name))
}
