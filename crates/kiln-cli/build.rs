//! Build script: embed the source revision and render the manual page into
//! target/generated-man/<target>/<profile> for release packaging.

use std::env;

use camino::{Utf8Path, Utf8PathBuf};
use clap::CommandFactory;
use clap_mangen::Man;
use kiln_build_util::{
    REVISION_ENV, build_revision, manual_date_from_env, out_dir_for_target_profile,
    write_man_page,
};

#[path = "src/cli.rs"]
#[allow(dead_code, reason = "only the parser definition is needed here")]
mod cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=src/cli.rs");
    println!("cargo:rerun-if-env-changed={REVISION_ENV}");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-env-changed=TARGET");
    println!("cargo:rerun-if-env-changed=PROFILE");

    let manifest_dir = Utf8PathBuf::from(env::var("CARGO_MANIFEST_DIR")?);
    let mut warnings = Vec::new();
    embed_revision(&manifest_dir, &mut warnings);
    render_manual(&mut warnings)?;
    for warning in warnings {
        println!("cargo:warning={warning}");
    }
    Ok(())
}

fn embed_revision(manifest_dir: &Utf8Path, warnings: &mut Vec<String>) {
    // HEAD moves on every commit; track it so the embedded revision stays current.
    if let Some(workspace) = manifest_dir.parent().and_then(Utf8Path::parent) {
        let git_dir = workspace.join(".git");
        if git_dir.exists() {
            println!("cargo:rerun-if-changed={}", git_dir.join("HEAD"));
            println!("cargo:rerun-if-changed={}", git_dir.join("refs"));
        }
    }
    if let Some(revision) = build_revision(manifest_dir, warnings) {
        println!("cargo:rustc-env={REVISION_ENV}={revision}");
    }
}

fn render_manual(warnings: &mut Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let cmd = cli::Cli::command();
    let binary_name = env::var("CARGO_BIN_NAME").unwrap_or_else(|_| cmd.get_name().to_owned());
    let version = env::var("CARGO_PKG_VERSION")
        .map_err(|_| "CARGO_PKG_VERSION must be set by Cargo to render the manual page")?;

    let date = manual_date_from_env(warnings);
    let man = Man::new(cmd)
        .section("1")
        .source(format!("{binary_name} {version}"))
        .date(date);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    let page_name = format!("{binary_name}.1");

    let target = env::var("TARGET").unwrap_or_else(|_| "unknown-target".into());
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown-profile".into());
    let out_dir = env::var("OUT_DIR").ok().map(Utf8PathBuf::from);
    let man_dir = out_dir_for_target_profile(&target, &profile, out_dir.as_deref());
    write_man_page(&buf, &man_dir, &page_name)?;

    if let Some(extra_dir) = out_dir
        && let Err(err) = write_man_page(&buf, &extra_dir, &page_name)
    {
        warnings.push(format!(
            "Failed to stage manual page in OUT_DIR ({extra_dir}): {err}"
        ));
    }
    Ok(())
}
