//! Daemon image build context compiled into the binary.

use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use crate::error::ProvisionError;

const DOCKERFILE_NAME: &str = "Dockerfile.kilnd";

/// Files of the image build context, as `(name, contents)` pairs.
pub const BUILD_CONTEXT_FILES: &[(&str, &str)] = &[
    (DOCKERFILE_NAME, include_str!("../../assets/Dockerfile.kilnd")),
    ("buildkitd.toml", include_str!("../../assets/buildkitd.toml")),
];

/// Writes the build context into a fresh temporary directory.
///
/// The Dockerfile is renamed to `Dockerfile` so that the engine picks it up
/// without extra flags. The directory is removed when the returned handle
/// drops.
///
/// # Errors
///
/// Returns [`ProvisionError::Staging`] when the directory or a file cannot be
/// written.
pub fn stage_build_context() -> Result<TempDir, ProvisionError> {
    let dir = tempfile::Builder::new()
        .prefix("kiln-buildkitd")
        .tempdir()
        .map_err(|source| ProvisionError::Staging {
            path: std::env::temp_dir(),
            source: Arc::new(source),
        })?;

    for (name, contents) in BUILD_CONTEXT_FILES {
        let path = dir.path().join(name);
        fs::write(&path, contents).map_err(|source| ProvisionError::Staging {
            path,
            source: Arc::new(source),
        })?;
    }

    let from = dir.path().join(DOCKERFILE_NAME);
    let to = dir.path().join("Dockerfile");
    fs::rename(&from, &to).map_err(|source| ProvisionError::Staging {
        path: to.clone(),
        source: Arc::new(source),
    })?;

    Ok(dir)
}
