//! Bundles a staging directory into a gzip tar archive (§4.5).

use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;
use tracing::{debug, info};
use upy_manifest::Manifest;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to build archive: {0}")]
    Io(#[from] std::io::Error),
    #[error("archiving task panicked")]
    Join(#[from] tokio::task::JoinError),
}

/// The result of archiving a staging tree.
#[derive(Debug, Clone)]
pub struct ArchiveResult {
    pub archive_path: PathBuf,
    /// The union of every resolved manifest's declared target paths.
    pub package_files: Vec<String>,
}

/// Derives the archive's file name: `<packageName>-<version>.tar.gz`.
///
/// `packageName` comes from the root manifest's `name`, falling back to the
/// last path segment of `root_url`. `version` comes from the root
/// manifest's `version`, falling back to `requested_ref` (leading `v`
/// stripped), falling back to `latest` when `requested_ref` is the default
/// branch token.
#[must_use]
pub fn archive_name(root_manifest: &Manifest, root_url: &str, requested_ref: &str) -> String {
    let package_name = root_manifest
        .name
        .clone()
        .unwrap_or_else(|| upy_fs::last_segment_stripped(root_url).to_string());

    let version = root_manifest.version.clone().unwrap_or_else(|| {
        if requested_ref == upy_source::HEAD {
            "latest".to_string()
        } else {
            upy_fs::strip_leading_v(requested_ref).to_string()
        }
    });

    format!("{package_name}-{version}.tar.gz")
}

/// Archives every file under `staging_dir` into `output_dir`, at gzip
/// level 9, naming the archive from `manifests[0]` (the root manifest).
///
/// Runs the actual tar/gzip work on a blocking thread: the `tar` and
/// `flate2` crates are synchronous and archiving a large staging tree can
/// take long enough to starve the async runtime's I/O driver.
pub async fn create_archive(
    staging_dir: &Path,
    manifests: &[Manifest],
    root_url: &str,
    requested_ref: &str,
    output_dir: &Path,
) -> Result<ArchiveResult, Error> {
    let package_files: Vec<String> = {
        let mut seen = std::collections::HashSet::new();
        manifests
            .iter()
            .flat_map(|m| m.urls.iter().map(|(target, _)| target.clone()))
            .filter(|target| seen.insert(target.clone()))
            .collect()
    };

    let name = archive_name(&manifests[0], root_url, requested_ref);
    let archive_path = output_dir.join(&name);

    let staging_dir = staging_dir.to_path_buf();
    let archive_path_for_blocking = archive_path.clone();
    tokio::task::spawn_blocking(move || write_tar_gz(&staging_dir, &archive_path_for_blocking))
        .await??;

    info!(path = %archive_path.display(), files = package_files.len(), "archive written");
    Ok(ArchiveResult { archive_path, package_files })
}

fn write_tar_gz(staging_dir: &Path, archive_path: &Path) -> Result<(), std::io::Error> {
    debug!(src = %staging_dir.display(), dest = %archive_path.display(), "writing tar.gz");
    let file = std::fs::File::create(archive_path)?;
    let encoder = GzEncoder::new(file, Compression::new(9));
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all("", staging_dir)?;
    builder.into_inner()?.finish()?;
    Ok(())
}
