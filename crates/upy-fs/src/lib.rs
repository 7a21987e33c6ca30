//! Path-safety and staging-directory helpers shared by the package pipeline.
//!
//! Every component that writes files derived from a manifest's target-relative
//! paths (the file fetcher, the archiver, the on-board extractor's host-side
//! mirror in tests) goes through [`join_relative`] so that a hostile or buggy
//! manifest can never escape the staging root.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("path `{0}` escapes its root (contains `..` or an absolute prefix)")]
    UnsafePath(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Joins `relative` onto `root`, rejecting any component that would escape `root`.
///
/// Manifests are untrusted input: a `targetRelPath` of `../../etc/passwd` must
/// never be allowed to write outside the staging directory.
pub fn join_relative(root: &Path, relative: &str) -> Result<PathBuf, Error> {
    let relative = Path::new(relative);
    let mut out = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::UnsafePath(relative.display().to_string()));
            }
        }
    }
    Ok(out)
}

/// Creates every directory component of `path`'s parent, if any.
pub async fn create_parent_dirs(path: &Path) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        fs_err::tokio::create_dir_all(parent).await?;
    }
    Ok(())
}

/// An owned staging directory that removes itself (recursively) on drop.
///
/// Mirrors the ownership rule in the data model: "each staging directory is
/// exclusively owned by the Archiver and removed when archiving finishes
/// (success or failure)".
#[derive(Debug)]
pub struct StagingDir {
    inner: tempfile::TempDir,
}

impl StagingDir {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            inner: tempfile::TempDir::new()?,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Consume the guard without deleting the directory, returning its path.
    ///
    /// Used when a later stage (the archiver) still needs the tree on disk
    /// after this call returns; the caller becomes responsible for cleanup.
    #[must_use]
    pub fn keep(self) -> PathBuf {
        self.inner.keep()
    }
}

/// Strips a leading `v` from a version tag, e.g. `v1.2.3` -> `1.2.3`.
#[must_use]
pub fn strip_leading_v(version: &str) -> &str {
    version.strip_prefix('v').unwrap_or(version)
}

/// Returns the last path segment of a URL-like string, with a trailing
/// `.git` suffix removed if present. Used to derive a package name from a
/// repository URL when the manifest declares none.
#[must_use]
pub fn last_segment_stripped(url: &str) -> &str {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
    last.strip_suffix(".git").unwrap_or(last)
}
