//! The installer orchestrator (§4.11): uploads an already-built archive,
//! verifies it, extracts it into the board's library directory, and
//! guarantees the remote archive is cleaned up on every exit path.

use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};
use upy_board::{py_repr, BoardChannel, Session};

const DEFAULT_LIBRARY_PATH: &str = "/lib";

#[derive(Debug, Error)]
pub enum Error {
    #[error("would overwrite existing file `{0}`")]
    WouldOverwriteFile(String),
    #[error("would overwrite existing folder `{0}`")]
    WouldOverwriteFolder(String),
    #[error(transparent)]
    Board(#[from] upy_board::Error),
    #[error(transparent)]
    Transfer(#[from] upy_transfer::Error),
    #[error(transparent)]
    Extract(#[from] upy_extract::Error),
}

const REMOVE_DIR_HELPER: &str = "\
def remove_directory_recursive(path):
    import uos
    try:
        entries = uos.listdir(path)
    except OSError as exc:
        raise exc
    for entry in entries:
        full = path + '/' + entry
        try:
            uos.listdir(full)
            remove_directory_recursive(full)
        except OSError:
            uos.remove(full)
    uos.rmdir(path)
";

/// Installs an already-archived, already-staged package onto the board.
///
/// `package_files` is the manifest-derived set of target-relative paths
/// the archive contains (§4.5's `ArchiveResult::package_files`).
pub async fn install_package<C: BoardChannel>(
    session: &mut Session<C>,
    local_archive_path: &Path,
    package_files: &[String],
    overwrite_existing: bool,
    initial_chunk_size: usize,
    max_chunk_retries: u32,
    mut on_progress: impl FnMut(u8),
) -> Result<(), Error> {
    let library_path = upy_board::library_path(session)
        .await?
        .unwrap_or_else(|| DEFAULT_LIBRARY_PATH.to_string());
    info!(library_path, "resolved board library path");

    let (package_folders, loose_files) = derive_folders_and_loose(package_files);

    for file in &loose_files {
        let device_path = format!("{library_path}/{file}");
        if !overwrite_existing && device_path_exists(session, &device_path).await? {
            return Err(Error::WouldOverwriteFile(device_path));
        }
    }

    for folder in &package_folders {
        let device_path = format!("{library_path}/{folder}");
        if device_path_exists(session, &device_path).await? {
            if overwrite_existing {
                remove_directory_recursive(session, &device_path).await?;
            } else {
                return Err(Error::WouldOverwriteFolder(folder.clone()));
            }
        }
    }

    let archive_name = local_archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "package.tar.gz".to_string());
    let remote_archive_path = format!("/{archive_name}");

    let mut on_progress: &mut dyn FnMut(u8) = &mut on_progress;
    let result = run_upload_verify_extract(
        session,
        local_archive_path,
        &remote_archive_path,
        &library_path,
        initial_chunk_size,
        max_chunk_retries,
        on_progress,
    )
    .await;

    // Guaranteed cleanup, regardless of which step above failed.
    if let Err(err) = session.remove_file(&remote_archive_path).await {
        warn!(error = %err, path = %remote_archive_path, "failed to remove remote archive during cleanup");
    }

    result
}

async fn run_upload_verify_extract<C: BoardChannel>(
    session: &mut Session<C>,
    local_archive_path: &Path,
    remote_archive_path: &str,
    library_path: &str,
    initial_chunk_size: usize,
    max_chunk_retries: u32,
    on_progress: &mut dyn FnMut(u8),
) -> Result<(), Error> {
    upy_transfer::write_file_chunked(
        session,
        local_archive_path,
        remote_archive_path,
        initial_chunk_size,
        max_chunk_retries,
        on_progress,
    )
    .await?;
    info!(path = remote_archive_path, "archive uploaded");

    upy_transfer::verify_hash(session, local_archive_path, remote_archive_path).await?;
    info!("archive hash verified");

    upy_extract::extract(session, remote_archive_path, library_path).await?;
    info!("archive extracted");

    Ok(())
}

async fn device_path_exists<C: BoardChannel>(
    session: &mut Session<C>,
    device_path: &str,
) -> Result<bool, Error> {
    session.enter_raw_mode().await?;
    let statement = format!(
        "import os\ntry:\n os.stat({})\n print(1)\nexcept OSError:\n print(0)",
        py_repr(device_path)
    );
    let reply = session.exec_statement(&statement).await?;
    session.exit_raw_mode().await?;
    Ok(reply.stdout_trimmed().trim() == "1")
}

async fn remove_directory_recursive<C: BoardChannel>(
    session: &mut Session<C>,
    device_path: &str,
) -> Result<(), Error> {
    session.enter_raw_mode().await?;
    session.exec_statement(REMOVE_DIR_HELPER).await?;
    session.exec_statement(&format!("remove_directory_recursive({})", py_repr(device_path))).await?;
    session.exit_raw_mode().await?;
    Ok(())
}

/// Splits `package_files` into `packageFolders` (the deduplicated set of
/// first path components among files that have a `/`) and `looseFiles`
/// (files at the archive root).
fn derive_folders_and_loose(package_files: &[String]) -> (Vec<String>, Vec<String>) {
    let mut folders = Vec::new();
    let mut loose = Vec::new();

    for file in package_files {
        match file.split_once('/') {
            Some((first, _)) => {
                if !folders.contains(&first.to_string()) {
                    folders.push(first.to_string());
                }
            }
            None => loose.push(file.clone()),
        }
    }

    (folders, loose)
}
