//! The top-level orchestrator (§4.12): ties the manifest walk, the bounded
//! file fetch, the optional bytecode compile, the archive build, and the
//! board install into the two operations an embedding application actually
//! calls.
//!
//! Every other crate in this workspace defines a precise `thiserror::Error`
//! enum of its own; this crate aggregates them behind [`PackagerError`] so a
//! caller only has to match (or `anyhow::Error::from`) one type, mirroring
//! how `puffin-cli`'s command functions sit on top of `puffin-client`,
//! `puffin-distribution`, and friends.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::warn;
use url::Url;

use upy_archive::ArchiveResult;
use upy_board::{BoardChannel, Session};
use upy_compile::Compiler;
use upy_fetch::{FileInfo, ProcessHook};
use upy_manifest::{IndexFormat, Manifest, ManifestResolver, RepoRef};

#[derive(Debug, Error)]
pub enum PackagerError {
    #[error("compilation was requested but no board session was supplied")]
    CompileRequiresSession,
    #[error(transparent)]
    Manifest(#[from] upy_manifest::Error),
    #[error(transparent)]
    Fetch(#[from] upy_fetch::Error),
    #[error(transparent)]
    Compile(#[from] upy_compile::Error),
    #[error(transparent)]
    Archive(#[from] upy_archive::Error),
    #[error(transparent)]
    Board(#[from] upy_board::Error),
    #[error(transparent)]
    Installer(#[from] upy_installer::Error),
    #[error(transparent)]
    Source(#[from] upy_source::Error),
    #[error(transparent)]
    Fs(#[from] upy_fs::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// This crate's result alias. `PackagerError` implements `std::error::Error`,
/// so callers sitting above this crate (the out-of-scope CLI or service) can
/// freely convert into `anyhow::Result` at their own boundary.
pub type Result<T> = std::result::Result<T, PackagerError>;

/// Process-wide tunables, constructed once and passed by reference to the
/// orchestrator operations — mirrors how `puffin-cli` threads `cache_dir`,
/// `no_cache`, and retry counts into `RegistryClientBuilder`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where finished archives are written. Staging trees themselves are
    /// ephemeral temporary directories, independent of this.
    pub cache_root: PathBuf,
    pub index_base: Url,
    pub http_timeout: Duration,
    /// Number of additional attempts a failed file-fetch pass gets before
    /// the whole operation gives up.
    pub http_retries: u32,
    /// Fed to [`upy_board::Session::wait_for_prompt`] by callers that need a
    /// non-default timeout; this crate's own board queries use the board
    /// crate's built-in default.
    pub prompt_timeout: Duration,
    /// Bypasses [`Compiler::locate`]'s platform auto-detection when set.
    pub compiler_path_override: Option<PathBuf>,
    /// Fallback library path used when the board reports none.
    pub library_path: String,
    pub initial_chunk_size: usize,
    pub max_chunk_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_root: std::env::temp_dir(),
            index_base: Url::parse("https://micropython.org/pi").expect("valid default index URL"),
            http_timeout: Duration::from_secs(30),
            http_retries: 0,
            prompt_timeout: Duration::from_secs(3),
            compiler_path_override: None,
            library_path: "/lib".to_string(),
            initial_chunk_size: upy_transfer::DEFAULT_INITIAL_CHUNK_SIZE,
            max_chunk_retries: 0,
        }
    }
}

impl Config {
    #[must_use]
    pub fn with_cache_root(mut self, cache_root: impl Into<PathBuf>) -> Self {
        self.cache_root = cache_root.into();
        self
    }

    #[must_use]
    pub fn with_index_base(mut self, index_base: Url) -> Self {
        self.index_base = index_base;
        self
    }

    #[must_use]
    pub fn with_http_timeout(mut self, http_timeout: Duration) -> Self {
        self.http_timeout = http_timeout;
        self
    }

    #[must_use]
    pub fn with_http_retries(mut self, http_retries: u32) -> Self {
        self.http_retries = http_retries;
        self
    }

    #[must_use]
    pub fn with_prompt_timeout(mut self, prompt_timeout: Duration) -> Self {
        self.prompt_timeout = prompt_timeout;
        self
    }

    #[must_use]
    pub fn with_compiler_path_override(mut self, path: impl Into<PathBuf>) -> Self {
        self.compiler_path_override = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_library_path(mut self, library_path: impl Into<String>) -> Self {
        self.library_path = library_path.into();
        self
    }

    #[must_use]
    pub fn with_initial_chunk_size(mut self, initial_chunk_size: usize) -> Self {
        self.initial_chunk_size = initial_chunk_size;
        self
    }

    #[must_use]
    pub fn with_max_chunk_retries(mut self, max_chunk_retries: u32) -> Self {
        self.max_chunk_retries = max_chunk_retries;
        self
    }

    /// Builds a `reqwest::Client` configured from this `Config`, the way
    /// `RegistryClientBuilder::build` turns its own settings into a client.
    pub fn build_client(&self) -> reqwest::Result<Client> {
        Client::builder().timeout(self.http_timeout).build()
    }

    fn locate_compiler(&self) -> Option<Compiler> {
        match &self.compiler_path_override {
            Some(path) => Some(Compiler::at(path)),
            None => Compiler::locate(),
        }
    }
}

/// Adapts [`Compiler`] to the [`ProcessHook`] seam C3 calls after every
/// download, compiling `.py` sources to `.mpy` in place and leaving anything
/// else untouched.
struct CompileHook {
    compiler: Compiler,
    base_path: PathBuf,
    arch: Option<String>,
}

#[async_trait]
impl ProcessHook for CompileHook {
    async fn process(&self, written_path: &Path) -> std::io::Result<PathBuf> {
        if written_path.extension().is_none_or(|ext| ext != "py") {
            return Ok(written_path.to_path_buf());
        }
        self.compiler
            .compile(written_path, Some(&self.base_path), self.arch.as_deref())
            .await
            .map_err(|err| std::io::Error::other(err.to_string()))
    }
}

/// Builds the package archive for `repo_url` (§4.12's `package`).
///
/// `session` is consulted only when `compile_files` is `true`, to learn the
/// board's architecture and bytecode format before deciding whether a
/// compile hook can even apply; it is otherwise left untouched, since this
/// operation never closes a session it didn't open.
pub async fn package<C: BoardChannel>(
    client: &Client,
    config: &Config,
    repo_url: &str,
    version: Option<&str>,
    custom_manifest: Option<Manifest>,
    compile_files: bool,
    session: Option<&mut Session<C>>,
) -> Result<ArchiveResult> {
    let root = RepoRef::parse(repo_url)?;
    let staging = upy_fs::StagingDir::new()?;

    let (fmt, compiler_hook): (IndexFormat, Option<Arc<dyn ProcessHook>>) = if compile_files {
        let session = session.ok_or(PackagerError::CompileRequiresSession)?;
        let board_format = upy_board::mpy_format(session).await?;
        let arch = upy_board::architecture(session).await?;

        let hook = match config.locate_compiler() {
            Some(compiler) if compiler.supports(board_format).await.unwrap_or(false) => {
                Some(Arc::new(CompileHook { compiler, base_path: staging.path().to_path_buf(), arch })
                    as Arc<dyn ProcessHook>)
            }
            _ => None,
        };
        (IndexFormat::Mpy(board_format), hook)
    } else {
        (IndexFormat::Py, None)
    };

    let resolver = ManifestResolver::new(client.clone(), config.index_base.to_string());
    let effective_ref = version.unwrap_or_else(|| root.default_version()).to_string();
    let manifests = resolver.resolve(&root, version, custom_manifest, fmt).await?;

    let files = dedup_files(&manifests);
    fetch_all_with_retries(
        client,
        &files,
        staging.path(),
        &effective_ref,
        compiler_hook,
        config.http_retries,
    )
    .await?;

    let result =
        upy_archive::create_archive(staging.path(), &manifests, repo_url, &effective_ref, &config.cache_root)
            .await?;
    Ok(result)
}

/// Builds and installs the package in one call (§4.12's `packageAndInstall`),
/// guaranteeing the local archive file and the board session are cleaned up
/// on every exit path.
pub async fn package_and_install<C: BoardChannel>(
    client: &Client,
    config: &Config,
    repo_url: &str,
    version: Option<&str>,
    custom_manifest: Option<Manifest>,
    compile_files: bool,
    overwrite_existing: bool,
    mut session: Session<C>,
    mut on_progress: impl FnMut(u8),
) -> Result<()> {
    let outcome = package(
        client,
        config,
        repo_url,
        version,
        custom_manifest,
        compile_files,
        Some(&mut session),
    )
    .await;

    let result = async {
        let archive_result = outcome?;

        let install_result = upy_installer::install_package(
            &mut session,
            &archive_result.archive_path,
            &archive_result.package_files,
            overwrite_existing,
            config.initial_chunk_size,
            config.max_chunk_retries,
            &mut on_progress,
        )
        .await;

        if let Err(err) = tokio::fs::remove_file(&archive_result.archive_path).await {
            warn!(error = %err, path = %archive_result.archive_path.display(), "failed to remove local archive during cleanup");
        }

        install_result.map_err(PackagerError::from)
    }
    .await;

    if let Err(err) = session.close().await {
        warn!(error = %err, "failed to close board session during cleanup");
    }

    result
}

/// The union of every resolved manifest's `urls`, deduplicated by target
/// path — mirrors `upy_archive::create_archive`'s own dedup so a file shared
/// between two manifests is downloaded once.
fn dedup_files(manifests: &[Manifest]) -> Vec<FileInfo> {
    let mut seen = std::collections::HashSet::new();
    manifests
        .iter()
        .flat_map(|m| m.urls.iter())
        .filter(|(target, _)| seen.insert(target.clone()))
        .map(|(target, url)| FileInfo { target_rel_path: target.clone(), source_url: url.clone() })
        .collect()
}

async fn fetch_all_with_retries(
    client: &Client,
    files: &[FileInfo],
    staging_dir: &Path,
    reference: &str,
    hook: Option<Arc<dyn ProcessHook>>,
    retries: u32,
) -> std::result::Result<Vec<PathBuf>, upy_fetch::Error> {
    let mut attempt = 0;
    loop {
        match upy_fetch::fetch_all(client, files, staging_dir, reference, hook.clone()).await {
            Ok(paths) => return Ok(paths),
            Err(err) if attempt < retries => {
                attempt += 1;
                warn!(attempt, error = %err, "retrying file fetch after failure");
            }
            Err(err) => return Err(err),
        }
    }
}
