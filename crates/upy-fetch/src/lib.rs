//! Downloads one manifest-declared file into a staging tree (§4.3), and
//! drives a whole manifest's `urls` concurrently with a bounded fan-out.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::Client;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// How many concurrent downloads a single [`fetch_all`] call may have in
/// flight at once.
const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Error)]
pub enum Error {
    #[error("download of `{url}` failed: {status}")]
    DownloadFailed { url: String, status: String },
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error(transparent)]
    Source(#[from] upy_source::Error),
    #[error(transparent)]
    Fs(#[from] upy_fs::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One `(targetRelPath, sourceUrl)` pair from a resolved manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub target_rel_path: String,
    pub source_url: String,
}

/// A post-download transform, invoked with the freshly-written path.
///
/// Returning a different path than the one passed in signals "I moved or
/// replaced the file"; the fetcher removes the original and treats the
/// returned path as the file's final location. Used by the bytecode
/// compiler adapter to swap a `.py` staging path for a compiled `.mpy` one.
#[async_trait]
pub trait ProcessHook: Send + Sync {
    async fn process(&self, written_path: &Path) -> std::io::Result<PathBuf>;
}

/// Downloads a single file into `staging_dir`, returning its final path.
pub async fn fetch(
    client: &Client,
    file: &FileInfo,
    staging_dir: &Path,
    reference: &str,
    process_hook: Option<&dyn ProcessHook>,
) -> Result<PathBuf, Error> {
    let raw_url = upy_source::rewrite(&file.source_url, reference)?;
    let target = upy_fs::join_relative(staging_dir, &file.target_rel_path)?;
    upy_fs::create_parent_dirs(&target).await?;

    debug!(url = %raw_url, target = %target.display(), "downloading file");
    let response = client.get(&raw_url).send().await?;
    if !response.status().is_success() {
        return Err(Error::DownloadFailed { url: raw_url, status: response.status().to_string() });
    }

    let mut out = tokio::fs::File::create(&target).await?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        out.write_all(&chunk?).await?;
    }
    out.flush().await?;
    drop(out);

    match process_hook {
        Some(hook) => match hook.process(&target).await {
            Ok(final_path) if final_path != target => {
                tokio::fs::remove_file(&target).await?;
                Ok(final_path)
            }
            Ok(_) => Ok(target),
            Err(err) => {
                warn!(error = %err, path = %target.display(), "post-process hook failed; shipping raw source");
                Ok(target)
            }
        },
        None => Ok(target),
    }
}

/// Downloads every file in `files` concurrently, bounded by
/// [`DEFAULT_CONCURRENCY`] in-flight requests at a time.
///
/// Returns final paths in the same order as `files`. The caller must await
/// this (it does) before handing the staging tree to the archiver: nothing
/// here implies any ordering guarantee between individual downloads.
pub async fn fetch_all(
    client: &Client,
    files: &[FileInfo],
    staging_dir: &Path,
    reference: &str,
    process_hook: Option<Arc<dyn ProcessHook>>,
) -> Result<Vec<PathBuf>, Error> {
    let semaphore = Arc::new(Semaphore::new(DEFAULT_CONCURRENCY));
    let mut tasks = FuturesUnordered::new();

    for (index, file) in files.iter().cloned().enumerate() {
        let client = client.clone();
        let staging_dir = staging_dir.to_path_buf();
        let reference = reference.to_string();
        let semaphore = Arc::clone(&semaphore);
        let hook = process_hook.clone();

        tasks.push(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            let result = fetch(&client, &file, &staging_dir, &reference, hook.as_deref()).await;
            (index, result)
        });
    }

    let mut results: Vec<Option<PathBuf>> = (0..files.len()).map(|_| None).collect();
    while let Some((index, result)) = tasks.next().await {
        results[index] = Some(result?);
    }

    Ok(results.into_iter().map(|path| path.expect("every index filled exactly once")).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path as path_matcher};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetch_writes_file_under_staging_dir() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_matcher("/a.py"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"print(1)".to_vec()))
            .mount(&server)
            .await;

        let staging = tempfile::TempDir::new().unwrap();
        let file = FileInfo {
            target_rel_path: "pkg/a.py".into(),
            source_url: format!("{}/a.py", server.uri()),
        };
        let client = Client::new();
        let final_path = fetch(&client, &file, staging.path(), "HEAD", None).await.unwrap();

        assert_eq!(final_path, staging.path().join("pkg/a.py"));
        assert_eq!(tokio::fs::read(&final_path).await.unwrap(), b"print(1)");
    }

    #[tokio::test]
    async fn fetch_fails_on_non_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_matcher("/missing.py"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let staging = tempfile::TempDir::new().unwrap();
        let file = FileInfo {
            target_rel_path: "missing.py".into(),
            source_url: format!("{}/missing.py", server.uri()),
        };
        let client = Client::new();
        let err = fetch(&client, &file, staging.path(), "HEAD", None).await.unwrap_err();
        assert!(matches!(err, Error::DownloadFailed { .. }));
    }

    struct UppercaseHook;

    #[async_trait]
    impl ProcessHook for UppercaseHook {
        async fn process(&self, written_path: &Path) -> std::io::Result<PathBuf> {
            let compiled = written_path.with_extension("mpy");
            let contents = tokio::fs::read(written_path).await?;
            tokio::fs::write(&compiled, contents).await?;
            Ok(compiled)
        }
    }

    #[tokio::test]
    async fn process_hook_swaps_final_path_and_removes_original() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_matcher("/a.py"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"print(1)".to_vec()))
            .mount(&server)
            .await;

        let staging = tempfile::TempDir::new().unwrap();
        let file = FileInfo {
            target_rel_path: "a.py".into(),
            source_url: format!("{}/a.py", server.uri()),
        };
        let client = Client::new();
        let final_path =
            fetch(&client, &file, staging.path(), "HEAD", Some(&UppercaseHook)).await.unwrap();

        assert_eq!(final_path, staging.path().join("a.mpy"));
        assert!(!staging.path().join("a.py").exists());
        assert!(final_path.exists());
    }

    #[tokio::test]
    async fn fetch_all_preserves_input_order() {
        let server = MockServer::start().await;
        for name in ["a", "b", "c"] {
            Mock::given(method("GET"))
                .and(path_matcher(format!("/{name}.py")))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(name.as_bytes().to_vec()))
                .mount(&server)
                .await;
        }

        let staging = tempfile::TempDir::new().unwrap();
        let files: Vec<FileInfo> = ["a", "b", "c"]
            .iter()
            .map(|name| FileInfo {
                target_rel_path: format!("{name}.py"),
                source_url: format!("{}/{name}.py", server.uri()),
            })
            .collect();

        let client = Client::new();
        let paths = fetch_all(&client, &files, staging.path(), "HEAD", None).await.unwrap();
        assert_eq!(
            paths,
            vec![
                staging.path().join("a.py"),
                staging.path().join("b.py"),
                staging.path().join("c.py"),
            ]
        );
    }
}
