//! Resolves a starting [`RepoRef`] into an ordered sequence of manifests,
//! walking `deps` depth-first and tracking visited `(source, version)` pairs
//! so a cyclic or duplicated dependency graph can't recurse forever.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use reqwest::Client;
use tracing::{debug, trace};

use crate::{Error, Manifest, RepoRef};

/// The `<fmt>` segment of an index package descriptor URL: either the
/// literal `py` (uncompiled) or an integer bytecode format major version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Py,
    Mpy(u32),
}

impl fmt::Display for IndexFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexFormat::Py => write!(f, "py"),
            IndexFormat::Mpy(v) => write!(f, "{v}"),
        }
    }
}

/// Fetches and walks package manifests against a configured HTTP client and
/// package-index base URL.
#[derive(Debug, Clone)]
pub struct ManifestResolver {
    client: Client,
    index_base: String,
}

impl ManifestResolver {
    #[must_use]
    pub fn new(client: Client, index_base: impl Into<String>) -> Self {
        Self { client, index_base: index_base.into() }
    }

    /// Resolves `root` into an ordered list of manifests, root first,
    /// followed by every transitively resolved dependency manifest in
    /// declared depth-first order.
    ///
    /// `custom_manifest`, when given, replaces the root's fetch entirely
    /// (step 1 of §4.2); it is never applied to dependency edges.
    pub async fn resolve(
        &self,
        root: &RepoRef,
        version: Option<&str>,
        custom_manifest: Option<Manifest>,
        fmt: IndexFormat,
    ) -> Result<Vec<Manifest>, Error> {
        let root_version = version.unwrap_or_else(|| root.default_version()).to_string();

        let root_manifest = match custom_manifest {
            Some(manifest) => {
                debug!("using caller-supplied manifest override for root");
                manifest
            }
            None => self.fetch_manifest(root, &root_version, fmt).await?,
        };

        let mut visited = HashSet::new();
        visited.insert((identity_key(root), root_version));
        let mut out = Vec::new();
        self.walk(root_manifest, fmt, &mut visited, &mut out).await?;
        Ok(out)
    }

    fn walk<'a>(
        &'a self,
        manifest: Manifest,
        fmt: IndexFormat,
        visited: &'a mut HashSet<(String, String)>,
        out: &'a mut Vec<Manifest>,
    ) -> Pin<Box<dyn Future<Output = Result<(), Error>> + 'a>> {
        Box::pin(async move {
            let deps = manifest.deps.clone();
            out.push(manifest);

            for dep in deps {
                let repo_ref = RepoRef::parse(&dep.target)?;
                let effective_version =
                    dep.version.clone().unwrap_or_else(|| repo_ref.default_version().to_string());
                let key = (identity_key(&repo_ref), effective_version.clone());
                if !visited.insert(key) {
                    trace!(target = %dep.target, "skipping already-visited dependency");
                    continue;
                }

                let dep_manifest = self.fetch_manifest(&repo_ref, &effective_version, fmt).await?;
                self.walk(dep_manifest, fmt, visited, out).await?;
            }

            Ok(())
        })
    }

    async fn fetch_manifest(
        &self,
        repo_ref: &RepoRef,
        version: &str,
        fmt: IndexFormat,
    ) -> Result<Manifest, Error> {
        match repo_ref {
            RepoRef::DirectFile { url, filename } => {
                let raw = upy_source::rewrite(url, version)?;
                Ok(Manifest::single_file(filename.clone(), raw))
            }
            RepoRef::IndexPackage { name } => {
                let descriptor_url = format!(
                    "{}/package/{fmt}/{name}/{version}.json",
                    self.index_base.trim_end_matches('/'),
                );
                debug!(url = %descriptor_url, "fetching index descriptor");
                let bytes = self.get(&descriptor_url).await?;
                Manifest::parse(&bytes, Some(&self.index_base))
            }
            RepoRef::ShortRepo { .. } | RepoRef::HttpRepo { .. } => {
                let source = manifest_source_string(repo_ref)
                    .ok_or_else(|| Error::UnsupportedSource(format!("{repo_ref:?}")))?;
                let raw_url = upy_source::rewrite(&source, version)?;
                debug!(url = %raw_url, "fetching repository manifest");
                let bytes = self.get(&raw_url).await?;
                Manifest::parse(&bytes, None)
            }
        }
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, Error> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Error::ManifestUnavailable(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// A short-form or HTTP string naming `package.json` relative to `repo_ref`.
fn manifest_source_string(repo_ref: &RepoRef) -> Option<String> {
    match repo_ref {
        RepoRef::ShortRepo { host, owner, repo, subpath } => {
            let scheme = match host {
                upy_source::Forge::GitHub => "github",
                upy_source::Forge::GitLab => "gitlab",
            };
            Some(match subpath {
                Some(sub) => format!("{scheme}:{owner}/{repo}/{sub}/package.json"),
                None => format!("{scheme}:{owner}/{repo}/package.json"),
            })
        }
        RepoRef::HttpRepo { url } => Some(format!("{}/package.json", url.trim_end_matches('/'))),
        _ => None,
    }
}

/// A stable dedupe key for a [`RepoRef`], independent of the requested
/// version (the version is tracked alongside it by the caller).
fn identity_key(repo_ref: &RepoRef) -> String {
    match repo_ref {
        RepoRef::ShortRepo { host, owner, repo, subpath } => {
            format!("{host:?}:{owner}/{repo}/{}", subpath.as_deref().unwrap_or(""))
        }
        RepoRef::HttpRepo { url } | RepoRef::DirectFile { url, .. } => url.clone(),
        RepoRef::IndexPackage { name } => format!("index:{name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn resolves_root_with_no_deps() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/owner/repo/HEAD/package.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "modulino",
                "version": "1.0.0",
                "urls": [["modulino/__init__.py", "https://example.com/init.py"]],
            })))
            .mount(&server)
            .await;

        let resolver = ManifestResolver::new(Client::new(), "https://index.example.com");
        let root = RepoRef::HttpRepo { url: server.uri() + "/owner/repo" };
        let manifests = resolver.resolve(&root, Some("HEAD"), None, IndexFormat::Py).await.unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].name.as_deref(), Some("modulino"));
    }

    #[tokio::test]
    async fn walks_one_dependency_depth_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/root/HEAD/package.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "urls": [["a.py", "https://example.com/a.py"]],
                "deps": [["senml"]],
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/package/py/senml/latest.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "version": "2.0.0",
                "hashes": [["senml/__init__.py", "abcd"]],
            })))
            .mount(&server)
            .await;

        let resolver = ManifestResolver::new(Client::new(), server.uri());
        let root = RepoRef::HttpRepo { url: server.uri() + "/root" };
        let manifests = resolver.resolve(&root, Some("HEAD"), None, IndexFormat::Py).await.unwrap();
        assert_eq!(manifests.len(), 2);
        assert_eq!(manifests[1].version.as_deref(), Some("2.0.0"));
    }

    #[tokio::test]
    async fn custom_manifest_skips_root_fetch() {
        let server = MockServer::start().await;
        // No mock registered for the root manifest: a fetch would fail the test.
        let resolver = ManifestResolver::new(Client::new(), server.uri());
        let root = RepoRef::HttpRepo { url: server.uri() + "/root" };
        let custom = Manifest::parse(
            br#"{"urls":[["modulino/__init__.py","u1"],["modulino/buttons.py","u2"]],"version":"1.0.0"}"#,
            None,
        )
        .unwrap();
        let manifests = resolver.resolve(&root, None, Some(custom), IndexFormat::Py).await.unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].urls.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_dependency_edge_visited_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/root/HEAD/package.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "urls": [["a.py", "u"]],
                "deps": [["senml"], ["senml"]],
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/package/py/senml/latest.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "version": "2.0.0",
                "hashes": [["senml/__init__.py", "abcd"]],
            })))
            .mount(&server)
            .await;

        let resolver = ManifestResolver::new(Client::new(), server.uri());
        let root = RepoRef::HttpRepo { url: server.uri() + "/root" };
        let manifests = resolver.resolve(&root, Some("HEAD"), None, IndexFormat::Py).await.unwrap();
        // senml is only fetched (and appended) once despite two identical dep edges.
        assert_eq!(manifests.len(), 2);
    }
}
