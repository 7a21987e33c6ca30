//! The package manifest data model.
//!
//! A manifest arrives as one of two JSON shapes (§6): a repository manifest
//! carrying `urls`, or an index manifest carrying `hashes`. [`Manifest::resolve`]
//! normalizes both into a single in-memory form where every target path has a
//! concrete source URL, so the rest of the pipeline never has to branch on
//! which shape it came from.

use serde::Deserialize;
use tracing::warn;

use crate::Error;

/// One dependency edge, as declared in a manifest's `deps` array.
///
/// The JSON source is a 1- or 2-element array (`[urlOrName]` or
/// `[urlOrName, version]`); a missing second element means "use this kind of
/// source's default version" (`HEAD` for repo deps, `latest` for index deps).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepEdge {
    pub target: String,
    pub version: Option<String>,
}

/// A fully-resolved package manifest: every target path has a concrete
/// source URL, regardless of whether the JSON used `urls` or `hashes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub name: Option<String>,
    pub version: Option<String>,
    /// `(targetRelPath, sourceUrl)`, in manifest-declared order.
    pub urls: Vec<(String, String)>,
    pub deps: Vec<DepEdge>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawManifest {
    pub name: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub urls: Option<Vec<(String, String)>>,
    #[serde(default)]
    pub hashes: Option<Vec<(String, String)>>,
    #[serde(default)]
    pub deps: Vec<Vec<String>>,
}

impl Manifest {
    /// Parses and resolves a manifest from raw JSON bytes.
    ///
    /// `index_base`, when given, is the index host used to turn `hashes`
    /// entries into content-addressed file URLs
    /// (`<index>/file/<hash[0:2]>/<hash>`). It is `None` for repository and
    /// direct-file manifests, which never carry `hashes` in practice.
    pub fn parse(bytes: &[u8], index_base: Option<&str>) -> Result<Self, Error> {
        let raw: RawManifest = serde_json::from_slice(bytes)?;
        Self::resolve(raw, index_base)
    }

    pub(crate) fn resolve(raw: RawManifest, index_base: Option<&str>) -> Result<Self, Error> {
        if raw.urls.is_some() && raw.hashes.is_some() {
            warn!("manifest declares both `urls` and `hashes`; `hashes` takes precedence");
        }

        let urls = if let Some(hashes) = raw.hashes {
            let index_base = index_base.ok_or(Error::MissingUrlsAndHashes)?;
            hashes
                .into_iter()
                .map(|(target, hash)| (target, content_addressed_url(index_base, &hash)))
                .collect()
        } else if let Some(urls) = raw.urls {
            urls
        } else {
            return Err(Error::MissingUrlsAndHashes);
        };

        let deps = raw
            .deps
            .into_iter()
            .map(|entry| {
                let mut iter = entry.into_iter();
                let target = iter.next().ok_or(Error::MissingUrlsAndHashes)?;
                let version = iter.next();
                Ok(DepEdge { target, version })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Manifest { name: raw.name, version: raw.version, urls, deps })
    }

    /// Synthesizes a single-file manifest for a `DirectFile` source.
    #[must_use]
    pub fn single_file(target_rel_path: String, source_url: String) -> Self {
        Manifest {
            name: None,
            version: None,
            urls: vec![(target_rel_path, source_url)],
            deps: Vec::new(),
        }
    }
}

fn content_addressed_url(index_base: &str, hash: &str) -> String {
    let prefix = hash.get(0..2).unwrap_or(hash);
    format!("{}/file/{prefix}/{hash}", index_base.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_manifest_uses_urls_verbatim() {
        let json = br#"{"name":"modulino","version":"1.0.0","urls":[["modulino/__init__.py","https://example.com/init.py"]]}"#;
        let m = Manifest::parse(json, None).unwrap();
        assert_eq!(m.name.as_deref(), Some("modulino"));
        assert_eq!(
            m.urls,
            vec![("modulino/__init__.py".to_string(), "https://example.com/init.py".to_string())]
        );
    }

    #[test]
    fn index_manifest_builds_content_addressed_urls() {
        let json = br#"{"version":"2.0.0","hashes":[["senml/__init__.py","abcdef0123"]]}"#;
        let m = Manifest::parse(json, Some("https://micropython.org/pi")).unwrap();
        assert_eq!(
            m.urls,
            vec![(
                "senml/__init__.py".to_string(),
                "https://micropython.org/pi/file/ab/abcdef0123".to_string()
            )]
        );
    }

    #[test]
    fn index_manifest_without_index_base_fails() {
        let json = br#"{"version":"2.0.0","hashes":[["a.py","abcd"]]}"#;
        assert!(Manifest::parse(json, None).is_err());
    }

    #[test]
    fn manifest_missing_both_urls_and_hashes_fails() {
        let json = br#"{"version":"2.0.0"}"#;
        assert!(Manifest::parse(json, None).is_err());
    }

    #[test]
    fn deps_with_and_without_version() {
        let json = br#"{"urls":[["a.py","u"]],"deps":[["senml"],["github:a/b","v1.0.0"]]}"#;
        let m = Manifest::parse(json, None).unwrap();
        assert_eq!(
            m.deps,
            vec![
                DepEdge { target: "senml".into(), version: None },
                DepEdge { target: "github:a/b".into(), version: Some("v1.0.0".into()) },
            ]
        );
    }
}
