//! [`RepoRef`]: the four ways a package source can be named.

use upy_source::ShortForm;

/// A hosted-repository forge. Re-exported so callers of this crate don't
/// also need to depend on `upy-source` just to match on it.
pub use upy_source::Forge as Host;

/// Identifies a source to fetch, constructed once from a user-supplied
/// string and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoRef {
    /// `github:owner/repo[/subpath]` or the equivalent web URL.
    ShortRepo {
        host: Host,
        owner: String,
        repo: String,
        subpath: Option<String>,
    },
    /// Any other `http(s)://` URL pointing at a repository root.
    HttpRepo { url: String },
    /// A bare identifier, resolved against the central package index.
    IndexPackage { name: String },
    /// A direct link to a single `.py`/`.mpy` source file.
    DirectFile { url: String, filename: String },
}

impl RepoRef {
    /// Classifies a user-supplied string into one of the four source kinds.
    ///
    /// Fails only when the input is unambiguously a short-form or web-forge
    /// URL that is missing its owner/repo segments (see [`upy_source::rewrite`]).
    pub fn parse(input: &str) -> Result<Self, upy_source::Error> {
        let is_url_like = input.starts_with("github:")
            || input.starts_with("gitlab:")
            || input.starts_with("http://")
            || input.starts_with("https://");

        if !is_url_like {
            return Ok(RepoRef::IndexPackage { name: input.to_string() });
        }

        if let Some(ShortForm { forge, owner, repo, subpath }) = upy_source::parse_short_form(input)? {
            return Ok(RepoRef::ShortRepo { host: forge, owner, repo, subpath });
        }

        if upy_source::is_direct_file_url(input) {
            let filename = input.rsplit('/').next().unwrap_or(input).to_string();
            return Ok(RepoRef::DirectFile { url: input.to_string(), filename });
        }

        Ok(RepoRef::HttpRepo { url: input.to_string() })
    }

    /// The default version token to use for dependency edges naming this
    /// kind of source, per the resolver boundary rule in the design notes:
    /// repo deps default to `HEAD`, index deps default to `latest`.
    #[must_use]
    pub fn default_version(&self) -> &'static str {
        match self {
            RepoRef::IndexPackage { .. } => "latest",
            _ => upy_source::HEAD,
        }
    }
}
