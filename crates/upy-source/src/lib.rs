//! Normalizes short-form and human-form repository URLs to raw-content URLs.
//!
//! `rewrite` is pure and total over well-formed inputs. It is only ever
//! called with a URL-shaped string (a `github:`/`gitlab:` short form, a
//! `github.com`/`gitlab.com` web URL, or an already-raw `http(s)://` URL);
//! bare package names are classified as `IndexPackage` by the manifest
//! resolver before this function is ever reached.

use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("malformed source URL `{0}`: expected at least owner/repo")]
    MalformedSource(String),
}

/// The default-branch token a short-form reference resolves to when the
/// caller passes no version or the literal `HEAD`.
pub const HEAD: &str = "HEAD";

/// A hosted-repository forge recognized by the short-form/web-form grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forge {
    GitHub,
    GitLab,
}

/// The parsed parts of a `github:`/`gitlab:` short form or equivalent web URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortForm {
    pub forge: Forge,
    pub owner: String,
    pub repo: String,
    pub subpath: Option<String>,
}

/// Returns `true` if `url` looks like a file the resolver should treat as a
/// `DirectFile` source: a bare `.py` or `.mpy` at the tail.
#[must_use]
pub fn is_direct_file_url(url: &str) -> bool {
    let tail = url.rsplit('/').next().unwrap_or(url);
    tail.ends_with(".py") || tail.ends_with(".mpy")
}

/// Classifies `url` as a `github:`/`gitlab:` short form or an equivalent
/// `github.com`/`gitlab.com` web URL, if it is one.
///
/// Returns `Ok(None)` for any other shape (an opaque `http(s)://` URL or a
/// bare identifier) so the caller can fall through to its own handling.
pub fn parse_short_form(url: &str) -> Result<Option<ShortForm>, Error> {
    if let Some(rest) = url.strip_prefix("github:") {
        let (owner, repo, subpath) = split_owner_repo(rest)?;
        return Ok(Some(ShortForm { forge: Forge::GitHub, owner, repo, subpath }));
    }
    if let Some(rest) = url.strip_prefix("gitlab:") {
        let (owner, repo, subpath) = split_owner_repo(rest)?;
        return Ok(Some(ShortForm { forge: Forge::GitLab, owner, repo, subpath }));
    }
    if let Some(rest) = strip_web_prefix(url, "https://github.com/") {
        let (owner, repo, subpath) = split_owner_repo(rest)?;
        return Ok(Some(ShortForm { forge: Forge::GitHub, owner, repo, subpath }));
    }
    if let Some(rest) = strip_web_prefix(url, "https://gitlab.com/") {
        let (owner, repo, subpath) = split_owner_repo(rest)?;
        return Ok(Some(ShortForm { forge: Forge::GitLab, owner, repo, subpath }));
    }
    Ok(None)
}

/// Normalizes `url` to a raw-content HTTP(S) URL, substituting `reference`
/// for any `<ref>` placeholder implied by a short-form or web form.
///
/// `reference` should already have been resolved to a concrete token by the
/// caller (e.g. `"HEAD"` standing for the default branch, or a tag/commit);
/// this function performs no further interpretation of it.
pub fn rewrite(url: &str, reference: &str) -> Result<String, Error> {
    if let Some(short) = parse_short_form(url)? {
        return Ok(raw_url(&short, reference));
    }

    if url.starts_with("http://") || url.starts_with("https://") {
        // Already raw (or at least not one of our known forge forms):
        // returned unchanged.
        return Ok(url.to_string());
    }

    Err(Error::MalformedSource(url.to_string()))
}

fn raw_url(short: &ShortForm, reference: &str) -> String {
    match short.forge {
        Forge::GitHub => match &short.subpath {
            Some(sub) => format!(
                "https://raw.githubusercontent.com/{}/{}/{reference}/{sub}",
                short.owner, short.repo
            ),
            None => format!(
                "https://raw.githubusercontent.com/{}/{}/{reference}",
                short.owner, short.repo
            ),
        },
        Forge::GitLab => match &short.subpath {
            Some(sub) => format!(
                "https://gitlab.com/{}/{}/-/raw/{reference}/{sub}",
                short.owner, short.repo
            ),
            None => format!(
                "https://gitlab.com/{}/{}/-/raw/{reference}",
                short.owner, short.repo
            ),
        },
    }
}

/// Strips a web-form prefix, additionally tolerating a `www.` host so both
/// forge UI URLs and `www.`-prefixed URLs normalize.
fn strip_web_prefix<'a>(url: &'a str, prefix: &str) -> Option<&'a str> {
    url.strip_prefix(prefix)
        .or_else(|| url.strip_prefix(&prefix.replacen("https://", "https://www.", 1)))
}

fn split_owner_repo(rest: &str) -> Result<(String, String, Option<String>), Error> {
    let rest = rest.trim_end_matches('/');
    let mut parts = rest.splitn(3, '/');
    let owner = parts.next().filter(|s| !s.is_empty());
    let repo = parts.next().filter(|s| !s.is_empty());
    let (owner, repo) = match (owner, repo) {
        (Some(o), Some(r)) => (o, r),
        _ => return Err(Error::MalformedSource(rest.to_string())),
    };
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    let subpath = parts.next().filter(|s| !s.is_empty());
    Ok((owner.to_string(), repo.to_string(), subpath.map(str::to_string)))
}

/// Parses a fully-formed raw URL, used by callers that need structured
/// access (host, path) to an already-rewritten URL.
pub fn parse(url: &str) -> Result<Url, Error> {
    Url::parse(url).map_err(|_| Error::MalformedSource(url.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_short_form_with_subpath() {
        let out = rewrite("github:arduino/modulino-mpy/src/modulino", "HEAD").unwrap();
        assert_eq!(
            out,
            "https://raw.githubusercontent.com/arduino/modulino-mpy/HEAD/src/modulino"
        );
    }

    #[test]
    fn github_short_form_without_subpath() {
        let out = rewrite("github:arduino/arduino-modulino-mpy", "HEAD").unwrap();
        assert_eq!(
            out,
            "https://raw.githubusercontent.com/arduino/arduino-modulino-mpy/HEAD"
        );
    }

    #[test]
    fn gitlab_short_form() {
        let out = rewrite("gitlab:owner/repo/path/to/file.py", "v1.0.0").unwrap();
        assert_eq!(
            out,
            "https://gitlab.com/owner/repo/-/raw/v1.0.0/path/to/file.py"
        );
    }

    #[test]
    fn github_web_url_folds_to_raw() {
        let out = rewrite("https://github.com/arduino/modulino-mpy", "HEAD").unwrap();
        assert_eq!(
            out,
            "https://raw.githubusercontent.com/arduino/modulino-mpy/HEAD"
        );
    }

    #[test]
    fn github_web_url_strips_git_suffix() {
        let out = rewrite("https://github.com/arduino/modulino-mpy.git", "HEAD").unwrap();
        assert_eq!(
            out,
            "https://raw.githubusercontent.com/arduino/modulino-mpy/HEAD"
        );
    }

    #[test]
    fn already_raw_url_passes_through_unchanged() {
        let raw = "https://raw.githubusercontent.com/arduino/modulino-mpy/HEAD/package.json";
        assert_eq!(rewrite(raw, "HEAD").unwrap(), raw);
    }

    #[test]
    fn idempotent_on_already_raw_urls() {
        let raw = "https://example.com/index/file/ab/abcdef";
        let once = rewrite(raw, "HEAD").unwrap();
        let twice = rewrite(&once, "HEAD").unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn truncated_short_form_is_malformed() {
        assert_eq!(
            rewrite("github:arduino", "HEAD"),
            Err(Error::MalformedSource("arduino".to_string()))
        );
    }

    #[test]
    fn direct_file_detection() {
        assert!(is_direct_file_url("https://example.com/lib/foo.py"));
        assert!(is_direct_file_url("https://example.com/lib/foo.mpy"));
        assert!(!is_direct_file_url("https://example.com/pkg/package.json"));
    }

    #[test]
    fn bare_identifier_is_not_a_short_form() {
        assert_eq!(parse_short_form("senml").unwrap(), None);
    }
}
