use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    MalformedSource(#[from] upy_source::Error),

    #[error("manifest unavailable: {0}")]
    ManifestUnavailable(String),

    #[error("unsupported source: {0}")]
    UnsupportedSource(String),

    #[error("manifest has neither `urls` nor `hashes`")]
    MissingUrlsAndHashes,

    #[error("invalid manifest JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error(transparent)]
    Request(#[from] reqwest::Error),
}
