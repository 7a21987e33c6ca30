//! Manifest fetching and resolution (§4.2): turns a user-supplied source
//! reference into an ordered list of resolved [`Manifest`]s covering the
//! root package and every transitive dependency.

mod error;
mod model;
mod repo_ref;
mod resolver;

pub use error::Error;
pub use model::{DepEdge, Manifest};
pub use repo_ref::{Host, RepoRef};
pub use resolver::{IndexFormat, ManifestResolver};
