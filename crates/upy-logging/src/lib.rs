//! Logging setup for the package pipeline.
//!
//! The embedding application (the out-of-scope CLI or HTTP service) decides
//! *whether* to log and at what verbosity; this crate only knows *how*,
//! mirroring the split between `puffin-cli`'s argv parsing and its
//! `logging::setup_logging` helper.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};
use tracing_tree::time::Uptime;

/// Verbosity requested by the embedding application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    #[default]
    Default,
    Verbose,
}

impl Verbosity {
    fn level_filter(self) -> LevelFilter {
        match self {
            Verbosity::Quiet => LevelFilter::WARN,
            Verbosity::Default => LevelFilter::INFO,
            Verbosity::Verbose => LevelFilter::TRACE,
        }
    }
}

/// Installs a global `tracing` subscriber writing a hierarchical trace to
/// stderr. Chatty transport crates (`reqwest`, `tokio`) are pinned to `WARN`
/// regardless of the requested verbosity so board-protocol spans stay legible.
///
/// Safe to call at most once per process; a second call returns an error
/// rather than panicking.
pub fn init(verbosity: Verbosity) -> anyhow::Result<()> {
    let targets = Targets::new()
        .with_target("reqwest", LevelFilter::WARN)
        .with_target("tokio", LevelFilter::WARN)
        .with_target("hyper", LevelFilter::WARN)
        .with_default(verbosity.level_filter());

    let subscriber = Registry::default().with(
        tracing_tree::HierarchicalLayer::default()
            .with_targets(true)
            .with_writer(std::io::stderr)
            .with_timer(Uptime::default())
            .with_filter(EnvFilter::from_default_env())
            .with_filter(targets),
    );
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
