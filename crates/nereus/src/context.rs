//! Run-scoped context handed to every unit.

use tracing::debug;

use crate::config::Config;
use crate::error::Result;
use crate::resolver::{CompositeResolver, ContentResolver};

/// Everything a unit may read during a run: the content resolver and the
/// configuration.
///
/// The context owns the resolver and therefore the archive handle cache and
/// any materialized nested archives. [`close`](Self::close) releases them; it
/// also runs on drop.
#[derive(Debug)]
pub struct RunContext {
    resolver: CompositeResolver,
    config: Config,
    closed: bool,
}

impl RunContext {
    #[must_use]
    pub fn new(resolver: CompositeResolver, config: Config) -> Self {
        Self {
            resolver,
            config,
            closed: false,
        }
    }

    /// Context with the default `file` and `archive` resolvers.
    #[must_use]
    pub fn with_defaults(config: Config) -> Self {
        Self::new(CompositeResolver::with_defaults(), config)
    }

    #[must_use]
    pub fn resolver(&self) -> &CompositeResolver {
        &self.resolver
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Release cached archive handles and temporary files.
    ///
    /// Safe to call more than once; the resolver recreates caches lazily if
    /// the context is used again.
    pub fn close(&mut self) -> Result<()> {
        self.closed = true;
        debug!("Closing run context");
        self.resolver.shutdown()
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.resolver.shutdown() {
                tracing::warn!(error = %e, "Failed to release resolver caches");
            }
        }
    }
}
