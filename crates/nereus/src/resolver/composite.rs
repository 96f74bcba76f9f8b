//! Scheme dispatch over a set of resolvers.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, warn};

use super::{ArchiveResolver, ByteStream, ContentResolver, FileResolver, ResourceMetadata};
use crate::error::{Error, Result};
use crate::location::ResourceLocation;

/// Routes each request to the resolver registered for the location's scheme.
#[derive(Default)]
pub struct CompositeResolver {
    resolvers: HashMap<String, Box<dyn ContentResolver>>,
}

impl fmt::Debug for CompositeResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<_> = self.resolvers.keys().collect();
        schemes.sort();
        f.debug_struct("CompositeResolver")
            .field("schemes", &schemes)
            .finish()
    }
}

impl CompositeResolver {
    /// A composite with no resolvers registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A composite serving `file:` and `archive:` locations.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut composite = Self::new();
        composite.register(Box::new(FileResolver::new()));
        composite.register(Box::new(ArchiveResolver::new()));
        composite
    }

    /// Register a resolver for its scheme, replacing any previous one.
    pub fn register(&mut self, resolver: Box<dyn ContentResolver>) {
        let scheme = resolver.scheme().to_ascii_lowercase();
        if self.resolvers.insert(scheme.clone(), resolver).is_some() {
            debug!(scheme = %scheme, "Replaced content resolver");
        }
    }

    /// Whether a resolver is registered for `scheme`.
    #[must_use]
    pub fn supports(&self, scheme: &str) -> bool {
        self.resolvers.contains_key(scheme)
    }

    fn resolver_for(&self, location: &ResourceLocation) -> Result<&dyn ContentResolver> {
        self.resolvers
            .get(location.scheme())
            .map(|resolver| -> &dyn ContentResolver { resolver.as_ref() })
            .ok_or_else(|| Error::UnsupportedScheme(location.scheme().to_string()))
    }
}

impl ContentResolver for CompositeResolver {
    fn scheme(&self) -> &str {
        "*"
    }

    fn open_stream(&self, location: &ResourceLocation) -> Result<ByteStream> {
        self.resolver_for(location)?.open_stream(location)
    }

    fn exists(&self, location: &ResourceLocation) -> Result<bool> {
        self.resolver_for(location)?.exists(location)
    }

    fn list_children(&self, location: &ResourceLocation) -> Result<Vec<ResourceLocation>> {
        self.resolver_for(location)?.list_children(location)
    }

    fn metadata(&self, location: &ResourceLocation) -> Result<ResourceMetadata> {
        self.resolver_for(location)?.metadata(location)
    }

    /// Shuts down every resolver, returning the first failure after all ran.
    fn shutdown(&self) -> Result<()> {
        let mut first_error = None;
        for (scheme, resolver) in &self.resolvers {
            if let Err(e) = resolver.shutdown() {
                warn!(scheme = %scheme, error = %e, "Resolver shutdown failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
