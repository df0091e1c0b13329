//! Builder-related types.

use crate::*;

/// The general kestrel builder. This contains both configuration and
/// factory instances, allowing construction of a runtime [FetchEngine]
/// with its scheme fetchers registered.
#[derive(Debug)]
pub struct Builder {
    /// The module configuration to be used when building the engine and
    /// the fetchers. This can be loaded from disk or modified before
    /// building.
    pub config: config::Config,

    /// The [UrlDb] collaborator consulted for cookies, credentials and
    /// certificate trust overrides.
    pub urldb: DynUrlDb,

    /// The [FetcherFactory] instances to build and register, in
    /// registration order.
    pub fetchers: Vec<DynFetcherFactory>,
}

impl Builder {
    /// Construct a default config given the configured fetcher factories.
    /// Call this before handing the config to a human or to `build`.
    pub fn set_default_config(&mut self) -> FetchResult<()> {
        self.config
            .set_module_config(&FetchEngineModConfig::default())?;
        for factory in &self.fetchers {
            factory.default_config(&mut self.config)?;
        }
        Ok(())
    }

    /// Build the engine and register every factory's schemes.
    ///
    /// A failure here - most importantly a fetcher's `initialise` failing
    /// - is fatal: without its transport engine nothing can be fetched,
    /// so the embedding application must not proceed.
    pub fn build(self) -> FetchResult<FetchEngine> {
        let engine = FetchEngine::new(&self.config, self.urldb.clone())?;
        for factory in &self.fetchers {
            for (scheme, fetcher) in factory.create(&self)? {
                engine.register(&scheme, fetcher)?;
            }
        }
        Ok(engine)
    }
}
