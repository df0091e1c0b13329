#![deny(missing_docs)]
//! Kestrel url fetching: the production scheme fetchers and the ring
//! primitives they are built on.
//!
//! The usual embedding sequence is:
//!
//! 1. [default_builder], adjust [builder::Builder::config] as needed
//!    (after [builder::Builder::set_default_config]).
//! 2. [builder::Builder::build] to obtain the engine with every scheme
//!    registered.
//! 3. [FetchEngine::setup](kestrel_api::FetchEngine::setup) /
//!    [Fetch::start](kestrel_api::Fetch::start) per fetch, and
//!    [FetchEngine::poll_all](kestrel_api::FetchEngine::poll_all) once per
//!    event loop tick.
//! 4. [FetchEngine::shutdown](kestrel_api::FetchEngine::shutdown) before
//!    exit.

use kestrel_api::{builder, config::Config, NullUrlDb};

/// Construct a production-ready default builder.
///
/// - `urldb` - the default url database is the no-op [NullUrlDb].
/// - `http` / `https` - the curl-backed
///   [CurlFetcherFactory](fetchers::CurlFetcherFactory).
/// - `file` - [FileFetcherFactory](fetchers::FileFetcherFactory).
/// - `data` - [DataFetcherFactory](fetchers::DataFetcherFactory).
/// - `resource` - [ResourceFetcherFactory](fetchers::ResourceFetcherFactory).
/// - `doi` - [DoiFetcherFactory](fetchers::DoiFetcherFactory).
pub fn default_builder() -> builder::Builder {
    builder::Builder {
        config: Config::default(),
        urldb: std::rc::Rc::new(NullUrlDb),
        fetchers: vec![
            fetchers::CurlFetcherFactory::create(),
            fetchers::FileFetcherFactory::create(),
            fetchers::DataFetcherFactory::create(),
            fetchers::ResourceFetcherFactory::create(),
            fetchers::DoiFetcherFactory::create(),
        ],
    }
}

pub mod ring;

pub mod fetchers;
