//! The scheme fetcher implementations provided by kestrel.

pub(crate) mod util;

pub mod curl;
pub use curl::CurlFetcherFactory;

pub mod file;
pub use file::FileFetcherFactory;

pub mod data;
pub use data::DataFetcherFactory;

pub mod resource;
pub use resource::ResourceFetcherFactory;

pub mod doi;
pub use doi::DoiFetcherFactory;
