//! Fetcher-related types: the per-scheme implementation contract.

use crate::*;
use std::rc::Rc;

/// Identifies one fetch context within its owning [Fetcher].
///
/// Keys are allocated by the fetcher and never reused, so a stale key
/// (say, a double free) misses instead of hitting a recycled context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchKey(pub u64);

/// One part of a multipart/form-data request body.
#[derive(Debug, Clone)]
pub enum MultipartPart {
    /// A plain text form control.
    Text {
        /// Control name.
        name: String,
        /// Control value.
        value: String,
    },
    /// A file upload form control.
    File {
        /// Control name.
        name: String,
        /// Path of the local file to upload.
        path: std::path::PathBuf,
        /// Leaf name reported to the server.
        filename: String,
        /// MIME type of the file, `None` for `text/plain`.
        mime: Option<String>,
    },
}

/// Body to submit with a request. A request with a body is sent as a POST.
#[derive(Debug, Clone)]
pub enum Post {
    /// An application/x-www-form-urlencoded body.
    Urlencoded(String),
    /// A multipart/form-data body.
    Multipart(Vec<MultipartPart>),
}

/// Everything a scheme implementation needs to set up one fetch.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// The url to fetch.
    pub url: FetchUrl,
    /// Treat any non-2xx http response as an error instead of delivering
    /// its body.
    pub only_2xx: bool,
    /// Optional request body.
    pub post: Option<Post>,
    /// Extra request headers, one complete `Name: value` line each.
    pub headers: Vec<String>,
    /// The referring url, if the caller wants one considered. Whether it
    /// is actually sent is the engine's policy decision.
    pub referer: Option<FetchUrl>,
    /// The transaction was initiated by a user action on the url itself
    /// (address bar, link click). Unverifiable fetches do not get their
    /// cookies stored.
    pub verifiable: bool,
}

impl FetchRequest {
    /// A plain GET request for `url` with default options.
    pub fn new(url: FetchUrl) -> Self {
        Self {
            url,
            only_2xx: false,
            post: None,
            headers: Vec::new(),
            referer: None,
            verifiable: true,
        }
    }
}

/// A scheme implementation: the seven operations every fetcher provides.
///
/// One fetcher instance may be registered under several schemes (the curl
/// fetcher serves both `http` and `https`); `initialise` and `finalise`
/// are then invoked once per scheme and the implementation reference
/// counts its shared engine state internally.
pub trait Fetcher: 'static + std::fmt::Debug {
    /// Called when the scheme is registered. Must be idempotent across the
    /// schemes sharing one engine, and must not fail for recoverable
    /// reasons - an error here is fatal to startup.
    fn initialise(&self, scheme: &str) -> FetchResult<()>;

    /// Create a context for one fetch and insert it into this fetcher's
    /// ring. Returns `None` only when the request cannot be represented
    /// (for the network fetcher, a malformed request).
    fn setup(&self, fetch: Rc<Fetch>, request: FetchRequest)
        -> Option<FetchKey>;

    /// Begin actual work on a context created by `setup`. Returns `false`
    /// only if configuring the transport failed - never because of
    /// network state, which is asynchronous.
    fn start(&self, key: FetchKey) -> bool;

    /// Note an abort request. The shared aborted flag on the fetch handle
    /// is set before this is called; implementations only add their own
    /// marking (if any) and must not tear anything down synchronously.
    fn abort(&self, key: FetchKey);

    /// Release the context. Called by the fetch-result consumer after a
    /// terminal event, or directly after an early abort. Safe to call from
    /// inside a callback; the actual reaping may then be deferred to the
    /// current poll pass.
    fn free(&self, key: FetchKey);

    /// One cooperative scheduling tick: make progress on every live
    /// context and deliver any pending callbacks. Must return promptly.
    fn poll(&self, scheme: &str);

    /// Called when the scheme is unregistered. The last finalise of a
    /// shared engine releases engine-level resources.
    fn finalise(&self, scheme: &str);
}

/// Trait-object [Fetcher].
pub type DynFetcher = Rc<dyn Fetcher>;

/// A factory for creating [Fetcher] instances and binding them to their
/// schemes.
pub trait FetcherFactory: 'static + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen module
    /// factories.
    fn default_config(&self, config: &mut config::Config) -> FetchResult<()>;

    /// Construct the fetcher and name the schemes it serves. A shared
    /// implementation returns the same instance under several schemes.
    fn create(
        &self,
        builder: &builder::Builder,
    ) -> FetchResult<Vec<(String, DynFetcher)>>;
}

/// Trait-object [FetcherFactory].
pub type DynFetcherFactory = Rc<dyn FetcherFactory>;
