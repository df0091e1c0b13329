//! The fetch engine: scheme registry, dispatch, and the per-fetch handle.

use crate::*;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Reentrancy tag of one fetch context.
///
/// This replaces a boolean "locked" convention with a state the ring
/// iteration code pattern-matches on: callbacks into the parent may
/// themselves poll, abort or free, and the tag is what keeps a context
/// from being revisited or reaped out from under an executing callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    /// No callback is currently executing for this fetch.
    Idle,
    /// A callback into the parent is executing right now. Poll passes
    /// must skip this context.
    InCallback,
    /// The owner asked for the context to be freed. The fetcher reaps it
    /// at the next safe point of its poll pass.
    PendingFree,
}

/// Configuration parameters for the [FetchEngine].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FetchEngineConfig {
    /// How many scheme registrations the engine accepts. Default: 16.
    pub max_fetchers: usize,
}

impl Default for FetchEngineConfig {
    fn default() -> Self {
        Self { max_fetchers: 16 }
    }
}

/// Module-level configuration for the [FetchEngine].
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FetchEngineModConfig {
    /// FetchEngine configuration.
    pub fetch_engine: FetchEngineConfig,
}

impl config::ModConfig for FetchEngineModConfig {}

/// One in-flight fetch, as seen by the registry and by the parent that
/// requested it.
///
/// Created by [FetchEngine::setup], which pairs it with a context inside
/// the dispatched scheme fetcher. Destroyed only after the parent calls
/// [Fetch::free] - receiving a terminal event does not free anything by
/// itself.
#[derive(Debug)]
pub struct Fetch {
    url: FetchUrl,
    handler: DynFetchHandler,
    urldb: DynUrlDb,
    fetcher: DynFetcher,
    scheme: String,
    key: Cell<Option<FetchKey>>,
    http_code: Cell<u32>,
    aborted: Cell<bool>,
    state: Cell<FetchState>,
    verifiable: bool,
    referer: Option<FetchUrl>,
    send_referer: bool,
}

impl Fetch {
    /// The url this fetch refers to.
    pub fn url(&self) -> &FetchUrl {
        &self.url
    }

    /// The scheme this fetch was dispatched on.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The http response code, or 0 before one is known.
    pub fn http_code(&self) -> u32 {
        self.http_code.get()
    }

    /// Record the http response code. Invoked by the scheme fetcher ahead
    /// of the callbacks that depend on it.
    pub fn set_http_code(&self, code: u32) {
        self.http_code.set(code);
    }

    /// True once [Fetch::abort] has been called. Never cleared.
    pub fn aborted(&self) -> bool {
        self.aborted.get()
    }

    /// The current reentrancy tag.
    pub fn state(&self) -> FetchState {
        self.state.get()
    }

    /// The referer url to actually send, after policy. A referer crosses
    /// schemes only in the one sanctioned case of an https fetch referred
    /// from an http page (RFC 2616 15.1.3).
    pub fn referer_to_send(&self) -> Option<&str> {
        if self.send_referer {
            self.referer.as_ref().map(|r| r.as_str())
        } else {
            None
        }
    }

    /// Cookie header value for this fetch, from the url database.
    pub fn cookie_string(&self) -> Option<String> {
        self.urldb.cookie_string(&self.url)
    }

    /// Stored credentials for this fetch, from the url database.
    pub fn auth_details(&self) -> Option<String> {
        self.urldb.auth_details(&self.url)
    }

    /// True if TLS verification is disabled for this url by a recorded
    /// trust override.
    pub fn cert_verify_disabled(&self) -> bool {
        self.urldb.cert_verify_disabled(&self.url)
    }

    /// Forward a received `Set-Cookie:` value to the cookie store.
    ///
    /// An unverifiable transaction does not get to set cookies.
    pub fn set_cookie(&self, cookie: &str) {
        if self.verifiable {
            self.urldb.set_cookie(&self.url, cookie);
        }
    }

    /// Deliver one callback event to the parent, returning the aborted
    /// flag afterwards so delivery sites can stop work promptly.
    ///
    /// The state tag is [FetchState::InCallback] for exactly the duration
    /// of the handler call and is restored unconditionally - unless the
    /// handler freed this fetch from inside the callback, in which case it
    /// stays [FetchState::PendingFree] for the poll pass to act on.
    pub fn send_callback(&self, event: FetchEvent) -> bool {
        let prev = self.state.replace(FetchState::InCallback);
        tracing::trace!(url = %self.url, kind = event.kind(), "callback");
        self.handler.on_event(self, event);
        if self.state.get() != FetchState::PendingFree {
            self.state.set(prev);
        }
        self.aborted.get()
    }

    /// Begin actual work on this fetch. Returns `false` only if transport
    /// configuration failed.
    pub fn start(&self) -> bool {
        match self.key.get() {
            Some(key) => self.fetcher.start(key),
            None => false,
        }
    }

    /// Abort this fetch. Only sets the aborted flag; the release of
    /// transport state and the context happens on the next poll pass and
    /// the parent's `free`. Idempotent, and callable from inside a
    /// callback.
    pub fn abort(&self) {
        self.aborted.set(true);
        if let Some(key) = self.key.get() {
            self.fetcher.abort(key);
        }
    }

    /// Release the fetch context. Call after receiving a terminal event,
    /// or directly if the fetch was aborted before it started. Callable
    /// from inside a callback, in which case the reap is deferred to the
    /// delivering poll pass. Idempotent.
    pub fn free(&self) {
        self.state.set(FetchState::PendingFree);
        if let Some(key) = self.key.take() {
            self.fetcher.free(key);
        }
    }
}

#[derive(Debug, Clone)]
struct SchemeEntry {
    scheme: String,
    fetcher: DynFetcher,
}

/// The scheme-dispatching fetch registry.
///
/// One engine value is owned by the embedding application (there is no
/// process-wide registry) and every fetch flows through it: register the
/// scheme fetchers once at startup, call [FetchEngine::poll_all] from the
/// event loop tick, and [FetchEngine::shutdown] before exit.
#[derive(Debug)]
pub struct FetchEngine {
    entries: RefCell<Vec<SchemeEntry>>,
    urldb: DynUrlDb,
    max_fetchers: usize,
}

impl FetchEngine {
    /// Construct an engine. Prefer going through
    /// [builder::Builder::build], which also registers the configured
    /// fetchers.
    pub fn new(config: &config::Config, urldb: DynUrlDb) -> FetchResult<Self> {
        let conf: FetchEngineModConfig = config.get_module_config()?;
        Ok(Self {
            entries: RefCell::new(Vec::new()),
            urldb,
            max_fetchers: conf.fetch_engine.max_fetchers,
        })
    }

    /// Bind a scheme to a fetcher and initialise it.
    ///
    /// Fails recoverably on a duplicate scheme or a full table. An error
    /// out of the fetcher's own `initialise` is different: no fetching can
    /// work without its engine, so it is propagated for the embedder to
    /// treat as fatal.
    pub fn register(
        &self,
        scheme: &str,
        fetcher: DynFetcher,
    ) -> FetchResult<()> {
        let scheme = scheme.to_ascii_lowercase();
        let mut entries = self.entries.borrow_mut();
        if entries.len() >= self.max_fetchers {
            return Err(FetchError::other("fetcher table full"));
        }
        if entries.iter().any(|e| e.scheme == scheme) {
            return Err(FetchError::other(format!(
                "scheme already registered: {scheme}"
            )));
        }
        fetcher.initialise(&scheme)?;
        tracing::debug!(%scheme, "registered fetcher");
        entries.push(SchemeEntry { scheme, fetcher });
        Ok(())
    }

    /// Unregister every scheme, finalising each fetcher in reverse
    /// registration order. Fetchers shared between schemes release their
    /// engine-level state on their last finalise.
    pub fn shutdown(&self) {
        let mut entries = self.entries.borrow_mut();
        while let Some(entry) = entries.pop() {
            tracing::debug!(scheme = %entry.scheme, "finalise fetcher");
            entry.fetcher.finalise(&entry.scheme);
        }
    }

    /// True if some registered fetcher claims this url's scheme.
    pub fn can_fetch(&self, url: &FetchUrl) -> bool {
        self.lookup(url.scheme()).is_some()
    }

    fn lookup(&self, scheme: &str) -> Option<DynFetcher> {
        self.entries
            .borrow()
            .iter()
            .find(|e| e.scheme == scheme)
            .map(|e| e.fetcher.clone())
    }

    /// Create a fetch for the request, dispatching on the url scheme.
    ///
    /// Returns `None` when no fetcher claims the scheme or the fetcher
    /// could not represent the request. The fetch does no work until
    /// [Fetch::start] is called and the scheme is polled.
    pub fn setup(
        &self,
        handler: DynFetchHandler,
        request: FetchRequest,
    ) -> Option<Rc<Fetch>> {
        let scheme = request.url.scheme().to_string();
        let Some(fetcher) = self.lookup(&scheme) else {
            tracing::debug!(%scheme, "no fetcher for scheme");
            return None;
        };

        let send_referer = match &request.referer {
            Some(referer) => {
                referer.scheme() == scheme
                    || (scheme == "https" && referer.scheme() == "http")
            }
            None => false,
        };

        let fetch = Rc::new(Fetch {
            url: request.url.clone(),
            handler,
            urldb: self.urldb.clone(),
            fetcher: fetcher.clone(),
            scheme,
            key: Cell::new(None),
            http_code: Cell::new(0),
            aborted: Cell::new(false),
            state: Cell::new(FetchState::Idle),
            verifiable: request.verifiable,
            referer: request.referer.clone(),
            send_referer,
        });

        let key = fetcher.setup(fetch.clone(), request)?;
        fetch.key.set(Some(key));
        Some(fetch)
    }

    /// One cooperative tick for a single scheme.
    pub fn poll(&self, scheme: &str) {
        let scheme = scheme.to_ascii_lowercase();
        if let Some(fetcher) = self.lookup(&scheme) {
            fetcher.poll(&scheme);
        }
    }

    /// One cooperative tick for every registered scheme. This is the only
    /// place result callbacks fire; call it once per event loop
    /// iteration.
    pub fn poll_all(&self) {
        // snapshot so callbacks may re-enter the registry
        let entries: Vec<SchemeEntry> = self.entries.borrow().clone();
        for entry in entries {
            entry.fetcher.poll(&entry.scheme);
        }
    }
}
