//! Fetching of data from http and https urls.
//!
//! This implementation drives libcurl's 'multi' interface through the
//! `curl` crate: every transfer is an `Easy2` handle owned by one global
//! `Multi`, `poll` runs the multiplexer's non-blocking step and harvests
//! completed transfers, and idle handles are parked per host in a bounded
//! [HandleCache](handle_cache::HandleCache) so repeat fetches reuse their
//! connections.
//!
//! One fetcher instance serves both `http` and `https`; the shared engine
//! state is reference counted across the two registrations and torn down
//! on the last finalise.

use crate::ring::{Arena, Links, Ring, Ringed};
use curl::easy::{Auth, Easy2, Form, Handler, List, WriteError};
use curl::multi::{Easy2Handle, Multi};
use kestrel_api::*;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

mod handle_cache;
mod transfer;

use super::util;
use handle_cache::HandleCache;
use transfer::{Flow, HttpTransfer, TransferOutcome};

/// CurlFetcher configuration types.
pub mod config {
    /// Proxy authentication mechanisms.
    #[derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        Default,
        serde::Serialize,
        serde::Deserialize,
    )]
    #[serde(rename_all = "lowercase")]
    pub enum ProxyAuthKind {
        /// No proxy authentication.
        #[default]
        None,
        /// Http basic authentication.
        Basic,
        /// NTLM authentication.
        Ntlm,
    }

    /// Configuration parameters for
    /// [CurlFetcherFactory](super::CurlFetcherFactory).
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct CurlFetcherConfig {
        /// How many idle connection handles to keep cached, one per
        /// host. Default: 6.
        pub max_cached_handles: usize,
        /// Connect timeout in seconds. Default: 30.
        pub connect_timeout_s: u64,
        /// Abort transfers slower than this many bytes per second...
        pub low_speed_limit: u32,
        /// ...for this many seconds. Default: 1 byte/s over 180 s.
        pub low_speed_time_s: u64,
        /// User-Agent header value.
        pub user_agent: String,
        /// Accept-Language preference; empty omits the header.
        pub accept_language: String,
        /// Accept-Charset preference; empty omits the header.
        pub accept_charset: String,
        /// Http proxy host; empty disables proxying.
        pub proxy_host: String,
        /// Http proxy port. Default: 8080.
        pub proxy_port: u16,
        /// Proxy authentication mechanism.
        pub proxy_auth: ProxyAuthKind,
        /// Proxy user name.
        pub proxy_user: String,
        /// Proxy password.
        pub proxy_pass: String,
        /// CA bundle file; empty uses the transport's default.
        pub ca_bundle: String,
    }

    impl Default for CurlFetcherConfig {
        fn default() -> Self {
            Self {
                max_cached_handles: 6,
                connect_timeout_s: 30,
                low_speed_limit: 1,
                low_speed_time_s: 180,
                user_agent: format!(
                    "kestrel/{}",
                    env!("CARGO_PKG_VERSION"),
                ),
                accept_language: String::new(),
                accept_charset: String::new(),
                proxy_host: String::new(),
                proxy_port: 8080,
                proxy_auth: ProxyAuthKind::None,
                proxy_user: String::new(),
                proxy_pass: String::new(),
                ca_bundle: String::new(),
            }
        }
    }

    /// Module-level configuration for CurlFetcher.
    #[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct CurlFetcherModConfig {
        /// CurlFetcher configuration.
        pub curl_fetcher: CurlFetcherConfig,
    }

    impl kestrel_api::config::ModConfig for CurlFetcherModConfig {}
}

use config::*;

/// A production-ready network fetcher for `http` and `https`.
#[derive(Debug)]
pub struct CurlFetcherFactory {}

impl CurlFetcherFactory {
    /// Construct a new CurlFetcherFactory.
    pub fn create() -> DynFetcherFactory {
        Rc::new(Self {})
    }
}

impl FetcherFactory for CurlFetcherFactory {
    fn default_config(
        &self,
        config: &mut kestrel_api::config::Config,
    ) -> FetchResult<()> {
        config.set_module_config(&CurlFetcherModConfig::default())
    }

    fn create(
        &self,
        builder: &builder::Builder,
    ) -> FetchResult<Vec<(String, DynFetcher)>> {
        let config: CurlFetcherModConfig =
            builder.config.get_module_config()?;
        let fetcher: DynFetcher =
            Rc::new(CurlFetcher::new(config.curl_fetcher));
        Ok(vec![
            ("http".to_string(), fetcher.clone()),
            ("https".to_string(), fetcher),
        ])
    }
}

/// The curl callback handler for one easy handle. Carries the transfer
/// state machine while the handle is attached to the multi, and nothing
/// while the handle sits in the cache.
struct CurlHandler {
    transfer: Option<HttpTransfer>,
}

impl Handler for CurlHandler {
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        match self.transfer.as_mut() {
            None => Ok(data.len()),
            Some(t) => match t.body_chunk(data) {
                Flow::Continue => Ok(data.len()),
                // a short write makes the engine fail the transfer with a
                // write error, which completion recognises as our stop
                Flow::Stop => Ok(0),
            },
        }
    }

    fn header(&mut self, data: &[u8]) -> bool {
        match self.transfer.as_mut() {
            None => true,
            Some(t) => t.header_line(data) == Flow::Continue,
        }
    }

    fn progress(
        &mut self,
        dltotal: f64,
        dlnow: f64,
        _ultotal: f64,
        _ulnow: f64,
    ) -> bool {
        if let Some(t) = self.transfer.as_mut() {
            t.progress(dlnow as u64, dltotal as u64);
        }
        true
    }
}

struct CurlCtx {
    key: FetchKey,
    fetch: Rc<Fetch>,
    host: String,
    headers: Vec<String>,
    post: Option<Post>,
    transfer: Option<HttpTransfer>,
    handle: Option<Easy2Handle<CurlHandler>>,
    dispatched: bool,
    links: Links,
}

impl Ringed for CurlCtx {
    fn links(&self) -> &Links {
        &self.links
    }
    fn links_mut(&mut self) -> &mut Links {
        &mut self.links
    }
}

/// Requests that arrived while the fetcher was mid-poll; replayed at the
/// next safe point.
enum Cmd {
    Admit(Box<CurlCtx>),
    Start(FetchKey),
    Free(FetchKey),
}

struct CurlInner {
    multi: Option<Multi>,
    cache: HandleCache<Easy2<CurlHandler>>,
    ctxs: Arena<CurlCtx>,
    ring: Ring,
    registered: usize,
}

impl CurlInner {
    fn find(&self, key: FetchKey) -> Option<usize> {
        self.ring.find(&self.ctxs, |c| c.key == key)
    }

    fn admit(&mut self, ctx: Box<CurlCtx>) {
        let idx = self.ctxs.insert(*ctx);
        self.ring.insert(&mut self.ctxs, idx);
    }
}

/// The curl-backed fetcher shared by the http and https registrations.
pub(crate) struct CurlFetcher {
    conf: CurlFetcherConfig,
    inner: RefCell<CurlInner>,
    cmds: RefCell<Vec<Cmd>>,
    next_key: Cell<u64>,
}

impl std::fmt::Debug for CurlFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurlFetcher").finish()
    }
}

impl CurlFetcher {
    fn new(conf: CurlFetcherConfig) -> Self {
        let cache = HandleCache::new(conf.max_cached_handles);
        Self {
            conf,
            inner: RefCell::new(CurlInner {
                multi: None,
                cache,
                ctxs: Arena::default(),
                ring: Ring::default(),
                registered: 0,
            }),
            cmds: RefCell::new(Vec::new()),
            next_key: Cell::new(1),
        }
    }

    fn alloc_key(&self) -> FetchKey {
        let key = self.next_key.get();
        self.next_key.set(key + 1);
        FetchKey(key)
    }

    /// A fresh easy handle carrying the options common to all fetches.
    fn fresh_handle(&self) -> Result<Easy2<CurlHandler>, curl::Error> {
        let mut easy = Easy2::new(CurlHandler { transfer: None });
        easy.useragent(&self.conf.user_agent)?;
        easy.accept_encoding("gzip")?;
        easy.low_speed_limit(self.conf.low_speed_limit)?;
        easy.low_speed_time(Duration::from_secs(self.conf.low_speed_time_s))?;
        easy.connect_timeout(Duration::from_secs(
            self.conf.connect_timeout_s,
        ))?;
        easy.progress(true)?;
        if !self.conf.ca_bundle.is_empty() {
            easy.cainfo(&self.conf.ca_bundle)?;
        }
        Ok(easy)
    }

    /// Dispatch one context: pick up a handle, configure it for the fetch
    /// and hand it to the multi. Returns false only when configuration
    /// failed.
    fn initiate(&self, inner: &mut CurlInner, key: FetchKey) -> bool {
        let Some(idx) = inner.find(key) else { return false };
        let CurlInner {
            multi,
            cache,
            ctxs,
            ..
        } = inner;

        let Some(ctx) = ctxs.get_mut(idx) else { return false };
        if ctx.dispatched {
            return true;
        }
        if ctx.fetch.aborted() {
            // aborted before any network activity: stay silent and wait
            // for the free
            return true;
        }
        let Some(multi) = multi.as_ref() else { return false };

        let mut easy = match cache.acquire(&ctx.host) {
            Some(easy) => easy,
            None => match self.fresh_handle() {
                Ok(easy) => easy,
                Err(e) => {
                    tracing::warn!("could not create transfer handle: {e}");
                    return false;
                }
            },
        };

        let Some(transfer) = ctx.transfer.take() else { return false };
        if let Err(e) = configure(
            &mut easy,
            &self.conf,
            &ctx.headers,
            &ctx.post,
            &ctx.fetch,
        ) {
            tracing::warn!(url = %ctx.fetch.url(), "configure transfer: {e}");
            ctx.transfer = Some(transfer);
            return false;
        }
        easy.get_mut().transfer = Some(transfer);

        match multi.add2(easy) {
            Ok(handle) => {
                ctx.handle = Some(handle);
                ctx.dispatched = true;
                true
            }
            Err(e) => {
                tracing::warn!("add transfer to multi: {e}");
                false
            }
        }
    }

    /// Replay requests that arrived while the fetcher was borrowed.
    fn drain_cmds(&self, inner: &mut CurlInner) {
        loop {
            let drained: Vec<Cmd> =
                self.cmds.borrow_mut().drain(..).collect();
            if drained.is_empty() {
                return;
            }
            for cmd in drained {
                match cmd {
                    Cmd::Admit(ctx) => inner.admit(ctx),
                    Cmd::Start(key) => {
                        if !self.initiate(inner, key) {
                            if let Some(idx) = inner.find(key) {
                                if let Some(ctx) = inner.ctxs.get(idx) {
                                    ctx.fetch.send_callback(
                                        FetchEvent::Error(
                                            "failed to start transfer"
                                                .to_string(),
                                        ),
                                    );
                                }
                            }
                        }
                    }
                    Cmd::Free(key) => self.reap(inner, key),
                }
            }
        }
    }

    /// Remove a context, detaching its transfer from the multi if one is
    /// still attached. A handle pulled out this way is discarded, not
    /// cached: it may be mid-transfer.
    fn reap(&self, inner: &mut CurlInner, key: FetchKey) {
        let Some(idx) = inner.find(key) else { return };
        inner.ring.remove(&mut inner.ctxs, idx);
        if let Some(mut ctx) = inner.ctxs.remove(idx) {
            if let Some(handle) = ctx.handle.take() {
                match inner.multi.as_ref() {
                    Some(multi) => {
                        if let Err(e) = multi.remove2(handle) {
                            tracing::warn!(
                                "remove transfer from multi: {e}"
                            );
                        }
                    }
                    None => drop(handle),
                }
            }
        }
    }

    /// Process the transfers the multiplexer reports as finished. The
    /// only place this fetcher's terminal events fire.
    fn harvest(&self, inner: &mut CurlInner) {
        let mut done: Vec<(usize, Option<curl::Error>)> = Vec::new();
        {
            let CurlInner {
                multi, ctxs, ring, ..
            } = &mut *inner;
            let Some(multi) = multi.as_ref() else { return };
            multi.messages(|msg| {
                let mut cur = ring.head();
                while let Some(idx) = cur {
                    let Some(ctx) = ctxs.get(idx) else { break };
                    if let Some(handle) = ctx.handle.as_ref() {
                        if let Some(result) = msg.result_for2(handle) {
                            done.push((idx, result.err()));
                            break;
                        }
                    }
                    cur = ring.next(ctxs, idx);
                    if cur == ring.head() {
                        break;
                    }
                }
            });
        }

        for (idx, err) in done {
            let CurlInner {
                multi,
                cache,
                ctxs,
                ..
            } = &mut *inner;
            let Some(multi) = multi.as_ref() else { return };
            let Some(ctx) = ctxs.get_mut(idx) else { continue };
            let Some(handle) = ctx.handle.take() else { continue };
            let host = ctx.host.clone();

            let mut easy = match multi.remove2(handle) {
                Ok(easy) => easy,
                Err(e) => {
                    tracing::warn!("remove transfer from multi: {e}");
                    continue;
                }
            };
            let transfer = easy.get_mut().transfer.take();

            // park the handle for reuse against the same host
            cache.release(&host, easy);

            if let Some(mut transfer) = transfer {
                let outcome = match err {
                    None => TransferOutcome::Ok,
                    Some(e) => outcome_of(e),
                };
                tracing::debug!(url = %transfer.fetch().url(), "transfer done");
                transfer.completion(outcome);
            }
        }
    }
}

impl Fetcher for CurlFetcher {
    fn initialise(&self, scheme: &str) -> FetchResult<()> {
        let mut inner = self.inner.try_borrow_mut().map_err(|_| {
            FetchError::other("curl fetcher initialised while polling")
        })?;
        if inner.registered == 0 {
            tracing::debug!(
                version = curl::Version::get().version(),
                "initialising curl fetch engine",
            );
            inner.multi = Some(Multi::new());
        }
        inner.registered += 1;
        tracing::debug!(%scheme, "initialise curl fetcher");
        Ok(())
    }

    fn setup(
        &self,
        fetch: Rc<Fetch>,
        request: FetchRequest,
    ) -> Option<FetchKey> {
        let key = self.alloc_key();
        let (last_modified, file_etag) =
            util::parse_conditionals(&request.headers);
        let transfer = HttpTransfer::new(
            fetch.clone(),
            request.only_2xx,
            request.post.is_some(),
            last_modified,
            file_etag,
        );
        let ctx = Box::new(CurlCtx {
            key,
            host: request.url.host().to_string(),
            headers: build_headers(&self.conf, &request.headers),
            post: request.post,
            transfer: Some(transfer),
            handle: None,
            dispatched: false,
            links: Links::default(),
            fetch,
        });

        match self.inner.try_borrow_mut() {
            Ok(mut inner) => inner.admit(ctx),
            // setup issued from inside a callback; admitted next poll
            Err(_) => self.cmds.borrow_mut().push(Cmd::Admit(ctx)),
        }
        Some(key)
    }

    fn start(&self, key: FetchKey) -> bool {
        match self.inner.try_borrow_mut() {
            Ok(mut inner) => {
                self.drain_cmds(&mut inner);
                self.initiate(&mut inner, key)
            }
            Err(_) => {
                // reentrant start; dispatched on the next poll, with a
                // configuration failure reported as an Error event then
                self.cmds.borrow_mut().push(Cmd::Start(key));
                true
            }
        }
    }

    fn abort(&self, _key: FetchKey) {
        // the shared aborted flag on the fetch handle is the whole
        // mechanism: the transfer callbacks notice it and halt, and the
        // completion step stays silent
    }

    fn free(&self, key: FetchKey) {
        match self.inner.try_borrow_mut() {
            Ok(mut inner) => self.reap(&mut inner, key),
            Err(_) => self.cmds.borrow_mut().push(Cmd::Free(key)),
        }
    }

    fn poll(&self, _scheme: &str) {
        let Ok(mut inner) = self.inner.try_borrow_mut() else {
            // reentrant tick from inside a callback; the outer pass is
            // already doing the work
            return;
        };
        self.drain_cmds(&mut inner);
        if inner.multi.is_none() {
            return;
        }

        // the multiplexer's non-blocking step
        if let Some(multi) = inner.multi.as_ref() {
            if let Err(e) = multi.perform() {
                tracing::warn!("curl multi perform: {e}");
                return;
            }
        }

        self.harvest(&mut inner);

        // requests made from inside completion callbacks
        self.drain_cmds(&mut inner);
    }

    fn finalise(&self, scheme: &str) {
        let Ok(mut inner) = self.inner.try_borrow_mut() else {
            tracing::warn!("curl fetcher finalised while polling; ignored");
            return;
        };
        inner.registered = inner.registered.saturating_sub(1);
        tracing::debug!(%scheme, "finalise curl fetcher");
        if inner.registered == 0 {
            if !inner.ring.is_empty() {
                tracing::warn!("curl fetcher finalised with live fetches");
            }
            inner.cache.clear();
            // the last registration releases the engine itself
            inner.multi = None;
        }
    }
}

/// The outbound header list: strip the engine's default `Pragma` and
/// `Expect: 100-continue` headers, advertise the configured language and
/// charset preferences, then append whatever the caller supplied.
fn build_headers(
    conf: &CurlFetcherConfig,
    request_headers: &[String],
) -> Vec<String> {
    let mut headers = Vec::with_capacity(request_headers.len() + 4);
    headers.push("Pragma:".to_string());
    // the default "Expect: 100-continue" on POSTs trips up enough
    // servers to be worth suppressing
    headers.push("Expect:".to_string());
    if !conf.accept_language.is_empty() {
        headers
            .push(format!("Accept-Language: {}, *;q=0.1", conf.accept_language));
    }
    if !conf.accept_charset.is_empty() {
        headers
            .push(format!("Accept-Charset: {}, *;q=0.1", conf.accept_charset));
    }
    headers.extend(request_headers.iter().cloned());
    headers
}

/// Options specific to one fetch, applied to a fresh or reused handle.
/// Every option a previous fetch may have set is re-set here so a cached
/// handle cannot leak state between hosts' fetches.
fn configure(
    easy: &mut Easy2<CurlHandler>,
    conf: &CurlFetcherConfig,
    headers: &[String],
    post: &Option<Post>,
    fetch: &Rc<Fetch>,
) -> Result<(), curl::Error> {
    easy.url(fetch.url().as_str())?;
    easy.referer(fetch.referer_to_send().unwrap_or(""))?;

    let mut list = List::new();
    for line in headers {
        list.append(line)?;
    }
    easy.http_headers(list)?;

    match post {
        None => easy.get(true)?,
        Some(Post::Urlencoded(body)) => {
            easy.post(true)?;
            easy.post_fields_copy(body.as_bytes())?;
        }
        Some(Post::Multipart(parts)) => {
            easy.httppost(build_form(parts))?;
        }
    }

    easy.cookie(&fetch.cookie_string().unwrap_or_default())?;

    match fetch.auth_details() {
        Some(userpwd) => {
            let (user, pass) = userpwd
                .split_once(':')
                .unwrap_or((userpwd.as_str(), ""));
            easy.username(user)?;
            easy.password(pass)?;
            let mut auth = Auth::new();
            auth.basic(true).digest(true).ntlm(true);
            easy.http_auth(&auth)?;
        }
        None => {
            easy.username("")?;
            easy.password("")?;
        }
    }

    if !conf.proxy_host.is_empty() {
        easy.proxy(&conf.proxy_host)?;
        easy.proxy_port(conf.proxy_port)?;
        match conf.proxy_auth {
            ProxyAuthKind::None => {}
            ProxyAuthKind::Basic => {
                let mut auth = Auth::new();
                auth.basic(true);
                easy.proxy_auth(&auth)?;
                easy.proxy_username(&conf.proxy_user)?;
                easy.proxy_password(&conf.proxy_pass)?;
            }
            ProxyAuthKind::Ntlm => {
                let mut auth = Auth::new();
                auth.ntlm(true);
                easy.proxy_auth(&auth)?;
                easy.proxy_username(&conf.proxy_user)?;
                easy.proxy_password(&conf.proxy_pass)?;
            }
        }
    }

    let verify = !fetch.cert_verify_disabled();
    easy.ssl_verify_peer(verify)?;
    easy.ssl_verify_host(verify)?;

    Ok(())
}

/// Convert the caller's multipart description for the engine. Parts the
/// engine refuses are logged and skipped, matching how form encoding
/// failures have always been treated here: a damaged form beats no form.
fn build_form(parts: &[MultipartPart]) -> Form {
    let mut form = Form::new();
    for part in parts {
        let result = match part {
            MultipartPart::Text { name, value } => {
                form.part(name).contents(value.as_bytes()).add()
            }
            MultipartPart::File {
                name,
                path,
                filename,
                mime,
            } => {
                let mut p = form.part(name);
                p.file(path)
                    .filename(filename.as_str())
                    .content_type(mime.as_deref().unwrap_or("text/plain"));
                p.add()
            }
        };
        if let Err(e) = result {
            tracing::warn!("multipart form part refused: {e}");
        }
    }
    form
}

/// Classify the engine's failure for completion processing.
fn outcome_of(err: curl::Error) -> TransferOutcome {
    let diag = err.description().to_string();
    if err.is_partial_file() {
        TransferOutcome::PartialFile
    } else if err.is_write_error() {
        TransferOutcome::WriteStop(diag)
    } else if err.is_peer_failed_verification() || err.is_ssl_cacert() {
        TransferOutcome::SslVerify(diag)
    } else {
        TransferOutcome::Failed(diag)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use kestrel_api::config::Config;

    #[test]
    fn factory_serves_both_http_schemes_with_one_engine() {
        let builder = builder::Builder {
            config: Config::default(),
            urldb: Rc::new(NullUrlDb),
            fetchers: vec![],
        };
        let pairs = CurlFetcherFactory {}.create(&builder).unwrap();
        assert_eq!(2, pairs.len());
        assert_eq!("http", pairs[0].0);
        assert_eq!("https", pairs[1].0);
        assert!(Rc::ptr_eq(&pairs[0].1, &pairs[1].1));
    }

    #[test]
    fn default_config_contributes_a_section() {
        let mut config = Config::default();
        CurlFetcherFactory {}.default_config(&mut config).unwrap();
        let round: CurlFetcherModConfig = config.get_module_config().unwrap();
        assert_eq!(6, round.curl_fetcher.max_cached_handles);
        assert_eq!(30, round.curl_fetcher.connect_timeout_s);
    }

    #[test]
    fn engine_state_is_refcounted_across_schemes() {
        let fetcher = CurlFetcher::new(CurlFetcherConfig::default());
        fetcher.initialise("http").unwrap();
        fetcher.initialise("https").unwrap();
        assert!(fetcher.inner.borrow().multi.is_some());

        fetcher.finalise("http");
        // one registration left keeps the engine alive
        assert!(fetcher.inner.borrow().multi.is_some());

        fetcher.finalise("https");
        assert!(fetcher.inner.borrow().multi.is_none());

        // polling a torn-down engine is a harmless no-op
        fetcher.poll("http");
    }

    #[test]
    fn header_list_strips_engine_defaults() {
        let mut conf = CurlFetcherConfig::default();
        conf.accept_language = "en-GB".to_string();
        let headers = build_headers(
            &conf,
            &["X-Custom: yes".to_string()],
        );
        assert_eq!("Pragma:", headers[0]);
        assert_eq!("Expect:", headers[1]);
        assert_eq!("Accept-Language: en-GB, *;q=0.1", headers[2]);
        assert_eq!("X-Custom: yes", headers[3]);
    }

    #[test]
    fn setup_then_abort_then_free_is_silent() {
        #[derive(Debug, Default)]
        struct PanicHandler;
        impl FetchHandler for PanicHandler {
            fn on_event(&self, _fetch: &Fetch, event: FetchEvent) {
                panic!("no event expected, got {}", event.kind());
            }
        }

        let fetcher = Rc::new(CurlFetcher::new(CurlFetcherConfig::default()));
        let engine =
            FetchEngine::new(&Config::default(), Rc::new(NullUrlDb))
                .unwrap();
        engine.register("http", fetcher.clone()).unwrap();

        let fetch = engine
            .setup(
                Rc::new(PanicHandler),
                FetchRequest::new(
                    FetchUrl::parse("http://example.invalid/").unwrap(),
                ),
            )
            .unwrap();
        assert_eq!(1, fetcher.inner.borrow().ring.len(&fetcher.inner.borrow().ctxs));

        fetch.abort();
        fetch.free();
        assert!(fetcher.inner.borrow().ring.is_empty());
        assert!(fetcher.inner.borrow().ctxs.is_empty());

        engine.shutdown();
    }
}

