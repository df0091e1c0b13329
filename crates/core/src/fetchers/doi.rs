//! doi: url handling.
//!
//! A digital object identifier is not fetchable directly; the fetcher
//! validates the identifier and redirects to the public resolver, which
//! answers with the landing page of the object.

use crate::ring::{Arena, Links, Ring, Ringed};
use kestrel_api::*;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// DoiFetcher configuration types.
pub mod config {
    /// Configuration parameters for
    /// [DoiFetcherFactory](super::DoiFetcherFactory).
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct DoiFetcherConfig {
        /// Resolver the redirect points at. Default: `https://doi.org/`.
        pub resolver: String,
    }

    impl Default for DoiFetcherConfig {
        fn default() -> Self {
            Self {
                resolver: "https://doi.org/".to_string(),
            }
        }
    }

    /// Module-level configuration for DoiFetcher.
    #[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct DoiFetcherModConfig {
        /// DoiFetcher configuration.
        pub doi_fetcher: DoiFetcherConfig,
    }

    impl kestrel_api::config::ModConfig for DoiFetcherModConfig {}
}

use config::*;

/// The resolver-redirect fetcher for `doi:` urls.
#[derive(Debug)]
pub struct DoiFetcherFactory {}

impl DoiFetcherFactory {
    /// Construct a new DoiFetcherFactory.
    pub fn create() -> DynFetcherFactory {
        Rc::new(Self {})
    }
}

impl FetcherFactory for DoiFetcherFactory {
    fn default_config(
        &self,
        config: &mut kestrel_api::config::Config,
    ) -> FetchResult<()> {
        config.set_module_config(&DoiFetcherModConfig::default())
    }

    fn create(
        &self,
        builder: &builder::Builder,
    ) -> FetchResult<Vec<(String, DynFetcher)>> {
        let config: DoiFetcherModConfig = builder.config.get_module_config()?;
        Ok(vec![(
            "doi".to_string(),
            Rc::new(DoiFetcher::new(config.doi_fetcher)) as DynFetcher,
        )])
    }
}

struct DoiCtx {
    key: FetchKey,
    fetch: Rc<Fetch>,
    ident: String,
    started: bool,
    claimed: bool,
    links: Links,
}

impl Ringed for DoiCtx {
    fn links(&self) -> &Links {
        &self.links
    }
    fn links_mut(&mut self) -> &mut Links {
        &mut self.links
    }
}

#[derive(Debug, Default)]
struct DoiInner {
    ctxs: Arena<DoiCtx>,
    ring: Ring,
}

#[derive(Debug)]
struct DoiFetcher {
    conf: DoiFetcherConfig,
    inner: RefCell<DoiInner>,
    next_key: Cell<u64>,
}

impl DoiFetcher {
    fn new(conf: DoiFetcherConfig) -> Self {
        Self {
            conf,
            inner: RefCell::new(DoiInner::default()),
            next_key: Cell::new(1),
        }
    }
}

impl Fetcher for DoiFetcher {
    fn initialise(&self, scheme: &str) -> FetchResult<()> {
        tracing::debug!(%scheme, "initialise doi fetcher");
        Ok(())
    }

    fn setup(
        &self,
        fetch: Rc<Fetch>,
        request: FetchRequest,
    ) -> Option<FetchKey> {
        let key = FetchKey(self.next_key.get());
        self.next_key.set(key.0 + 1);

        let ident = request.url.path().trim_start_matches('/').to_string();
        let mut inner = self.inner.borrow_mut();
        let idx = inner.ctxs.insert(DoiCtx {
            key,
            fetch,
            ident,
            started: false,
            claimed: false,
            links: Links::default(),
        });
        let inner = &mut *inner;
        inner.ring.insert(&mut inner.ctxs, idx);
        Some(key)
    }

    fn start(&self, key: FetchKey) -> bool {
        let mut inner = self.inner.borrow_mut();
        let Some(idx) = inner.ring.find(&inner.ctxs, |c| c.key == key) else {
            return false;
        };
        if let Some(ctx) = inner.ctxs.get_mut(idx) {
            ctx.started = true;
        }
        true
    }

    fn abort(&self, _key: FetchKey) {}

    fn free(&self, key: FetchKey) {
        let Ok(mut inner) = self.inner.try_borrow_mut() else {
            tracing::warn!("doi fetch free raced a scan; leaking context");
            return;
        };
        let Some(idx) = inner.ring.find(&inner.ctxs, |c| c.key == key) else {
            return;
        };
        let inner = &mut *inner;
        inner.ring.remove(&mut inner.ctxs, idx);
        inner.ctxs.remove(idx);
    }

    fn poll(&self, _scheme: &str) {
        loop {
            let Ok(mut inner) = self.inner.try_borrow_mut() else { return };

            let mut job = None;
            let mut cur = inner.ring.head();
            while let Some(idx) = cur {
                let next = inner.ring.next(&inner.ctxs, idx);
                if let Some(ctx) = inner.ctxs.get_mut(idx) {
                    if ctx.fetch.state() == FetchState::Idle
                        && ctx.started
                        && !ctx.claimed
                        && !ctx.fetch.aborted()
                    {
                        ctx.claimed = true;
                        job = Some((ctx.fetch.clone(), ctx.ident.clone()));
                        break;
                    }
                }
                cur = next;
                if cur == inner.ring.head() {
                    break;
                }
            }

            let Some((fetch, ident)) = job else { return };
            drop(inner);
            self.process(&fetch, &ident);
        }
    }

    fn finalise(&self, scheme: &str) {
        tracing::debug!(%scheme, "finalise doi fetcher");
    }
}

impl DoiFetcher {
    fn process(&self, fetch: &Rc<Fetch>, ident: &str) {
        if fetch.aborted() {
            return;
        }
        // every registrant-assigned identifier lives under the "10."
        // directory prefix and carries a suffix after a slash
        if !ident.starts_with("10.") || !ident.contains('/') {
            fetch.send_callback(FetchEvent::Error(format!(
                "malformed doi identifier: {ident}"
            )));
            return;
        }
        fetch.set_http_code(302);
        fetch.send_callback(FetchEvent::Redirect(format!(
            "{}{ident}",
            self.conf.resolver,
        )));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use kestrel_api::config::Config;

    #[derive(Debug, Default)]
    struct RecHandler {
        events: RefCell<Vec<FetchEvent>>,
    }

    impl FetchHandler for RecHandler {
        fn on_event(&self, _fetch: &Fetch, event: FetchEvent) {
            self.events.borrow_mut().push(event);
        }
    }

    fn run(url: &str) -> (Rc<RecHandler>, u32) {
        let builder = builder::Builder {
            config: Config::default(),
            urldb: Rc::new(NullUrlDb),
            fetchers: vec![DoiFetcherFactory::create()],
        };
        let engine = builder.build().unwrap();
        let handler = Rc::new(RecHandler::default());
        let fetch = engine
            .setup(
                handler.clone(),
                FetchRequest::new(FetchUrl::parse(url).unwrap()),
            )
            .unwrap();
        assert!(fetch.start());
        engine.poll("doi");
        let code = fetch.http_code();
        fetch.free();
        (handler, code)
    }

    #[test]
    fn identifier_redirects_to_the_resolver() {
        let (handler, code) = run("doi:10.1000/182");
        assert_eq!(302, code);
        let events = handler.events.borrow();
        assert_eq!(1, events.len(), "{events:?}");
        assert!(matches!(
            &events[0],
            FetchEvent::Redirect(to) if to == "https://doi.org/10.1000/182"
        ));
    }

    #[test]
    fn malformed_identifier_is_an_error() {
        let (handler, _) = run("doi:not-a-doi");
        let events = handler.events.borrow();
        assert_eq!(1, events.len(), "{events:?}");
        assert!(matches!(&events[0], FetchEvent::Error(_)));
    }
}
