//! resource: url handling.
//!
//! A `resource:` url names an asset shipped with the embedding
//! application (default stylesheets, error page art). The fetcher looks
//! the name up across the configured search directories and answers with
//! a redirect to the winning `file:` url, so the file fetcher does the
//! actual serving; an unknown asset gets a 404 page.

use super::util;
use crate::ring::{Arena, Links, Ring, Ringed};
use bytes::Bytes;
use kestrel_api::*;
use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::Rc;

/// ResourceFetcher configuration types.
pub mod config {
    /// Configuration parameters for
    /// [ResourceFetcherFactory](super::ResourceFetcherFactory).
    #[derive(
        Debug, Clone, Default, serde::Serialize, serde::Deserialize,
    )]
    #[serde(rename_all = "camelCase", default)]
    pub struct ResourceFetcherConfig {
        /// Directories searched for named resources, in order. The first
        /// hit wins. Default: empty, which makes every resource a 404.
        pub search_paths: Vec<std::path::PathBuf>,
    }

    /// Module-level configuration for ResourceFetcher.
    #[derive(
        Debug, Clone, Default, serde::Serialize, serde::Deserialize,
    )]
    #[serde(rename_all = "camelCase", default)]
    pub struct ResourceFetcherModConfig {
        /// ResourceFetcher configuration.
        pub resource_fetcher: ResourceFetcherConfig,
    }

    impl kestrel_api::config::ModConfig for ResourceFetcherModConfig {}
}

use config::*;

/// The application-asset fetcher for `resource:` urls.
#[derive(Debug)]
pub struct ResourceFetcherFactory {}

impl ResourceFetcherFactory {
    /// Construct a new ResourceFetcherFactory.
    pub fn create() -> DynFetcherFactory {
        Rc::new(Self {})
    }
}

impl FetcherFactory for ResourceFetcherFactory {
    fn default_config(
        &self,
        config: &mut kestrel_api::config::Config,
    ) -> FetchResult<()> {
        config.set_module_config(&ResourceFetcherModConfig::default())
    }

    fn create(
        &self,
        builder: &builder::Builder,
    ) -> FetchResult<Vec<(String, DynFetcher)>> {
        let config: ResourceFetcherModConfig =
            builder.config.get_module_config()?;
        Ok(vec![(
            "resource".to_string(),
            Rc::new(ResourceFetcher::new(config.resource_fetcher))
                as DynFetcher,
        )])
    }
}

struct ResourceCtx {
    key: FetchKey,
    fetch: Rc<Fetch>,
    name: String,
    started: bool,
    claimed: bool,
    links: Links,
}

impl Ringed for ResourceCtx {
    fn links(&self) -> &Links {
        &self.links
    }
    fn links_mut(&mut self) -> &mut Links {
        &mut self.links
    }
}

#[derive(Debug, Default)]
struct ResourceInner {
    ctxs: Arena<ResourceCtx>,
    ring: Ring,
}

#[derive(Debug)]
struct ResourceFetcher {
    conf: ResourceFetcherConfig,
    inner: RefCell<ResourceInner>,
    next_key: Cell<u64>,
}

impl ResourceFetcher {
    fn new(conf: ResourceFetcherConfig) -> Self {
        Self {
            conf,
            inner: RefCell::new(ResourceInner::default()),
            next_key: Cell::new(1),
        }
    }

    /// First configured directory holding the named asset.
    fn locate(&self, name: &str) -> Option<PathBuf> {
        // resource names must stay inside the configured roots
        if name.is_empty() || name.contains("..") {
            return None;
        }
        self.conf
            .search_paths
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
    }
}

impl Fetcher for ResourceFetcher {
    fn initialise(&self, scheme: &str) -> FetchResult<()> {
        tracing::debug!(%scheme, "initialise resource fetcher");
        Ok(())
    }

    fn setup(
        &self,
        fetch: Rc<Fetch>,
        request: FetchRequest,
    ) -> Option<FetchKey> {
        let key = FetchKey(self.next_key.get());
        self.next_key.set(key.0 + 1);

        let name = request.url.path().to_string();
        let mut inner = self.inner.borrow_mut();
        let idx = inner.ctxs.insert(ResourceCtx {
            key,
            fetch,
            name,
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
            tracing::warn!(
                "resource fetch free raced a scan; leaking context"
            );
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
                        job = Some((ctx.fetch.clone(), ctx.name.clone()));
                        break;
                    }
                }
                cur = next;
                if cur == inner.ring.head() {
                    break;
                }
            }

            let Some((fetch, name)) = job else { return };
            drop(inner);
            self.process(&fetch, &name);
        }
    }

    fn finalise(&self, scheme: &str) {
        tracing::debug!(%scheme, "finalise resource fetcher");
    }
}

impl ResourceFetcher {
    fn process(&self, fetch: &Rc<Fetch>, name: &str) {
        if fetch.aborted() {
            return;
        }
        match self
            .locate(name)
            .and_then(|path| FetchUrl::from_file_path(path).ok())
        {
            Some(target) => {
                // the file fetcher serves the asset
                fetch.set_http_code(302);
                fetch.send_callback(FetchEvent::Redirect(
                    target.as_str().to_string(),
                ));
            }
            None => notfound(fetch, name),
        }
    }
}

/// Serve a small 404 page for an unknown resource name.
fn notfound(fetch: &Rc<Fetch>, name: &str) {
    let code = 404;
    let title = util::status_title(code);

    fetch.set_http_code(code);
    if fetch.send_callback(FetchEvent::Header(Bytes::from_static(
        b"Content-Type: text/html",
    ))) {
        return;
    }

    let body = format!(
        "<html><head><title>{title}</title></head><body>\
         <h1>{title}</h1>\
         <p>Error {code} while fetching resource {name}</p></body></html>",
    );
    if fetch.send_callback(FetchEvent::Type {
        mime: "text/html".to_string(),
        length_hint: body.len() as u64,
    }) {
        return;
    }
    if fetch.send_callback(FetchEvent::Data(Bytes::from(body))) {
        return;
    }
    fetch.send_callback(FetchEvent::Finished(CacheData::default()));
}
