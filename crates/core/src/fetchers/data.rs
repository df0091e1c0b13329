//! data: url handling (RFC 2397).
//!
//! The whole object is embedded in the url itself, so a fetch is a single
//! decode: percent-unescape the payload, base64-decode it when flagged,
//! and hand the result over as one body chunk.

use crate::ring::{Arena, Links, Ring, Ringed};
use base64::prelude::*;
use bytes::Bytes;
use kestrel_api::*;
use percent_encoding::percent_decode_str;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// The embedded-object fetcher for `data:` urls.
#[derive(Debug)]
pub struct DataFetcherFactory {}

impl DataFetcherFactory {
    /// Construct a new DataFetcherFactory.
    pub fn create() -> DynFetcherFactory {
        Rc::new(Self {})
    }
}

impl FetcherFactory for DataFetcherFactory {
    fn default_config(
        &self,
        _config: &mut kestrel_api::config::Config,
    ) -> FetchResult<()> {
        Ok(())
    }

    fn create(
        &self,
        _builder: &builder::Builder,
    ) -> FetchResult<Vec<(String, DynFetcher)>> {
        Ok(vec![(
            "data".to_string(),
            Rc::new(DataFetcher::default()) as DynFetcher,
        )])
    }
}

struct DataCtx {
    key: FetchKey,
    fetch: Rc<Fetch>,
    started: bool,
    claimed: bool,
    links: Links,
}

impl Ringed for DataCtx {
    fn links(&self) -> &Links {
        &self.links
    }
    fn links_mut(&mut self) -> &mut Links {
        &mut self.links
    }
}

#[derive(Debug, Default)]
struct DataInner {
    ctxs: Arena<DataCtx>,
    ring: Ring,
}

#[derive(Debug, Default)]
struct DataFetcher {
    inner: RefCell<DataInner>,
    next_key: Cell<u64>,
}

impl Fetcher for DataFetcher {
    fn initialise(&self, scheme: &str) -> FetchResult<()> {
        tracing::debug!(%scheme, "initialise data fetcher");
        Ok(())
    }

    fn setup(
        &self,
        fetch: Rc<Fetch>,
        _request: FetchRequest,
    ) -> Option<FetchKey> {
        let key = FetchKey(self.next_key.get());
        self.next_key.set(key.0 + 1);

        let mut inner = self.inner.borrow_mut();
        let idx = inner.ctxs.insert(DataCtx {
            key,
            fetch,
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
            tracing::warn!("data fetch free raced a scan; leaking context");
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
                        job = Some(ctx.fetch.clone());
                        break;
                    }
                }
                cur = next;
                if cur == inner.ring.head() {
                    break;
                }
            }

            let Some(fetch) = job else { return };
            drop(inner);
            process(&fetch);
        }
    }

    fn finalise(&self, scheme: &str) {
        tracing::debug!(%scheme, "finalise data fetcher");
    }
}

fn process(fetch: &Rc<Fetch>) {
    if fetch.aborted() {
        return;
    }
    match decode_data_url(fetch.url().as_str()) {
        Ok((mime, body)) => {
            fetch.set_http_code(200);
            if fetch.send_callback(FetchEvent::Type {
                mime,
                length_hint: body.len() as u64,
            }) {
                return;
            }
            if !body.is_empty()
                && fetch.send_callback(FetchEvent::Data(body))
            {
                return;
            }
            fetch.send_callback(FetchEvent::Finished(CacheData::default()));
        }
        Err(diag) => {
            fetch.send_callback(FetchEvent::Error(diag));
        }
    }
}

/// Split and decode `data:[<mediatype>][;base64],<payload>`.
fn decode_data_url(url: &str) -> Result<(String, Bytes), String> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| "not a data: url".to_string())?;
    let Some((meta, payload)) = rest.split_once(',') else {
        return Err("malformed data: url (no comma separator)".to_string());
    };

    let (meta, base64_flagged) =
        if meta.to_ascii_lowercase().ends_with(";base64") {
            (&meta[..meta.len() - ";base64".len()], true)
        } else {
            (meta, false)
        };
    let mime = if meta.is_empty() {
        "text/plain".to_string()
    } else {
        meta.to_string()
    };

    let unescaped: Vec<u8> = percent_decode_str(payload).collect();
    let body = if base64_flagged {
        BASE64_STANDARD
            .decode(&unescaped)
            .map_err(|e| format!("invalid base64 payload: {e}"))?
    } else {
        unescaped
    };

    Ok((mime, Bytes::from(body)))
}
