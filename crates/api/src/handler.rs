//! Fetch callback handler traits.

use crate::*;
use std::rc::Rc;

/// Receives the callback events of one fetch.
///
/// Handlers are invoked synchronously from within a fetcher's `poll` pass.
/// A handler may re-enter the engine from inside `on_event` - issue new
/// fetches, abort or free the one it is being called about, or even poll
/// again; the per-fetch state tag ([FetchState](crate::FetchState)) keeps
/// such reentrancy safe.
pub trait FetchHandler: 'static + std::fmt::Debug {
    /// Handle one callback event for the given fetch.
    fn on_event(&self, fetch: &Fetch, event: FetchEvent);
}

/// Trait-object [FetchHandler].
pub type DynFetchHandler = Rc<dyn FetchHandler>;

/// Per-url state consulted while fetching.
///
/// The cookie store, the authentication database and the certificate
/// override store are external collaborators; this one seam stands in for
/// all three. Every method has a "know nothing" default so embedders only
/// implement the stores they actually have.
pub trait UrlDb: 'static + std::fmt::Debug {
    /// The `Cookie:` header value to send when fetching this url, if any.
    fn cookie_string(&self, url: &FetchUrl) -> Option<String> {
        drop(url);
        None
    }

    /// Stored `user:password` credentials for this url, if any.
    fn auth_details(&self, url: &FetchUrl) -> Option<String> {
        drop(url);
        None
    }

    /// True if the user has recorded a trust override disabling TLS
    /// certificate verification for this url.
    fn cert_verify_disabled(&self, url: &FetchUrl) -> bool {
        drop(url);
        false
    }

    /// Record a `Set-Cookie:` header value received while fetching this
    /// url. Called once per header, as each arrives.
    fn set_cookie(&self, url: &FetchUrl, cookie: &str) {
        drop((url, cookie));
    }
}

/// Trait-object [UrlDb].
pub type DynUrlDb = Rc<dyn UrlDb>;

/// A [UrlDb] with no storage behind it: no cookies, no credentials, no
/// trust overrides.
#[derive(Debug, Default)]
pub struct NullUrlDb;

impl UrlDb for NullUrlDb {}
