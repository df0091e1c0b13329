use super::*;
use kestrel_api::config::Config;
use std::cell::{Cell, RefCell};

/// Minimal fetcher so the engine can mint fetch handles for the state
/// machine to report through; the transfers in these tests are driven by
/// hand, not by a transport.
#[derive(Debug, Default)]
struct StubFetcher {
    next_key: Cell<u64>,
}

impl Fetcher for StubFetcher {
    fn initialise(&self, _scheme: &str) -> FetchResult<()> {
        Ok(())
    }
    fn setup(
        &self,
        _fetch: Rc<Fetch>,
        _request: FetchRequest,
    ) -> Option<FetchKey> {
        let key = self.next_key.get();
        self.next_key.set(key + 1);
        Some(FetchKey(key))
    }
    fn start(&self, _key: FetchKey) -> bool {
        true
    }
    fn abort(&self, _key: FetchKey) {}
    fn free(&self, _key: FetchKey) {}
    fn poll(&self, _scheme: &str) {}
    fn finalise(&self, _scheme: &str) {}
}

#[derive(Debug, Default)]
struct RecHandler {
    events: RefCell<Vec<FetchEvent>>,
    abort_on_data: Cell<bool>,
}

impl FetchHandler for RecHandler {
    fn on_event(&self, fetch: &Fetch, event: FetchEvent) {
        if self.abort_on_data.get() && matches!(event, FetchEvent::Data(_)) {
            fetch.abort();
        }
        self.events.borrow_mut().push(event);
    }
}

impl RecHandler {
    /// Everything except the informational header/progress noise.
    fn significant(&self) -> Vec<FetchEvent> {
        self.events
            .borrow()
            .iter()
            .filter(|e| {
                !matches!(
                    e,
                    FetchEvent::Header(_) | FetchEvent::Progress(_)
                )
            })
            .cloned()
            .collect()
    }

    fn terminal_count(&self) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|e| e.is_terminal())
            .count()
    }
}

#[derive(Debug, Default)]
struct CookieDb {
    set: RefCell<Vec<String>>,
}

impl UrlDb for CookieDb {
    fn set_cookie(&self, _url: &FetchUrl, cookie: &str) {
        self.set.borrow_mut().push(cookie.to_string());
    }
}

fn make_fetch(
    url: &str,
    handler: Rc<RecHandler>,
    urldb: DynUrlDb,
) -> Rc<Fetch> {
    let engine = FetchEngine::new(&Config::default(), urldb).unwrap();
    let stub = Rc::new(StubFetcher::default());
    for scheme in ["http", "https", "file"] {
        engine.register(scheme, stub.clone()).unwrap();
    }
    engine
        .setup(
            handler,
            FetchRequest::new(FetchUrl::parse(url).unwrap()),
        )
        .unwrap()
}

fn transfer_for(url: &str, handler: Rc<RecHandler>) -> HttpTransfer {
    let fetch = make_fetch(url, handler, Rc::new(NullUrlDb));
    HttpTransfer::new(fetch, false, false, None, None)
}

fn feed_headers(t: &mut HttpTransfer, lines: &[&str]) {
    for line in lines {
        assert_eq!(Flow::Continue, t.header_line(line.as_bytes()));
    }
}

#[test]
fn scenario_a_plain_success() {
    let handler = Rc::new(RecHandler::default());
    let mut t = transfer_for("http://example/", handler.clone());

    feed_headers(
        &mut t,
        &[
            "HTTP/1.1 200 OK\r\n",
            "Content-Type: text/plain\r\n",
            "Content-Length: 2\r\n",
            "\r\n",
        ],
    );
    assert_eq!(Flow::Continue, t.body_chunk(b"hi"));
    t.completion(TransferOutcome::Ok);

    let events = handler.significant();
    assert_eq!(3, events.len(), "{events:?}");
    assert!(matches!(
        &events[0],
        FetchEvent::Type { mime, length_hint: 2 } if mime == "text/plain"
    ));
    assert!(
        matches!(&events[1], FetchEvent::Data(d) if d.as_ref() == b"hi")
    );
    assert!(matches!(&events[2], FetchEvent::Finished(_)));
    assert_eq!(200, t.fetch().http_code());
    assert_eq!(1, handler.terminal_count());
}

#[test]
fn body_chunks_stay_ordered() {
    let handler = Rc::new(RecHandler::default());
    let mut t = transfer_for("http://example/", handler.clone());

    feed_headers(&mut t, &["HTTP/1.1 200 OK\r\n", "\r\n"]);
    assert_eq!(Flow::Continue, t.body_chunk(b"one"));
    assert_eq!(Flow::Continue, t.body_chunk(b"two"));
    t.completion(TransferOutcome::Ok);

    let events = handler.significant();
    // missing Content-Length leaves the hint at 0, which does not mean
    // an empty body
    assert!(matches!(
        &events[0],
        FetchEvent::Type { length_hint: 0, .. }
    ));
    assert!(
        matches!(&events[1], FetchEvent::Data(d) if d.as_ref() == b"one")
    );
    assert!(
        matches!(&events[2], FetchEvent::Data(d) if d.as_ref() == b"two")
    );
    assert!(matches!(&events[3], FetchEvent::Finished(_)));
}

#[test]
fn scenario_b_redirect_without_body() {
    let handler = Rc::new(RecHandler::default());
    let mut t = transfer_for("http://example/", handler.clone());

    feed_headers(
        &mut t,
        &[
            "HTTP/1.1 301 Moved Permanently\r\n",
            "Location: http://example/other\r\n",
            "\r\n",
        ],
    );
    t.completion(TransferOutcome::Ok);

    let events = handler.significant();
    assert_eq!(1, events.len(), "{events:?}");
    assert!(matches!(
        &events[0],
        FetchEvent::Redirect(to) if to == "http://example/other"
    ));
}

#[test]
fn redirect_with_body_halts_the_stream() {
    let handler = Rc::new(RecHandler::default());
    let mut t = transfer_for("http://example/", handler.clone());

    feed_headers(
        &mut t,
        &[
            "HTTP/1.1 302 Found\r\n",
            "Location: http://example/other\r\n",
            "\r\n",
        ],
    );
    // the server sent a courtesy body; we stop it rather than stream it
    assert_eq!(Flow::Stop, t.body_chunk(b"<html>moved</html>"));
    assert!(t.stopped);
    t.completion(TransferOutcome::WriteStop("write refused".into()));

    let events = handler.significant();
    assert_eq!(1, events.len(), "{events:?}");
    assert!(matches!(&events[0], FetchEvent::Redirect(_)));
}

#[test]
fn scenario_c_auth_challenge() {
    let handler = Rc::new(RecHandler::default());
    let mut t = transfer_for("http://example/", handler.clone());

    feed_headers(
        &mut t,
        &[
            "HTTP/1.1 401 Unauthorized\r\n",
            "WWW-Authenticate: Basic realm=\"x\"\r\n",
            "\r\n",
        ],
    );
    // the challenge page body is discarded, and the status latch resets
    // each time so a repeated challenge reads identically
    assert_eq!(Flow::Continue, t.body_chunk(b"<html>denied"));
    assert_eq!(Flow::Continue, t.body_chunk(b"</html>"));
    t.completion(TransferOutcome::Ok);

    let events = handler.significant();
    assert_eq!(1, events.len(), "{events:?}");
    assert!(matches!(
        &events[0],
        FetchEvent::Auth { realm } if realm == "x"
    ));
}

#[test]
fn auth_challenge_without_realm() {
    let handler = Rc::new(RecHandler::default());
    let mut t = transfer_for("http://example/", handler.clone());

    feed_headers(
        &mut t,
        &["HTTP/1.1 401 Unauthorized\r\n", "WWW-Authenticate: Negotiate\r\n", "\r\n"],
    );
    t.completion(TransferOutcome::Ok);

    let events = handler.significant();
    assert!(matches!(
        &events[0],
        FetchEvent::Auth { realm } if realm.is_empty()
    ));
}

#[test]
fn non_2xx_is_an_error_when_the_caller_said_so() {
    let handler = Rc::new(RecHandler::default());
    let fetch = make_fetch(
        "http://example/",
        handler.clone(),
        Rc::new(NullUrlDb),
    );
    let mut t = HttpTransfer::new(fetch, true, false, None, None);

    feed_headers(&mut t, &["HTTP/1.1 500 Internal Server Error\r\n", "\r\n"]);
    assert_eq!(Flow::Stop, t.body_chunk(b"oops"));
    t.completion(TransferOutcome::WriteStop("write refused".into()));

    let events = handler.significant();
    assert_eq!(1, events.len(), "{events:?}");
    assert!(matches!(&events[0], FetchEvent::Error(_)));
}

#[test]
fn not_modified_for_a_get() {
    let handler = Rc::new(RecHandler::default());
    let mut t = transfer_for("http://example/", handler.clone());

    feed_headers(&mut t, &["HTTP/1.1 304 Not Modified\r\n", "\r\n"]);
    t.completion(TransferOutcome::Ok);

    let events = handler.significant();
    assert_eq!(1, events.len(), "{events:?}");
    assert!(matches!(&events[0], FetchEvent::NotModified(_)));
}

#[test]
fn abort_mid_stream_emits_nothing_further() {
    let handler = Rc::new(RecHandler::default());
    handler.abort_on_data.set(true);
    let mut t = transfer_for("http://example/", handler.clone());

    feed_headers(&mut t, &["HTTP/1.1 200 OK\r\n", "\r\n"]);
    assert_eq!(Flow::Stop, t.body_chunk(b"first"));
    t.completion(TransferOutcome::WriteStop("write refused".into()));

    // the Data event that triggered the abort was delivered; nothing
    // terminal follows
    assert_eq!(0, handler.terminal_count());
}

#[test]
fn transport_failure_is_a_plain_error() {
    let handler = Rc::new(RecHandler::default());
    let mut t = transfer_for("http://example/", handler.clone());

    t.completion(TransferOutcome::Failed(
        "could not resolve host".to_string(),
    ));

    let events = handler.significant();
    assert_eq!(1, events.len());
    assert!(matches!(
        &events[0],
        FetchEvent::Error(diag) if diag == "could not resolve host"
    ));
}

#[test]
fn truncated_body_is_an_error() {
    let handler = Rc::new(RecHandler::default());
    let mut t = transfer_for("http://example/", handler.clone());

    feed_headers(
        &mut t,
        &["HTTP/1.1 200 OK\r\n", "Content-Length: 100\r\n", "\r\n"],
    );
    assert_eq!(Flow::Continue, t.body_chunk(b"short"));
    t.completion(TransferOutcome::PartialFile);

    let events = handler.significant();
    assert!(matches!(events.last(), Some(FetchEvent::Error(_))));
    assert_eq!(1, handler.terminal_count());
}

#[test]
fn truncated_redirect_still_redirects() {
    let handler = Rc::new(RecHandler::default());
    let mut t = transfer_for("http://example/", handler.clone());

    feed_headers(
        &mut t,
        &[
            "HTTP/1.1 301 Moved Permanently\r\n",
            "Location: http://example/other\r\n",
            "Content-Length: 100\r\n",
            "\r\n",
        ],
    );
    t.completion(TransferOutcome::PartialFile);

    let events = handler.significant();
    assert_eq!(1, events.len(), "{events:?}");
    assert!(matches!(&events[0], FetchEvent::Redirect(_)));
}

#[test]
fn set_cookie_forwards_each_header_immediately() {
    let handler = Rc::new(RecHandler::default());
    let cookies = Rc::new(CookieDb::default());
    let fetch =
        make_fetch("http://example/", handler.clone(), cookies.clone());
    let mut t = HttpTransfer::new(fetch, false, false, None, None);

    feed_headers(
        &mut t,
        &[
            "HTTP/1.1 200 OK\r\n",
            "Set-Cookie: a=1; Path=/\r\n",
            "Set-Cookie: b=2\r\n",
            "\r\n",
        ],
    );
    assert_eq!(
        vec!["a=1; Path=/".to_string(), "b=2".to_string()],
        cookies.set.borrow().clone(),
    );
}

#[test]
fn aborted_transfer_completes_silently() {
    let handler = Rc::new(RecHandler::default());
    let mut t = transfer_for("http://example/", handler.clone());

    t.fetch().abort();
    assert_eq!(Flow::Stop, t.header_line(b"HTTP/1.1 200 OK\r\n"));
    t.completion(TransferOutcome::Ok);

    assert!(handler.events.borrow().is_empty());
}

#[test]
fn cert_chain_first_write_per_depth_wins() {
    let mut chain = CertChain::default();
    chain.note(
        0,
        CertInfo {
            subject: "leaf".into(),
            ..CertInfo::default()
        },
    );
    chain.note(
        2,
        CertInfo {
            subject: "root".into(),
            ..CertInfo::default()
        },
    );
    chain.note(
        0,
        CertInfo {
            subject: "impostor".into(),
            ..CertInfo::default()
        },
    );

    let realized = chain.realize();
    assert_eq!(2, realized.len());
    assert_eq!("leaf", realized[0].subject);
    assert_eq!("root", realized[1].subject);
    // realize consumes the capture
    assert!(chain.realize().is_empty());
}

#[test]
fn verification_failure_reports_the_captured_chain() {
    let handler = Rc::new(RecHandler::default());
    let mut t = transfer_for("https://example/", handler.clone());

    t.note_certificate(
        0,
        CertInfo {
            subject: "CN=example".into(),
            err: "self signed certificate".into(),
            ..CertInfo::default()
        },
    );
    t.completion(TransferOutcome::SslVerify(
        "peer verification failed".to_string(),
    ));

    let events = handler.significant();
    assert_eq!(1, events.len());
    match &events[0] {
        FetchEvent::CertErr(chain) => {
            assert_eq!(1, chain.len());
            assert_eq!("CN=example", chain[0].subject);
        }
        other => panic!("expected CertErr, got {other:?}"),
    }
}

#[test]
fn verification_failure_without_capture_synthesizes_an_entry() {
    let handler = Rc::new(RecHandler::default());
    let mut t = transfer_for("https://example/", handler.clone());

    t.completion(TransferOutcome::SslVerify(
        "peer verification failed".to_string(),
    ));

    let events = handler.significant();
    match &events[0] {
        FetchEvent::CertErr(chain) => {
            assert_eq!(1, chain.len());
            assert_eq!("peer verification failed", chain[0].err);
        }
        other => panic!("expected CertErr, got {other:?}"),
    }
}

#[test]
fn local_file_conditional_short_circuits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("page.html");
    std::fs::write(&path, "<html></html>").unwrap();
    let mtime = util::mtime_secs(&std::fs::metadata(&path).unwrap());

    let handler = Rc::new(RecHandler::default());
    let url = FetchUrl::from_file_path(&path).unwrap();
    let fetch = make_fetch(url.as_str(), handler.clone(), Rc::new(NullUrlDb));

    // caller's conditional tokens match the file's mtime
    let mut t =
        HttpTransfer::new(fetch, false, false, Some(mtime + 10), Some(mtime));
    assert_eq!(Flow::Stop, t.body_chunk(b"<html></html>"));
    t.completion(TransferOutcome::WriteStop("write refused".into()));

    let events = handler.significant();
    assert_eq!(1, events.len(), "{events:?}");
    assert!(matches!(&events[0], FetchEvent::NotModified(_)));

    // and the synthesized validator went out as a header line
    let headers = handler.events.borrow();
    assert!(headers.iter().any(|e| matches!(
        e,
        FetchEvent::Header(h) if h.as_ref().starts_with(b"ETag:")
    )));
}

#[test]
fn local_file_type_is_sniffed_from_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("style.css");
    std::fs::write(&path, "body {}").unwrap();

    let handler = Rc::new(RecHandler::default());
    let url = FetchUrl::from_file_path(&path).unwrap();
    let fetch = make_fetch(url.as_str(), handler.clone(), Rc::new(NullUrlDb));

    let mut t = HttpTransfer::new(fetch, false, false, None, None);
    assert_eq!(Flow::Continue, t.body_chunk(b"body {}"));
    t.completion(TransferOutcome::Ok);

    let events = handler.significant();
    assert!(matches!(
        &events[0],
        FetchEvent::Type { mime, .. } if mime == "text/css"
    ));
}
