//! file: url handling.
//!
//! Local objects are served with http-shaped metadata (content type,
//! length, modification time and a synthesized validator) so the caller's
//! caching works the same way it does for network fetches. Filesystem
//! errors become small error pages rather than fetch failures, which is
//! what a browser wants to render for them.

use super::util;
use crate::ring::{Arena, Links, Ring, Ringed};
use bytes::Bytes;
use kestrel_api::*;
use std::cell::{Cell, RefCell};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Maximum size of one read buffer.
const MAX_BUF_SIZE: usize = 1024 * 1024;

/// The local file fetcher for `file:` urls.
#[derive(Debug)]
pub struct FileFetcherFactory {}

impl FileFetcherFactory {
    /// Construct a new FileFetcherFactory.
    pub fn create() -> DynFetcherFactory {
        Rc::new(Self {})
    }
}

impl FetcherFactory for FileFetcherFactory {
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
            "file".to_string(),
            Rc::new(FileFetcher::default()) as DynFetcher,
        )])
    }
}

struct FileCtx {
    key: FetchKey,
    fetch: Rc<Fetch>,
    path: PathBuf,
    last_modified: Option<i64>,
    file_etag: Option<i64>,
    started: bool,
    claimed: bool,
    links: Links,
}

impl Ringed for FileCtx {
    fn links(&self) -> &Links {
        &self.links
    }
    fn links_mut(&mut self) -> &mut Links {
        &mut self.links
    }
}

#[derive(Debug, Default)]
struct FileInner {
    ctxs: Arena<FileCtx>,
    ring: Ring,
}

#[derive(Debug, Default)]
struct FileFetcher {
    inner: RefCell<FileInner>,
    next_key: Cell<u64>,
}

impl Fetcher for FileFetcher {
    fn initialise(&self, scheme: &str) -> FetchResult<()> {
        tracing::debug!(%scheme, "initialise file fetcher");
        Ok(())
    }

    fn setup(
        &self,
        fetch: Rc<Fetch>,
        request: FetchRequest,
    ) -> Option<FetchKey> {
        let path = request.url.to_file_path()?;
        let (last_modified, file_etag) =
            util::parse_conditionals(&request.headers);

        let key = FetchKey(self.next_key.get());
        self.next_key.set(key.0 + 1);

        let mut inner = self.inner.borrow_mut();
        let idx = inner.ctxs.insert(FileCtx {
            key,
            fetch,
            path,
            last_modified,
            file_etag,
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

    fn abort(&self, _key: FetchKey) {
        // the poll pass skips aborted contexts; flagging already happened
        // on the fetch handle
    }

    fn free(&self, key: FetchKey) {
        let Ok(mut inner) = self.inner.try_borrow_mut() else {
            tracing::warn!("file fetch free raced a scan; leaking context");
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

            // pick the next runnable context, skipping any that an outer
            // pass is mid-callback on
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
                        job = Some((
                            ctx.fetch.clone(),
                            ctx.path.clone(),
                            ctx.last_modified,
                            ctx.file_etag,
                        ));
                        break;
                    }
                }
                cur = next;
                if cur == inner.ring.head() {
                    break;
                }
            }

            let Some((fetch, path, last_modified, file_etag)) = job else {
                return;
            };
            // deliver outside the borrow, so aborts, frees and reentrant
            // polls from inside the callbacks find the fetcher available
            drop(inner);
            process(&fetch, &path, last_modified, file_etag);
        }
    }

    fn finalise(&self, scheme: &str) {
        tracing::debug!(%scheme, "finalise file fetcher");
    }
}

/// issue one callback, reporting whether the fetch was aborted meanwhile
fn send_header(fetch: &Fetch, line: String) -> bool {
    fetch.send_callback(FetchEvent::Header(Bytes::from(line)))
}

fn error_code(e: &std::io::Error) -> u32 {
    match e.kind() {
        std::io::ErrorKind::PermissionDenied => 403,
        std::io::ErrorKind::NotFound => 404,
        _ => 500,
    }
}

fn process(
    fetch: &Rc<Fetch>,
    path: &Path,
    last_modified: Option<i64>,
    file_etag: Option<i64>,
) {
    if fetch.aborted() {
        return;
    }
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) => return process_error(fetch, error_code(&e)),
    };
    if meta.is_dir() {
        // directory listing generation belongs to the embedder
        return process_error(fetch, 500);
    }
    process_plain(fetch, path, &meta, last_modified, file_etag);
}

/// Process the object as a regular file.
fn process_plain(
    fetch: &Rc<Fetch>,
    path: &Path,
    meta: &std::fs::Metadata,
    last_modified: Option<i64>,
    file_etag: Option<i64>,
) {
    let mut file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) => return process_error(fetch, error_code(&e)),
    };

    let size = meta.len();
    let mtime = util::mtime_secs(meta);
    let mime = util::filetype(path);

    fetch.set_http_code(200);

    // Any callback can result in the fetch being aborted, so check after
    // every single send.
    if send_header(fetch, format!("Content-Type: {mime}")) {
        return;
    }
    if send_header(fetch, format!("Content-Length: {size}")) {
        return;
    }
    if send_header(
        fetch,
        format!("Last-Modified: {}", util::http_date(mtime)),
    ) {
        return;
    }
    if send_header(fetch, format!("ETag: \"{mtime:10}\"")) {
        return;
    }

    // a conditional request whose tokens still match the file
    if let (Some(last_modified), Some(file_etag)) =
        (last_modified, file_etag)
    {
        if last_modified > mtime && file_etag == mtime {
            fetch.send_callback(FetchEvent::NotModified(
                CacheData::default(),
            ));
            return;
        }
    }

    if fetch.send_callback(FetchEvent::Type {
        mime: mime.to_string(),
        length_hint: size,
    }) {
        return;
    }

    let mut buf = vec![0u8; size.min(MAX_BUF_SIZE as u64) as usize];
    let mut total: u64 = 0;
    while total < size {
        let read = match file.read(&mut buf) {
            Ok(0) => {
                fetch.send_callback(FetchEvent::Error(
                    "unexpected end of file".to_string(),
                ));
                return;
            }
            Ok(read) => read,
            Err(_) => {
                fetch.send_callback(FetchEvent::Error(
                    "error reading file".to_string(),
                ));
                return;
            }
        };
        total += read as u64;
        if fetch.send_callback(FetchEvent::Data(Bytes::copy_from_slice(
            &buf[..read],
        ))) {
            return;
        }
    }

    fetch.send_callback(FetchEvent::Finished(CacheData {
        etag: Some(format!("\"{mtime:10}\"")),
        last_modified: Some(mtime),
    }));
}

/// Serve a small html page for a filesystem error, as a successful fetch
/// carrying the given status code.
fn process_error(fetch: &Rc<Fetch>, code: u32) {
    let title = util::status_title(code);

    fetch.set_http_code(code);
    if send_header(fetch, "Content-Type: text/html".to_string()) {
        return;
    }

    let body = format!(
        "<html><head><title>{title}</title></head><body>\
         <h1>{title}</h1>\
         <p>Error {code} while fetching {}</p></body></html>",
        fetch.url(),
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

#[cfg(test)]
mod test {
    use super::*;
    use kestrel_api::config::Config;
    use std::cell::RefCell;

    #[derive(Debug, Default)]
    struct RecHandler {
        events: RefCell<Vec<FetchEvent>>,
        free_on_terminal: Cell<bool>,
        reentrant_poll: RefCell<Option<Rc<FetchEngine>>>,
    }

    impl FetchHandler for RecHandler {
        fn on_event(&self, fetch: &Fetch, event: FetchEvent) {
            if let Some(engine) = self.reentrant_poll.borrow().as_ref() {
                engine.poll("file");
            }
            if self.free_on_terminal.get() && event.is_terminal() {
                fetch.free();
            }
            self.events.borrow_mut().push(event);
        }
    }

    impl RecHandler {
        fn significant(&self) -> Vec<FetchEvent> {
            self.events
                .borrow()
                .iter()
                .filter(|e| !matches!(e, FetchEvent::Header(_)))
                .cloned()
                .collect()
        }
    }

    fn engine() -> Rc<FetchEngine> {
        let builder = builder::Builder {
            config: Config::default(),
            urldb: Rc::new(NullUrlDb),
            fetchers: vec![FileFetcherFactory::create()],
        };
        Rc::new(builder.build().unwrap())
    }

    fn request_for(path: &Path) -> FetchRequest {
        FetchRequest::new(FetchUrl::from_file_path(path).unwrap())
    }

    #[test]
    fn file_contents_are_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, "hello world").unwrap();

        let engine = engine();
        let handler = Rc::new(RecHandler::default());
        let fetch = engine
            .setup(handler.clone(), request_for(&path))
            .unwrap();
        assert!(fetch.start());
        engine.poll("file");

        assert_eq!(200, fetch.http_code());
        let events = handler.significant();
        assert_eq!(3, events.len(), "{events:?}");
        assert!(matches!(
            &events[0],
            FetchEvent::Type { mime, length_hint: 11 } if mime == "text/plain"
        ));
        assert!(matches!(
            &events[1],
            FetchEvent::Data(d) if d.as_ref() == b"hello world"
        ));
        assert!(matches!(&events[2], FetchEvent::Finished(_)));

        // the http-shaped metadata went out as header lines
        let headers = handler.events.borrow();
        assert!(headers.iter().any(|e| matches!(
            e,
            FetchEvent::Header(h) if h.as_ref().starts_with(b"ETag:")
        )));

        fetch.free();
        engine.shutdown();
    }

    #[test]
    fn missing_file_serves_a_404_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.html");

        let engine = engine();
        let handler = Rc::new(RecHandler::default());
        let fetch = engine
            .setup(handler.clone(), request_for(&path))
            .unwrap();
        assert!(fetch.start());
        engine.poll("file");

        assert_eq!(404, fetch.http_code());
        let events = handler.significant();
        assert!(matches!(
            &events[0],
            FetchEvent::Type { mime, .. } if mime == "text/html"
        ));
        assert!(matches!(
            &events[1],
            FetchEvent::Data(d) if d.as_ref().windows(3).any(|w| w == b"404")
        ));
        assert!(matches!(&events[2], FetchEvent::Finished(_)));

        fetch.free();
    }

    #[test]
    fn abort_before_start_yields_no_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, "hello").unwrap();

        let engine = engine();
        let handler = Rc::new(RecHandler::default());
        let fetch = engine
            .setup(handler.clone(), request_for(&path))
            .unwrap();

        fetch.abort();
        fetch.free();
        engine.poll("file");

        assert!(handler.events.borrow().is_empty());
    }

    #[test]
    fn conditional_request_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cached.txt");
        std::fs::write(&path, "cached body").unwrap();
        let mtime =
            util::mtime_secs(&std::fs::metadata(&path).unwrap());

        let engine = engine();
        let handler = Rc::new(RecHandler::default());
        let mut request = request_for(&path);
        request.headers = vec![
            format!("If-Modified-Since: {}", util::http_date(mtime + 10)),
            format!("If-None-Match: \"{mtime}\""),
        ];
        let fetch = engine.setup(handler.clone(), request).unwrap();
        assert!(fetch.start());
        engine.poll("file");

        let events = handler.significant();
        assert_eq!(1, events.len(), "{events:?}");
        assert!(matches!(&events[0], FetchEvent::NotModified(_)));

        fetch.free();
    }

    #[test]
    fn reentrant_poll_does_not_duplicate_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, "hello").unwrap();

        let engine = engine();
        let handler = Rc::new(RecHandler::default());
        *handler.reentrant_poll.borrow_mut() = Some(engine.clone());

        let fetch = engine
            .setup(handler.clone(), request_for(&path))
            .unwrap();
        assert!(fetch.start());
        engine.poll("file");

        let events = handler.significant();
        let finished = events
            .iter()
            .filter(|e| matches!(e, FetchEvent::Finished(_)))
            .count();
        let typed = events
            .iter()
            .filter(|e| matches!(e, FetchEvent::Type { .. }))
            .count();
        assert_eq!(1, finished, "{events:?}");
        assert_eq!(1, typed, "{events:?}");

        fetch.free();
    }

    #[test]
    fn free_from_inside_the_terminal_callback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, "hello").unwrap();

        let engine = engine();
        let handler = Rc::new(RecHandler::default());
        handler.free_on_terminal.set(true);

        let fetch = engine
            .setup(handler.clone(), request_for(&path))
            .unwrap();
        assert!(fetch.start());
        engine.poll("file");

        assert_eq!(FetchState::PendingFree, fetch.state());
        // a second free after the callback-time one changes nothing
        fetch.free();
        engine.poll("file");
    }
}
