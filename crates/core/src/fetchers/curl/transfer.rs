//! Per-transfer http protocol state.
//!
//! The transport engine only hands over raw header lines, body bytes and
//! a completion result; everything http about a fetch lives here: the
//! status latch, the interesting-header parses, the once-only header
//! completion decision (not-modified / redirect / auth / 2xx policy /
//! content type) and the final translation of the engine's result into a
//! terminal callback event.
//!
//! Keeping this separate from the curl plumbing means the whole protocol
//! surface is drivable by tests with scripted header and body lines.

use super::super::util;
use bytes::Bytes;
use kestrel_api::*;
use std::rc::Rc;

/// Whether the engine should keep feeding this transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    /// Keep going.
    Continue,
    /// Stop the transfer; the engine reports a write failure which the
    /// completion step recognises as our own deliberate halt.
    Stop,
}

/// How the engine says a finished transfer went.
#[derive(Debug, Clone)]
pub(crate) enum TransferOutcome {
    /// Completed without transport error.
    Ok,
    /// The body was shorter than the declared Content-Length.
    PartialFile,
    /// The write callback refused data. Ours do that only on purpose,
    /// but the diagnostic is kept for the genuine-failure case.
    WriteStop(String),
    /// TLS verification failed, with the engine's diagnostic.
    SslVerify(String),
    /// Any other transport failure, with the engine's diagnostic.
    Failed(String),
}

/// The certificate chain captured while a handshake was verified.
///
/// Capture happens for every handshake, not just failing ones, because by
/// the time verification fails the handshake state is gone; the chain is
/// realized into a payload only if completion decides to report it.
#[derive(Debug, Default)]
pub(crate) struct CertChain {
    slots: Vec<Option<CertInfo>>,
}

impl CertChain {
    /// Record `info` for the certificate at `depth` (root-most is the
    /// highest depth the engine reports). The first write per depth wins;
    /// re-verification passes over the same chain must not clobber what
    /// was already captured.
    pub fn note(&mut self, depth: usize, info: CertInfo) {
        if depth >= self.slots.len() {
            self.slots.resize_with(depth + 1, || None);
        }
        let slot = &mut self.slots[depth];
        if slot.is_none() {
            *slot = Some(info);
        }
    }

    /// Take the captured chain, deepest first, eliding never-filled
    /// depths.
    pub fn realize(&mut self) -> Vec<CertInfo> {
        std::mem::take(&mut self.slots).into_iter().flatten().collect()
    }
}

/// State machine for one http(s) transfer.
///
/// `Created -> Dispatched -> (HeadersPending) -> BodyStreaming ->
/// Terminal`, with the transitions driven by the engine's header, write
/// and completion callbacks.
pub(crate) struct HttpTransfer {
    fetch: Rc<Fetch>,
    only_2xx: bool,
    /// The request carried a POST body; a 304 is only meaningful for GET.
    has_body: bool,
    /// Header completion processing has run.
    had_headers: bool,
    /// The transfer was halted on purpose (terminal decision mid-body).
    stopped: bool,
    /// Status code parsed from the most recent status line.
    response_code: u32,
    /// Status code latched for decision making, 0 until first latched.
    http_code: u32,
    location: Option<String>,
    content_length: u64,
    content_type: Option<String>,
    realm: Option<String>,
    /// Caller's If-Modified-Since, unix seconds.
    last_modified: Option<i64>,
    /// Caller's If-None-Match, as the numeric local-file validator.
    file_etag: Option<i64>,
    certs: CertChain,
}

impl HttpTransfer {
    /// State for a freshly dispatched transfer.
    pub fn new(
        fetch: Rc<Fetch>,
        only_2xx: bool,
        has_body: bool,
        last_modified: Option<i64>,
        file_etag: Option<i64>,
    ) -> Self {
        Self {
            fetch,
            only_2xx,
            has_body,
            had_headers: false,
            stopped: false,
            response_code: 0,
            http_code: 0,
            location: None,
            content_length: 0,
            content_type: None,
            realm: None,
            last_modified,
            file_etag,
            certs: CertChain::default(),
        }
    }

    /// The parent fetch handle.
    pub fn fetch(&self) -> &Rc<Fetch> {
        &self.fetch
    }

    /// One response header line from the engine (RFC 2616 4.2). Always
    /// forwarded to the parent; the interesting ones are also parsed by
    /// fixed prefix.
    pub fn header_line(&mut self, data: &[u8]) -> Flow {
        if self.fetch.aborted() {
            self.stopped = true;
            return Flow::Stop;
        }

        self.fetch
            .send_callback(FetchEvent::Header(Bytes::copy_from_slice(data)));

        let line = String::from_utf8_lossy(data);
        if let Some(code) = util::parse_status_line(&line) {
            self.response_code = code;
        } else if let Some(v) = util::header_value(&line, "Location") {
            self.location = Some(v.to_string());
        } else if let Some(v) = util::header_value(&line, "Content-Length") {
            if let Some(len) = util::parse_content_length(v) {
                self.content_length = len;
            }
        } else if let Some(v) = util::header_value(&line, "Content-Type") {
            self.content_type = Some(v.to_string());
        } else if let Some(v) = util::header_value(&line, "WWW-Authenticate")
        {
            self.realm = Some(util::parse_realm(v));
        } else if let Some(v) = util::header_value(&line, "Set-Cookie") {
            // forwarded individually and immediately, never batched
            self.fetch.set_cookie(v);
        }

        Flow::Continue
    }

    /// A chunk of response body from the engine.
    pub fn body_chunk(&mut self, data: &[u8]) -> Flow {
        // latch the status code once
        if self.http_code == 0 {
            self.http_code = self.response_code;
            self.fetch.set_http_code(self.http_code);
        }

        // The body of a 401 is the challenge page; skip it, and reset the
        // latch so a repeated challenge on the same connection is
        // detected identically next time around.
        if self.http_code == 401 {
            self.http_code = 0;
            return Flow::Continue;
        }

        if self.fetch.aborted()
            || (!self.had_headers && self.process_headers())
        {
            self.stopped = true;
            return Flow::Stop;
        }

        let aborted = self
            .fetch
            .send_callback(FetchEvent::Data(Bytes::copy_from_slice(data)));
        if aborted {
            self.stopped = true;
            return Flow::Stop;
        }

        Flow::Continue
    }

    /// Advisory progress from the engine.
    pub fn progress(&mut self, now: u64, total: u64) -> Flow {
        if self.fetch.aborted() {
            // the write and header callbacks enforce the abort
            return Flow::Continue;
        }
        let text = if total > 0 {
            format!(
                "Fetched {} of {}",
                util::human_size(now),
                util::human_size(total),
            )
        } else {
            format!("Fetched {}", util::human_size(now))
        };
        self.fetch.send_callback(FetchEvent::Progress(text));
        Flow::Continue
    }

    /// Record one certificate seen during TLS verification.
    pub fn note_certificate(&mut self, depth: usize, info: CertInfo) {
        self.certs.note(depth, info);
    }

    /// Find the status code and content type and inform the caller.
    /// Runs once per transfer; returns true if a terminal decision was
    /// made here and the body must not be streamed.
    fn process_headers(&mut self) -> bool {
        self.had_headers = true;

        if self.http_code == 0 {
            self.http_code = self.response_code;
            self.fetch.set_http_code(self.http_code);
        }
        let http_code = self.http_code;
        tracing::debug!(code = http_code, url = %self.fetch.url(), "headers complete");

        // not modified, for a request without a body
        if http_code == 304 && !self.has_body {
            self.fetch
                .send_callback(FetchEvent::NotModified(CacheData::default()));
            return true;
        }

        // redirects
        if (300..400).contains(&http_code) {
            if let Some(location) = self.location.clone() {
                self.fetch.send_callback(FetchEvent::Redirect(location));
                return true;
            }
        }

        // authentication required
        if http_code == 401 {
            self.fetch.send_callback(FetchEvent::Auth {
                realm: self.realm.clone().unwrap_or_default(),
            });
            return true;
        }

        // http errors when the caller insisted on 2xx
        if self.only_2xx
            && self.fetch.url().scheme().starts_with("http")
            && !(200..300).contains(&http_code)
        {
            self.fetch.send_callback(FetchEvent::Error(
                "request returned a non-2xx response".to_string(),
            ));
            return true;
        }

        // find the MIME type from the headers, or the path for local files
        let mut mime = self.content_type.clone();
        if let Some(path) = self.fetch.url().to_file_path() {
            if let Ok(meta) = std::fs::metadata(&path) {
                let mtime = util::mtime_secs(&meta);

                // synthesize a validator so local objects revalidate
                let etag = format!("ETag: \"{mtime:10}\"");
                self.fetch
                    .send_callback(FetchEvent::Header(Bytes::from(etag)));

                if let (Some(last_modified), Some(file_etag)) =
                    (self.last_modified, self.file_etag)
                {
                    if last_modified > mtime && file_etag == mtime {
                        self.fetch.send_callback(FetchEvent::NotModified(
                            CacheData::default(),
                        ));
                        return true;
                    }
                }
            }
            if mime.is_none() {
                mime = Some(util::filetype(&path).to_string());
            }
        }

        let mime = mime.unwrap_or_else(|| "text/plain".to_string());
        self.fetch.send_callback(FetchEvent::Type {
            mime,
            length_hint: self.content_length,
        })
    }

    /// Completion processing, once the engine reports the transfer done.
    /// The only place the terminal transport-level events fire.
    pub fn completion(&mut self, outcome: TransferOutcome) {
        let aborted = self.fetch.aborted();
        match outcome {
            TransferOutcome::Ok => {
                if aborted {
                    // aborted by the caller: no event at all
                } else if self.stopped
                    || (!self.had_headers && self.process_headers())
                {
                    // deliberately halted, or a header-only response that
                    // resolved terminally (redirect with no body or
                    // similar)
                } else {
                    self.fetch.send_callback(FetchEvent::Finished(
                        CacheData::default(),
                    ));
                }
            }
            TransferOutcome::PartialFile => {
                if aborted {
                } else if !self.had_headers && self.process_headers() {
                    // redirect with a truncated body, or similar
                } else {
                    self.fetch.send_callback(FetchEvent::Error(
                        "the connection closed before the transfer completed"
                            .to_string(),
                    ));
                }
            }
            TransferOutcome::WriteStop(diag) => {
                if !aborted && !self.stopped {
                    // a genuine write failure, not our own halt
                    self.fetch.send_callback(FetchEvent::Error(diag));
                }
            }
            TransferOutcome::SslVerify(diag) => {
                if !aborted {
                    let mut chain = self.certs.realize();
                    if chain.is_empty() {
                        // the engine could not surface the chain itself;
                        // report the failure with what we have
                        chain.push(CertInfo {
                            err: diag,
                            ..CertInfo::default()
                        });
                    }
                    self.fetch.send_callback(FetchEvent::CertErr(chain));
                }
            }
            TransferOutcome::Failed(diag) => {
                if !aborted {
                    self.fetch.send_callback(FetchEvent::Error(diag));
                }
            }
        }
    }
}

#[cfg(test)]
mod test;
