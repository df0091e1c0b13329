//! Fetch callback event types.

use bytes::Bytes;

/// Cache-relevant metadata accompanying a [FetchEvent::Finished] or
/// [FetchEvent::NotModified] event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheData {
    /// Entity tag for the fetched object, if one is known.
    pub etag: Option<String>,
    /// Last modification time in seconds since the unix epoch, if known.
    pub last_modified: Option<i64>,
}

/// One entry of a TLS certificate chain captured while a handshake was
/// being verified, root-most first.
///
/// All fields are rendered text so the payload can cross the callback
/// boundary without dragging a TLS library into the api.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertInfo {
    /// X509 version.
    pub version: u32,
    /// Serial number, rendered as decimal text.
    pub serial: String,
    /// Issuer distinguished name.
    pub issuer: String,
    /// Subject distinguished name.
    pub subject: String,
    /// Start of the validity period.
    pub not_before: String,
    /// End of the validity period.
    pub not_after: String,
    /// Verification diagnostic at this chain depth; empty when this
    /// certificate itself verified cleanly.
    pub err: String,
}

/// Progress and result events delivered to the object that requested a
/// fetch.
///
/// For any one fetch the sequence is: any number of informational events
/// ([Header](FetchEvent::Header) / [Progress](FetchEvent::Progress)),
/// at most one [Type](FetchEvent::Type), any number of
/// [Data](FetchEvent::Data) chunks in order, then exactly one terminal
/// event. After a terminal event the parent owns the cleanup: it must call
/// [Fetch::free](crate::Fetch::free); the fetcher never frees a context as
/// a side effect of delivering a callback.
#[derive(Debug, Clone)]
pub enum FetchEvent {
    /// One raw response header line, delivered as parsed. Informational;
    /// parents may ignore it.
    Header(Bytes),
    /// The response MIME type and a content length hint, delivered exactly
    /// once before any [Data](FetchEvent::Data). A hint of 0 means the
    /// length is unknown, not that the body is empty.
    Type {
        /// MIME type, possibly with parameters (`text/html; charset=...`).
        mime: String,
        /// Declared content length, or 0 when the server sent none.
        length_hint: u64,
    },
    /// A chunk of body content. Chunks arrive in order, without gaps or
    /// duplication.
    Data(Bytes),
    /// Terminal: the fetch completed successfully.
    Finished(CacheData),
    /// Terminal: the fetch failed; carries a human readable diagnostic.
    Error(String),
    /// Terminal: the server supplied a replacement url; the parent is
    /// expected to issue a new fetch for it.
    Redirect(String),
    /// Terminal: a conditional request confirmed the cached copy is still
    /// valid.
    NotModified(CacheData),
    /// Terminal: the server demands authentication. The parent must obtain
    /// credentials for the realm and re-issue the fetch.
    Auth {
        /// The authentication realm, empty if the challenge carried none.
        realm: String,
    },
    /// Terminal: TLS verification failed. The parent must decide whether
    /// to trust the chain and, if so, record an override and re-issue.
    CertErr(Vec<CertInfo>),
    /// Advisory human readable progress text, any number of times.
    Progress(String),
}

impl FetchEvent {
    /// True if no further events may follow this one for the same fetch.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FetchEvent::Finished(_)
                | FetchEvent::Error(_)
                | FetchEvent::Redirect(_)
                | FetchEvent::NotModified(_)
                | FetchEvent::Auth { .. }
                | FetchEvent::CertErr(_)
        )
    }

    /// Short event name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchEvent::Header(_) => "header",
            FetchEvent::Type { .. } => "type",
            FetchEvent::Data(_) => "data",
            FetchEvent::Finished(_) => "finished",
            FetchEvent::Error(_) => "error",
            FetchEvent::Redirect(_) => "redirect",
            FetchEvent::NotModified(_) => "notmodified",
            FetchEvent::Auth { .. } => "auth",
            FetchEvent::CertErr(_) => "certerr",
            FetchEvent::Progress(_) => "progress",
        }
    }
}
