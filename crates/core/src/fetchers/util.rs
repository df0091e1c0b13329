//! Small helpers shared by the scheme fetchers: header field parsing,
//! http date handling and file type sniffing.

use std::path::Path;

/// Case-insensitive accessor for one `Name: value` header line.
///
/// Returns the value with leading spaces and tabs stripped and trailing
/// whitespace (including any CR LF) removed, or `None` when the line is
/// for a different header.
pub(crate) fn header_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    if line.len() <= name.len() {
        return None;
    }
    let (head, rest) = line.split_at(name.len());
    if !head.eq_ignore_ascii_case(name) {
        return None;
    }
    let rest = rest.strip_prefix(':')?;
    Some(rest.trim_start_matches([' ', '\t']).trim_end())
}

/// Status code of an `HTTP/x.y NNN reason` line, or `None` for header
/// lines.
pub(crate) fn parse_status_line(line: &str) -> Option<u32> {
    let rest = line.strip_prefix("HTTP/")?;
    let mut parts = rest.split_whitespace();
    let _version = parts.next()?;
    parts.next()?.parse().ok()
}

/// Extract the first `realm="..."` token of a `WWW-Authenticate` value.
///
/// A malformed value (no realm token at all) yields the empty string
/// rather than a parse failure; the caller still gets its auth challenge,
/// just with nothing to label the prompt with.
pub(crate) fn parse_realm(value: &str) -> String {
    let lower = value.to_ascii_lowercase();
    let Some(pos) = lower.find("realm") else {
        return String::new();
    };
    let rest = &value[pos + "realm".len()..];
    let Some(open) = rest.find('"') else {
        return String::new();
    };
    let quoted = &rest[open + 1..];
    match quoted.find('"') {
        Some(close) => quoted[..close].to_string(),
        None => quoted
            .trim_end_matches([' ', '\t', '\r', '\n', '"'])
            .to_string(),
    }
}

/// Leading decimal digits of a header value, for `Content-Length`.
/// Anything that does not begin with a digit leaves the caller's value
/// untouched.
pub(crate) fn parse_content_length(value: &str) -> Option<u64> {
    if !value.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let digits: &str = value
        .split_once(|c: char| !c.is_ascii_digit())
        .map(|(d, _)| d)
        .unwrap_or(value);
    digits.parse().ok()
}

/// Parse an http date (`If-Modified-Since`, `Last-Modified`) into unix
/// seconds.
pub(crate) fn parse_http_date(value: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.timestamp())
}

/// Render unix seconds as an http date.
pub(crate) fn http_date(secs: i64) -> String {
    match chrono::DateTime::<chrono::Utc>::from_timestamp(secs, 0) {
        Some(d) => d.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        None => String::new(),
    }
}

/// Record a caller's conditional-request tokens (`If-Modified-Since` as
/// unix seconds, `If-None-Match` as the numeric local-file validator) so
/// they can be compared against a local file's modification time later.
pub(crate) fn parse_conditionals(
    request_headers: &[String],
) -> (Option<i64>, Option<i64>) {
    let mut last_modified = None;
    let mut file_etag = None;
    for line in request_headers {
        if let Some(v) = header_value(line, "If-Modified-Since") {
            last_modified = parse_http_date(v);
        } else if let Some(v) = header_value(line, "If-None-Match") {
            let v = v.trim_matches(['"', ' ', '\t']);
            file_etag = v.parse().ok();
        }
    }
    (last_modified, file_etag)
}

/// Seconds since the unix epoch a file was last modified, 0 when the
/// platform cannot say.
pub(crate) fn mtime_secs(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// MIME type for a local path, sniffed from the extension.
pub(crate) fn filetype(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("txt") => "text/plain",
        Some("gif") => "image/gif",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("pdf") => "application/pdf",
        _ => "text/plain",
    }
}

/// Human friendly byte count for progress text.
pub(crate) fn human_size(n: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;
    let n = n as f64;
    if n < KB {
        format!("{n:.0} B")
    } else if n < MB {
        format!("{:.1} kB", n / KB)
    } else if n < GB {
        format!("{:.1} MB", n / MB)
    } else {
        format!("{:.1} GB", n / GB)
    }
}

/// Reason phrase for the synthesized error pages of the local fetchers.
pub(crate) fn status_title(code: u32) -> &'static str {
    match code {
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Error",
    }
}
