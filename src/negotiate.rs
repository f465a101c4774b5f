//! Content negotiation: assemble the header set that goes on the wire
//! for one dispatch.
//!
//! Pure functions over the request's parts; defaults are fixed constants,
//! never process state. Caller headers come first (insertion order, one
//! line per value), then computed framing headers, then injected
//! defaults for anything still absent.

use http::Method;

use crate::body::Body;
use crate::headers::Headers;

/// Default User-Agent injected when the caller supplied none.
pub(crate) const USER_AGENT: &str = concat!("wraith/", env!("CARGO_PKG_VERSION"));

/// Codings offered when compression is enabled.
pub(crate) const ACCEPT_ENCODING: &str = "gzip,deflate";

/// Build the wire header list for one dispatch.
pub(crate) fn wire_headers(
    method: &Method,
    headers: &Headers,
    body: &Body,
    compress: bool,
) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    for (name, values) in headers.raw() {
        for value in values {
            out.push((name.clone(), value.clone()));
        }
    }

    match body.source_len() {
        Some(_) if body.is_empty_source() => {
            // A bodyless POST or PUT still advertises a zero length.
            if (*method == Method::POST || *method == Method::PUT) && !headers.has("content-length")
            {
                out.push(("content-length".to_owned(), "0".to_owned()));
            }
        }
        Some(len) => {
            // A definite computed length overrides a caller-supplied one.
            out.retain(|(name, _)| !name.eq_ignore_ascii_case("content-length"));
            out.push(("content-length".to_owned(), len.to_string()));
        }
        None => {
            // Stream of unknown length.
            if !headers.has("content-length") && !headers.has("transfer-encoding") {
                out.push(("transfer-encoding".to_owned(), "chunked".to_owned()));
            }
        }
    }

    if !headers.has("accept") {
        out.push(("accept".to_owned(), "*/*".to_owned()));
    }
    if !headers.has("user-agent") {
        out.push(("user-agent".to_owned(), USER_AGENT.to_owned()));
    }
    if compress && !headers.has("accept-encoding") {
        out.push(("accept-encoding".to_owned(), ACCEPT_ENCODING.to_owned()));
    }
    if !headers.has("connection") {
        out.push(("connection".to_owned(), "close".to_owned()));
    }

    out
}
