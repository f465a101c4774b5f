//! Transport driver: connection establishment, protocol selection,
//! request timeout, and decompressor interposition.
//!
//! The fetch core hands this layer a framed request and receives back a
//! status line, validated headers, and a byte stream; everything below
//! that interface (sockets, TLS, HTTP framing) stays in this module.

pub(crate) mod connector;
mod decode;
mod h1;
mod h2;

use std::mem;
use std::time::Duration;

use http::{Method, Uri};
use url::Url;

use crate::agent::{Agent, PoolKey};
use crate::body::{ByteStream, WireBody};
use crate::error::{ErrorKind, FetchError, Result};
use crate::headers::Headers;
use decode::ContentDecoder;

/// Response head and body stream as read off the wire.
pub(crate) struct RawResponse {
    pub(crate) status: u16,
    pub(crate) status_text: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: ByteStream,
}

/// A dispatched response with validated headers and a (possibly
/// decompressed) body stream.
pub(crate) struct TransportResponse {
    pub(crate) status: u16,
    pub(crate) status_text: String,
    pub(crate) headers: Headers,
    pub(crate) body: ByteStream,
}

/// Send one request and return its response head with a streaming body.
///
/// The request deadline covers connect, send, and head receipt; dropping
/// the timed-out future tears the connection down. Body reads are
/// governed by the body deadline at consumption time, not here.
pub(crate) async fn dispatch(
    agent: &Agent,
    method: &Method,
    url: &Url,
    wire_headers: Vec<(String, String)>,
    body: WireBody,
    compress: bool,
    timeout: Duration,
) -> Result<TransportResponse> {
    let send = send(agent, method, url, &wire_headers, body);
    let raw = if timeout.is_zero() {
        send.await?
    } else {
        match tokio::time::timeout(timeout, send).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(FetchError::new(
                    ErrorKind::RequestTimeout,
                    format!("network timeout at: {url}"),
                ));
            }
        }
    };

    let headers = Headers::from_wire(raw.headers.iter().map(|(n, v)| (n.as_str(), v.as_str())))?;
    let mut response = TransportResponse {
        status: raw.status,
        status_text: raw.status_text,
        headers,
        body: raw.body,
    };
    interpose_decoder(&mut response, method, compress, url);
    Ok(response)
}

/// Connect and send on whichever protocol ALPN selects, reusing a pooled
/// HTTP/2 connection for the origin when the agent has a live one.
async fn send(
    agent: &Agent,
    method: &Method,
    url: &Url,
    headers: &[(String, String)],
    body: WireBody,
) -> Result<RawResponse> {
    let uri: Uri = url.as_str().parse().map_err(|e| {
        FetchError::new(
            ErrorKind::System,
            format!("request to {url} failed, reason: {e}"),
        )
    })?;
    let url_str = url.as_str();
    let key = PoolKey::from_url(url);

    if url.scheme() == "https" {
        if let Some(handle) = agent.h2_handle(&key).await {
            match handle.ready().await {
                Ok(ready) => {
                    tracing::debug!(%url, "reusing pooled HTTP/2 connection");
                    return h2::send_request(ready, method, &uri, headers, body, url_str).await;
                }
                Err(e) => {
                    tracing::debug!(%url, "pooled HTTP/2 connection failed, reconnecting: {e}");
                    agent.evict_h2(&key).await;
                }
            }
        }
    }

    let stream = agent.connector().connect(&uri).await?;
    if stream.is_h2() {
        tracing::debug!(%url, "ALPN selected h2");
        let handle = h2::handshake(stream, url_str).await?;
        agent.store_h2(key, handle.clone()).await;
        h2::send_request(handle, method, &uri, headers, body, url_str).await
    } else {
        h1::send_request(stream, method, &uri, headers, body, url_str).await
    }
}

/// Wrap the body stream in a decoder when the response is compressed and
/// decoding applies: compression enabled, a body-bearing status, not a
/// HEAD response, and a coding we understand.
fn interpose_decoder(
    response: &mut TransportResponse,
    method: &Method,
    compress: bool,
    url: &Url,
) {
    if !compress || *method == Method::HEAD || matches!(response.status, 204 | 304) {
        return;
    }
    let Some(coding) = response.headers.get("content-encoding") else {
        return;
    };
    let decoder = match coding.to_ascii_lowercase().as_str() {
        "gzip" | "x-gzip" => ContentDecoder::gzip(),
        "deflate" | "x-deflate" => ContentDecoder::deflate(),
        _ => return,
    };
    tracing::debug!(%url, encoding = %coding, "decompressing response body");
    let inner = mem::replace(
        &mut response.body,
        Box::pin(futures_util::stream::empty()),
    );
    response.body = decode::decode_stream(inner, decoder, url.to_string());
}
