//! HTTP/2 engine over the `h2` crate.
//!
//! The handshake spawns a connection driver task (no I/O happens without
//! it); request bodies negotiate send-window capacity chunk by chunk;
//! response bodies release flow-control capacity as each data frame is
//! consumed so the peer keeps sending.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::future::poll_fn;
use futures_util::stream::{Stream, StreamExt};
use h2::client::SendRequest;
use h2::{RecvStream, SendStream};
use http::{Method, Request, Uri};

use super::connector::MaybeHttpsStream;
use super::RawResponse;
use crate::body::{ByteStream, WireBody};
use crate::error::{ErrorKind, FetchError, Result};

/// Connection-specific headers that must not appear in HTTP/2 requests
/// (RFC 9113 Section 8.2.2). Host travels as the `:authority`
/// pseudo-header instead.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "te",
    "host",
];

/// Perform the HTTP/2 handshake and spawn the connection driver.
pub(crate) async fn handshake(stream: MaybeHttpsStream, url: &str) -> Result<SendRequest<Bytes>> {
    let (send_request, connection) = h2::client::handshake(stream).await.map_err(|e| {
        FetchError::new(
            ErrorKind::System,
            format!("request to {url} failed, reason: HTTP/2 handshake failed: {e}"),
        )
    })?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!("HTTP/2 connection terminated: {e}");
        }
    });
    Ok(send_request)
}

/// Send one request on an established HTTP/2 connection.
pub(crate) async fn send_request(
    send: SendRequest<Bytes>,
    method: &Method,
    uri: &Uri,
    headers: &[(String, String)],
    body: WireBody,
    url: &str,
) -> Result<RawResponse> {
    let mut send = send.ready().await.map_err(|e| h2_error(url, e))?;

    let mut builder = Request::builder().method(method.clone()).uri(uri.clone());
    for (name, value) in headers {
        if HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }
    let request = builder.body(()).map_err(|e| {
        FetchError::new(
            ErrorKind::System,
            format!("request to {url} failed, reason: {e}"),
        )
    })?;

    let end_of_stream = body.is_none();
    let (response, send_stream) = send
        .send_request(request, end_of_stream)
        .map_err(|e| h2_error(url, e))?;

    if !end_of_stream {
        // The peer may respond before the body finishes (redirects do);
        // body transmission runs concurrently with the response wait.
        let body_url = url.to_owned();
        tokio::spawn(async move {
            if let Err(e) = send_body(send_stream, body).await {
                tracing::debug!("HTTP/2 request body aborted for {body_url}: {e}");
            }
        });
    }

    let response = response.await.map_err(|e| h2_error(url, e))?;
    let status = response.status();
    let status_text = status.canonical_reason().unwrap_or("").to_owned();
    let headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_owned(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    let recv = response.into_body();
    let body: ByteStream = Box::pin(RecvBodyStream {
        recv,
        url: url.to_owned(),
    });

    Ok(RawResponse {
        status: status.as_u16(),
        status_text,
        headers,
        body,
    })
}

fn h2_error(url: &str, err: h2::Error) -> FetchError {
    FetchError::with_source(
        ErrorKind::System,
        format!("request to {url} failed, reason: {err}"),
        err,
    )
}

/// Write the request payload, negotiating send-window capacity for each
/// chunk before pushing it.
async fn send_body(mut send_stream: SendStream<Bytes>, body: WireBody) -> Result<()> {
    match body {
        WireBody::None => Ok(()),
        WireBody::Full(payload) => {
            write_data(&mut send_stream, payload).await?;
            finish(&mut send_stream)
        }
        WireBody::Streaming(mut chunks) => {
            while let Some(chunk) = chunks.next().await {
                write_data(&mut send_stream, chunk?).await?;
            }
            finish(&mut send_stream)
        }
    }
}

async fn write_data(send_stream: &mut SendStream<Bytes>, mut data: Bytes) -> Result<()> {
    while !data.is_empty() {
        send_stream.reserve_capacity(data.len());
        let granted = poll_fn(|cx| send_stream.poll_capacity(cx))
            .await
            .ok_or_else(|| {
                FetchError::new(
                    ErrorKind::System,
                    "HTTP/2 stream closed while sending request body",
                )
            })?
            .map_err(|e| {
                FetchError::with_source(
                    ErrorKind::System,
                    format!("HTTP/2 request body send failed: {e}"),
                    e,
                )
            })?;
        let part = data.split_to(granted.min(data.len()));
        send_stream.send_data(part, false).map_err(|e| {
            FetchError::with_source(
                ErrorKind::System,
                format!("HTTP/2 request body send failed: {e}"),
                e,
            )
        })?;
    }
    Ok(())
}

fn finish(send_stream: &mut SendStream<Bytes>) -> Result<()> {
    send_stream.send_data(Bytes::new(), true).map_err(|e| {
        FetchError::with_source(
            ErrorKind::System,
            format!("HTTP/2 request body send failed: {e}"),
            e,
        )
    })
}

/// Response body adapter: yields data frames and releases flow-control
/// capacity as they are consumed.
struct RecvBodyStream {
    recv: RecvStream,
    url: String,
}

impl Stream for RecvBodyStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.recv.poll_data(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Ready(Some(Ok(chunk))) => {
                let _ = self.recv.flow_control().release_capacity(chunk.len());
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                let url = self.url.clone();
                Poll::Ready(Some(Err(FetchError::with_source(
                    ErrorKind::System,
                    format!("Invalid response body while trying to fetch {url}: {e}"),
                    e,
                ))))
            }
        }
    }
}
