//! HTTP/1.1 engine.
//!
//! Serializes the request (with chunked framing for unknown-length
//! bodies), parses the response head via httparse (skipping 1xx
//! interim responses per RFC 9112 Section 6), then hands the socket to a
//! spawned reader task that forwards body bytes through a channel as they
//! arrive, framed by Transfer-Encoding, Content-Length, or connection
//! close, in that precedence order.

use bytes::Bytes;
use futures_util::StreamExt;
use http::Method;
use http::Uri;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

use super::connector::MaybeHttpsStream;
use super::RawResponse;
use crate::body::{ChannelStream, WireBody};
use crate::error::{ErrorKind, FetchError, Result};

/// Maximum response head size (64KB).
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Maximum number of response headers.
const MAX_HEADERS: usize = 128;

/// Send one request on a fresh connection and return the response head
/// with a streaming body. The connection is dropped when the body ends.
pub(crate) async fn send_request(
    mut stream: MaybeHttpsStream,
    method: &Method,
    uri: &Uri,
    headers: &[(String, String)],
    body: WireBody,
    url: &str,
) -> Result<RawResponse> {
    let head = serialize_head(method, uri, headers, &body);
    stream
        .write_all(&head)
        .await
        .map_err(|e| send_error(url, e))?;
    write_body(&mut stream, headers, body, url).await?;
    stream.flush().await.map_err(|e| send_error(url, e))?;

    read_response(stream, method, url).await
}

fn send_error(url: &str, err: std::io::Error) -> FetchError {
    FetchError::io(format!("request to {url} failed, reason: {err}"), err)
}

fn protocol_error(url: &str, detail: impl std::fmt::Display) -> FetchError {
    FetchError::new(
        ErrorKind::System,
        format!("request to {url} failed, reason: {detail}"),
    )
}

fn body_error(url: &str, detail: impl std::fmt::Display) -> FetchError {
    FetchError::new(
        ErrorKind::System,
        format!("Invalid response body while trying to fetch {url}: {detail}"),
    )
}

/// Serialize the request line and headers.
///
/// The request-target is origin-form; Host comes from the URI and wins
/// over any caller-supplied value. A Content-Length is added for
/// materialized bodies when the negotiated headers carry neither a
/// length nor a Transfer-Encoding.
fn serialize_head(
    method: &Method,
    uri: &Uri,
    headers: &[(String, String)],
    body: &WireBody,
) -> Vec<u8> {
    let mut head = Vec::with_capacity(512);
    head.extend_from_slice(method.as_str().as_bytes());
    head.push(b' ');
    let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    head.extend_from_slice(target.as_bytes());
    head.extend_from_slice(b" HTTP/1.1\r\n");

    head.extend_from_slice(b"Host: ");
    if let Some(host) = uri.host() {
        head.extend_from_slice(host.as_bytes());
        if let Some(port) = uri.port() {
            head.push(b':');
            head.extend_from_slice(port.as_str().as_bytes());
        }
    }
    head.extend_from_slice(b"\r\n");

    for (name, value) in headers {
        if name.eq_ignore_ascii_case("host") {
            continue;
        }
        head.extend_from_slice(name.as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }

    if let WireBody::Full(payload) = body {
        let framed = headers.iter().any(|(name, _)| {
            name.eq_ignore_ascii_case("content-length")
                || name.eq_ignore_ascii_case("transfer-encoding")
        });
        if !framed {
            head.extend_from_slice(
                format!("Content-Length: {}\r\n", payload.len()).as_bytes(),
            );
        }
    }

    head.extend_from_slice(b"\r\n");
    head
}

/// Write the request payload. Streaming bodies use chunked framing when
/// the negotiated headers request it, raw writes otherwise (caller
/// supplied its own Content-Length).
async fn write_body(
    stream: &mut MaybeHttpsStream,
    headers: &[(String, String)],
    body: WireBody,
    url: &str,
) -> Result<()> {
    match body {
        WireBody::None => Ok(()),
        WireBody::Full(payload) => stream
            .write_all(&payload)
            .await
            .map_err(|e| send_error(url, e)),
        WireBody::Streaming(mut chunks) => {
            let chunked = headers.iter().any(|(name, value)| {
                name.eq_ignore_ascii_case("transfer-encoding")
                    && value.to_ascii_lowercase().contains("chunked")
            });
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;
                if chunk.is_empty() {
                    continue;
                }
                if chunked {
                    stream
                        .write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
                        .await
                        .map_err(|e| send_error(url, e))?;
                    stream
                        .write_all(&chunk)
                        .await
                        .map_err(|e| send_error(url, e))?;
                    stream
                        .write_all(b"\r\n")
                        .await
                        .map_err(|e| send_error(url, e))?;
                } else {
                    stream
                        .write_all(&chunk)
                        .await
                        .map_err(|e| send_error(url, e))?;
                }
            }
            if chunked {
                stream
                    .write_all(b"0\r\n\r\n")
                    .await
                    .map_err(|e| send_error(url, e))?;
            }
            Ok(())
        }
    }
}

/// Read and parse the response head, skipping 1xx interim responses,
/// then install the body reader.
async fn read_response(
    mut stream: MaybeHttpsStream,
    method: &Method,
    url: &str,
) -> Result<RawResponse> {
    let mut buffer: Vec<u8> = Vec::with_capacity(8 * 1024);

    loop {
        let head_len = loop {
            if let Some(end) = find_head_end(&buffer) {
                break end;
            }
            if buffer.len() >= MAX_HEAD_SIZE {
                return Err(protocol_error(url, "response headers too large"));
            }
            let mut read_buf = [0u8; 8192];
            let n = stream
                .read(&mut read_buf)
                .await
                .map_err(|e| send_error(url, e))?;
            if n == 0 {
                return Err(protocol_error(
                    url,
                    "connection closed before response headers",
                ));
            }
            buffer.extend_from_slice(&read_buf[..n]);
        };

        let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Response::new(&mut header_storage);
        match parsed.parse(&buffer[..head_len]) {
            Ok(httparse::Status::Complete(_)) => {}
            Ok(httparse::Status::Partial) => {
                return Err(protocol_error(url, "incomplete response headers"));
            }
            Err(e) => return Err(protocol_error(url, format!("malformed response: {e}"))),
        }

        let status = parsed
            .code
            .ok_or_else(|| protocol_error(url, "missing status code"))?;
        let status_text = parsed.reason.unwrap_or("").to_owned();
        let headers: Vec<(String, String)> = parsed
            .headers
            .iter()
            .filter(|h| !h.name.is_empty())
            .map(|h| {
                (
                    h.name.to_owned(),
                    String::from_utf8_lossy(h.value).trim().to_owned(),
                )
            })
            .collect();

        buffer.drain(..head_len);

        // A client MUST be able to parse one or more 1xx responses
        // received prior to the final response (RFC 9112 Section 6);
        // they carry no body.
        if (100..200).contains(&status) {
            continue;
        }

        let framing = response_framing(status, method, &headers, url)?;
        let body = spawn_body_reader(stream, buffer, framing, url.to_owned());
        return Ok(RawResponse {
            status,
            status_text,
            headers,
            body,
        });
    }
}

/// How the response body is delimited.
#[derive(Debug, PartialEq, Eq)]
enum Framing {
    /// HEAD response, 1xx, 204, or 304: no body at all.
    None,
    Chunked,
    ContentLength(usize),
    /// Body runs until the server closes the connection.
    Close,
}

/// Decide body framing per RFC 9112 Section 6.3: Transfer-Encoding wins
/// over Content-Length; chunked must be the final coding; a non-chunked
/// Transfer-Encoding or the absence of both means close-delimited.
fn response_framing(
    status: u16,
    method: &Method,
    headers: &[(String, String)],
    url: &str,
) -> Result<Framing> {
    if matches!(status, 204 | 304) || *method == Method::HEAD {
        return Ok(Framing::None);
    }

    if let Some(te) = header_value(headers, "transfer-encoding") {
        let chunked_last = te
            .rsplit(',')
            .next()
            .map(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
            .unwrap_or(false);
        return Ok(if chunked_last {
            Framing::Chunked
        } else {
            Framing::Close
        });
    }

    if let Some(cl) = header_value(headers, "content-length") {
        let len = parse_content_length(cl)
            .ok_or_else(|| protocol_error(url, format!("invalid content-length: {cl}")))?;
        return Ok(Framing::ContentLength(len));
    }

    Ok(Framing::Close)
}

/// Case-insensitive header lookup over wire pairs.
fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Parse a Content-Length value. Repeated identical values are allowed;
/// anything else is rejected (RFC 9112 Section 6.2).
fn parse_content_length(value: &str) -> Option<usize> {
    let mut result = None;
    for part in value.split(',') {
        let parsed: usize = part.trim().parse().ok()?;
        match result {
            None => result = Some(parsed),
            Some(prev) if prev == parsed => {}
            Some(_) => return None,
        }
    }
    result
}

/// Hand the socket to a reader task forwarding body bytes into a bounded
/// channel. Dropping the returned stream stops the reader at its next
/// send.
fn spawn_body_reader(
    stream: MaybeHttpsStream,
    leftover: Vec<u8>,
    framing: Framing,
    url: String,
) -> crate::body::ByteStream {
    let (tx, rx) = mpsc::channel::<Result<Bytes>>(8);
    tokio::spawn(async move {
        let mut reader = BodyReader {
            stream,
            buffer: leftover,
            tx,
        };
        let result = match framing {
            Framing::None => Ok(()),
            Framing::ContentLength(len) => reader.forward_fixed(len, &url).await,
            Framing::Chunked => reader.forward_chunked(&url).await,
            Framing::Close => reader.forward_until_close(&url).await,
        };
        if let Err(e) = result {
            let _ = reader.tx.send(Err(e)).await;
        }
    });
    Box::pin(ChannelStream::new(rx))
}

struct BodyReader {
    stream: MaybeHttpsStream,
    buffer: Vec<u8>,
    tx: mpsc::Sender<Result<Bytes>>,
}

impl BodyReader {
    /// Forward bytes out of the internal buffer; false when the consumer
    /// is gone.
    async fn emit(&mut self, count: usize) -> bool {
        let chunk = Bytes::copy_from_slice(&self.buffer[..count]);
        self.buffer.drain(..count);
        self.tx.send(Ok(chunk)).await.is_ok()
    }

    /// Refill the buffer from the socket; Ok(false) on EOF.
    async fn fill(&mut self, url: &str) -> Result<bool> {
        let mut read_buf = [0u8; 8192];
        let n = self
            .stream
            .read(&mut read_buf)
            .await
            .map_err(|e| body_error(url, e))?;
        if n == 0 {
            return Ok(false);
        }
        self.buffer.extend_from_slice(&read_buf[..n]);
        Ok(true)
    }

    async fn forward_fixed(&mut self, len: usize, url: &str) -> Result<()> {
        let mut remaining = len;
        while remaining > 0 {
            if self.buffer.is_empty() && !self.fill(url).await? {
                return Err(body_error(
                    url,
                    format!(
                        "connection closed with {remaining} of {len} body bytes missing"
                    ),
                ));
            }
            let take = self.buffer.len().min(remaining);
            if take > 0 {
                remaining -= take;
                if !self.emit(take).await {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    async fn forward_until_close(&mut self, url: &str) -> Result<()> {
        loop {
            if !self.buffer.is_empty() {
                let take = self.buffer.len();
                if !self.emit(take).await {
                    return Ok(());
                }
            }
            if !self.fill(url).await? {
                return Ok(());
            }
        }
    }

    async fn forward_chunked(&mut self, url: &str) -> Result<()> {
        loop {
            // Chunk-size line, possibly with extensions after ';'.
            let (size, line_len) = loop {
                match parse_chunk_size(&self.buffer) {
                    Ok(Some(found)) => break found,
                    Ok(None) => {
                        if !self.fill(url).await? {
                            return Err(body_error(
                                url,
                                "connection closed while reading chunk size",
                            ));
                        }
                    }
                    Err(()) => return Err(body_error(url, "invalid chunk size")),
                }
            };
            self.buffer.drain(..line_len);

            if size == 0 {
                return self.consume_trailers(url).await;
            }

            let mut remaining = size;
            while remaining > 0 {
                if self.buffer.is_empty() && !self.fill(url).await? {
                    return Err(body_error(
                        url,
                        "connection closed while reading chunk data",
                    ));
                }
                let take = self.buffer.len().min(remaining);
                if take > 0 {
                    remaining -= take;
                    if !self.emit(take).await {
                        return Ok(());
                    }
                }
            }

            // CRLF terminating the chunk data.
            while self.buffer.len() < 2 {
                if !self.fill(url).await? {
                    return Err(body_error(
                        url,
                        "connection closed while reading chunk terminator",
                    ));
                }
            }
            if &self.buffer[..2] != b"\r\n" {
                return Err(body_error(url, "invalid chunk terminator"));
            }
            self.buffer.drain(..2);
        }
    }

    /// Consume the trailer section after the last chunk: zero or more
    /// field lines ending with an empty line. A close here is tolerated.
    async fn consume_trailers(&mut self, url: &str) -> Result<()> {
        loop {
            match find_crlf(&self.buffer) {
                Some(0) => {
                    self.buffer.drain(..2);
                    return Ok(());
                }
                Some(pos) => {
                    self.buffer.drain(..pos + 2);
                }
                None => {
                    if !self.fill(url).await? {
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Position just past the `\r\n\r\n` ending the head.
fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

/// First CRLF position in the buffer.
fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\r\n")
}

/// Parse a chunk-size line. `Ok(None)` means more data is needed;
/// `Err(())` means the size was not valid hex.
fn parse_chunk_size(buffer: &[u8]) -> std::result::Result<Option<(usize, usize)>, ()> {
    let Some(pos) = find_crlf(buffer) else {
        return Ok(None);
    };
    let line = std::str::from_utf8(&buffer[..pos]).map_err(|_| ())?;
    let size_part = line.split(';').next().ok_or(())?.trim();
    let size = usize::from_str_radix(size_part, 16).map_err(|_| ())?;
    Ok(Some((size, pos + 2)))
}
