//! Body abstraction: polymorphic source, single-use consumption with size
//! caps and deadlines, and clone-by-tee.
//!
//! Every request and response owns a [`Body`]. The source is converted to
//! a byte stream exactly once, on the first accessor call; afterwards the
//! body is *disturbed* and every further accessor or clone fails.

use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::stream::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::blob::Blob;
use crate::error::{ErrorKind, FetchError, Result};
use crate::form::FormData;

/// The internal byte-stream interface every body source normalizes to.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Tagged body source, converted to a [`ByteStream`] at consumption time.
pub(crate) enum BodySource {
    Empty,
    Text(String),
    UrlEncoded(Vec<(String, String)>),
    Bytes(Bytes),
    Blob(Blob),
    Form(FormData),
    Stream(ByteStream),
}

impl std::fmt::Debug for BodySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            BodySource::Empty => "Empty",
            BodySource::Text(_) => "Text",
            BodySource::UrlEncoded(_) => "UrlEncoded",
            BodySource::Bytes(_) => "Bytes",
            BodySource::Blob(_) => "Blob",
            BodySource::Form(_) => "Form",
            BodySource::Stream(_) => "Stream",
        };
        f.write_str(tag)
    }
}

/// Request or response payload with single-use consumption semantics.
#[derive(Debug)]
pub struct Body {
    source: BodySource,
    disturbed: bool,
    stream_backed: bool,
    size: u64,
    timeout: Duration,
    content_type: Option<String>,
    url: String,
}

impl Body {
    fn from_source(source: BodySource) -> Self {
        let stream_backed = matches!(source, BodySource::Stream(_));
        Self {
            source,
            disturbed: false,
            stream_backed,
            size: 0,
            timeout: Duration::ZERO,
            content_type: None,
            url: String::new(),
        }
    }

    /// An empty body.
    pub fn empty() -> Self {
        Self::from_source(BodySource::Empty)
    }

    /// A URL-encoded form body (`application/x-www-form-urlencoded`).
    pub fn url_encoded<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::from_source(BodySource::UrlEncoded(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    /// A streaming body. Foreign error types are coerced into the fetch
    /// error taxonomy (kind `System`); zero-length chunks are dropped.
    pub fn wrap_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let stream = stream.filter_map(|item| async move {
            match item {
                Ok(chunk) if chunk.is_empty() => None,
                Ok(chunk) => Some(Ok(chunk)),
                Err(e) => Some(Err(FetchError::with_source(
                    ErrorKind::System,
                    format!("Invalid response body while trying to fetch: {e}"),
                    e,
                ))),
            }
        });
        Self::from_source(BodySource::Stream(Box::pin(stream)))
    }

    /// A streaming body whose errors are already fetch errors. Used by
    /// the transport layer, which formats messages with the request URL.
    pub(crate) fn from_byte_stream(stream: ByteStream) -> Self {
        Self::from_source(BodySource::Stream(stream))
    }

    /// Attach consumption context: owner URL for error messages, size cap
    /// (0 = unbounded), body deadline (zero = disabled), and the
    /// content type used by `blob()`/`form_data()`.
    pub(crate) fn set_context(
        &mut self,
        url: &str,
        size: u64,
        timeout: Duration,
        content_type: Option<String>,
    ) {
        self.url = url.to_owned();
        self.size = size;
        self.timeout = timeout;
        self.content_type = content_type;
    }

    /// Whether consumption has begun.
    pub fn body_used(&self) -> bool {
        self.disturbed
    }

    /// Whether the source is a stream (not replayable across redirects).
    pub(crate) fn is_stream_backed(&self) -> bool {
        self.stream_backed
    }

    /// Whether the source is the empty body.
    pub(crate) fn is_empty_source(&self) -> bool {
        matches!(self.source, BodySource::Empty)
    }

    /// Content type inferred from the source shape, for negotiation.
    pub(crate) fn infer_content_type(&self) -> Option<String> {
        match &self.source {
            BodySource::Text(_) => Some("text/plain;charset=UTF-8".to_owned()),
            BodySource::UrlEncoded(_) => {
                Some("application/x-www-form-urlencoded;charset=UTF-8".to_owned())
            }
            BodySource::Blob(blob) if !blob.content_type().is_empty() => {
                Some(blob.content_type().to_owned())
            }
            BodySource::Form(form) => Some(form.content_type()),
            _ => None,
        }
    }

    /// Byte length of the source when definitely known.
    pub(crate) fn source_len(&self) -> Option<u64> {
        match &self.source {
            BodySource::Empty => Some(0),
            BodySource::Text(text) => Some(text.len() as u64),
            BodySource::UrlEncoded(pairs) => Some(serialize_urlencoded(pairs).len() as u64),
            BodySource::Bytes(bytes) => Some(bytes.len() as u64),
            BodySource::Blob(blob) => Some(blob.size()),
            BodySource::Form(form) => Some(form.encoded_len()),
            BodySource::Stream(_) => None,
        }
    }

    /// Materialize the source for one transport dispatch without
    /// disturbing it. Replayable sources are cloned so a redirect can
    /// send them again; a stream source is moved out and cannot replay.
    pub(crate) fn wire_body(&mut self) -> WireBody {
        if matches!(self.source, BodySource::Stream(_)) {
            return match mem::replace(&mut self.source, BodySource::Empty) {
                BodySource::Stream(stream) => WireBody::Streaming(stream),
                _ => unreachable!(),
            };
        }
        match &self.source {
            BodySource::Empty => WireBody::None,
            BodySource::Text(text) => WireBody::Full(Bytes::from(text.clone())),
            BodySource::UrlEncoded(pairs) => WireBody::Full(serialize_urlencoded(pairs)),
            BodySource::Bytes(bytes) => WireBody::Full(bytes.clone()),
            BodySource::Blob(blob) => WireBody::Full(blob.clone().into_bytes()),
            BodySource::Form(form) => WireBody::Full(form.encode()),
            BodySource::Stream(_) => unreachable!(),
        }
    }

    /// Drop the payload (redirect method rewriting).
    pub(crate) fn clear(&mut self) {
        self.source = BodySource::Empty;
        self.stream_backed = false;
    }

    /// Split off an independent copy of this body.
    ///
    /// Stream sources are tee'd: one branch replaces this body's source,
    /// the other backs the returned clone. Materialized sources are
    /// cloned by value (cheap: payloads are refcounted).
    pub fn try_clone(&mut self) -> Result<Body> {
        if self.disturbed {
            return Err(FetchError::new(
                ErrorKind::Type,
                "cannot clone body after it is used",
            ));
        }
        let source = if matches!(self.source, BodySource::Stream(_)) {
            let stream = match mem::replace(&mut self.source, BodySource::Empty) {
                BodySource::Stream(stream) => stream,
                _ => unreachable!(),
            };
            let (mine, theirs) = tee(stream);
            self.source = BodySource::Stream(mine);
            BodySource::Stream(theirs)
        } else {
            match &self.source {
                BodySource::Empty => BodySource::Empty,
                BodySource::Text(text) => BodySource::Text(text.clone()),
                BodySource::UrlEncoded(pairs) => BodySource::UrlEncoded(pairs.clone()),
                BodySource::Bytes(bytes) => BodySource::Bytes(bytes.clone()),
                BodySource::Blob(blob) => BodySource::Blob(blob.clone()),
                BodySource::Form(form) => BodySource::Form(form.clone()),
                BodySource::Stream(_) => unreachable!(),
            }
        };
        Ok(Body {
            source,
            disturbed: false,
            stream_backed: self.stream_backed,
            size: self.size,
            timeout: self.timeout,
            content_type: self.content_type.clone(),
            url: self.url.clone(),
        })
    }

    /// Consume the body and return the raw bytes.
    pub async fn bytes(&mut self) -> Result<Bytes> {
        self.consume().await
    }

    /// Consume the body and decode it as UTF-8 text (lossily).
    pub async fn text(&mut self) -> Result<String> {
        let buf = self.consume().await?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Consume the body and parse it as JSON.
    ///
    /// An empty body is not valid JSON and fails like any other parse
    /// error.
    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<T> {
        let buf = self.consume().await?;
        serde_json::from_slice(&buf).map_err(|e| {
            FetchError::with_source(
                ErrorKind::InvalidJson,
                format!("invalid json response body at {} reason: {}", self.url, e),
                e,
            )
        })
    }

    /// Consume the body into a [`Blob`] typed by the `content-type`.
    pub async fn blob(&mut self) -> Result<Blob> {
        let content_type = self.content_type.clone().unwrap_or_default();
        let buf = self.consume().await?;
        Ok(Blob::new(buf, content_type))
    }

    /// Consume the body and parse it as form data.
    ///
    /// Requires `multipart/form-data` with a boundary parameter or
    /// `application/x-www-form-urlencoded`.
    pub async fn form_data(&mut self) -> Result<FormData> {
        let content_type = self
            .content_type
            .clone()
            .unwrap_or_default()
            .to_ascii_lowercase();
        let buf = self.consume().await?;
        if let Some(boundary) = multipart_boundary(&content_type) {
            FormData::parse_multipart(&buf, &boundary, &self.url)
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            Ok(FormData::parse_urlencoded(&buf))
        } else {
            Err(FetchError::new(
                ErrorKind::Type,
                format!("could not parse content as FormData: {}", self.url),
            ))
        }
    }

    /// The single-use consumption protocol: check disturbance, convert
    /// the source to a stream, accumulate under the size cap, and race
    /// the body deadline.
    async fn consume(&mut self) -> Result<Bytes> {
        if self.disturbed {
            return Err(FetchError::new(
                ErrorKind::Type,
                format!("body used already for: {}", self.url),
            ));
        }
        self.disturbed = true;

        let source = mem::replace(&mut self.source, BodySource::Empty);
        let stream = source.into_stream();
        let accumulate = accumulate(stream, self.size, &self.url);

        if self.timeout.is_zero() {
            accumulate.await
        } else {
            match tokio::time::timeout(self.timeout, accumulate).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::new(
                    ErrorKind::BodyTimeout,
                    format!(
                        "Response timeout while trying to fetch {} (over {}ms)",
                        self.url,
                        self.timeout.as_millis()
                    ),
                )),
            }
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::from_source(BodySource::Text(text))
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Self::from_source(BodySource::Text(text.to_owned()))
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::from_source(BodySource::Bytes(bytes))
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_source(BodySource::Bytes(Bytes::from(bytes)))
    }
}

impl From<&[u8]> for Body {
    fn from(bytes: &[u8]) -> Self {
        Self::from_source(BodySource::Bytes(Bytes::copy_from_slice(bytes)))
    }
}

impl From<Blob> for Body {
    fn from(blob: Blob) -> Self {
        Self::from_source(BodySource::Blob(blob))
    }
}

impl From<FormData> for Body {
    fn from(form: FormData) -> Self {
        Self::from_source(BodySource::Form(form))
    }
}

impl BodySource {
    /// Convert the source into the normalized byte stream.
    fn into_stream(self) -> ByteStream {
        match self {
            BodySource::Empty => Box::pin(futures_util::stream::empty()),
            BodySource::Text(text) => once_stream(Bytes::from(text)),
            BodySource::UrlEncoded(pairs) => once_stream(serialize_urlencoded(&pairs)),
            BodySource::Bytes(bytes) => once_stream(bytes),
            BodySource::Blob(blob) => once_stream(blob.into_bytes()),
            BodySource::Form(form) => once_stream(form.encode()),
            BodySource::Stream(stream) => stream,
        }
    }
}

/// Body payload handed to the transport for one dispatch.
pub(crate) enum WireBody {
    None,
    Full(Bytes),
    Streaming(ByteStream),
}

impl WireBody {
    /// Whether any payload will be written.
    pub(crate) fn is_none(&self) -> bool {
        matches!(self, WireBody::None)
    }
}

/// Single-chunk stream over one buffer.
pub(crate) fn once_stream(bytes: Bytes) -> ByteStream {
    Box::pin(futures_util::stream::once(async move { Ok(bytes) }))
}

/// Adapter exposing a bounded channel receiver as a [`ByteStream`].
pub(crate) struct ChannelStream {
    rx: mpsc::Receiver<Result<Bytes>>,
}

impl ChannelStream {
    pub(crate) fn new(rx: mpsc::Receiver<Result<Bytes>>) -> Self {
        Self { rx }
    }
}

impl Stream for ChannelStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

struct UnboundedChannelStream {
    rx: mpsc::UnboundedReceiver<Result<Bytes>>,
}

impl Stream for UnboundedChannelStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Split one stream into two independent branches observing every chunk.
///
/// A pump task forwards each chunk into two unbounded channels, so the
/// faster branch never waits on the slower one. Errors are replicated
/// without the boxed cause. The pump stops once both branches are gone.
fn tee(stream: ByteStream) -> (ByteStream, ByteStream) {
    let (tx1, rx1) = mpsc::unbounded_channel();
    let (tx2, rx2) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut stream = stream;
        while let Some(item) = stream.next().await {
            let copy = match &item {
                Ok(chunk) => Ok(chunk.clone()),
                Err(e) => Err(e.replicate()),
            };
            let first = tx1.send(item).is_ok();
            let second = tx2.send(copy).is_ok();
            if !first && !second {
                break;
            }
        }
    });
    (
        Box::pin(UnboundedChannelStream { rx: rx1 }),
        Box::pin(UnboundedChannelStream { rx: rx2 }),
    )
}

/// Read the whole stream, enforcing the size cap as chunks arrive.
async fn accumulate(mut stream: ByteStream, limit: u64, url: &str) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    let mut total: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if chunk.is_empty() {
            continue;
        }
        total += chunk.len() as u64;
        if limit > 0 && total > limit {
            return Err(FetchError::new(
                ErrorKind::MaxSize,
                format!("content size at {url} over limit: {limit}"),
            ));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

fn serialize_urlencoded(pairs: &[(String, String)]) -> Bytes {
    let encoded = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .finish();
    Bytes::from(encoded)
}

/// Extract the boundary parameter from a multipart content type.
fn multipart_boundary(content_type: &str) -> Option<String> {
    if !content_type.starts_with("multipart/form-data") {
        return None;
    }
    let marker = "boundary=";
    let start = content_type.find(marker)? + marker.len();
    let rest = &content_type[start..];
    let end = rest.find(';').unwrap_or(rest.len());
    let boundary = rest[..end].trim().trim_matches('"');
    if boundary.is_empty() {
        None
    } else {
        Some(boundary.to_owned())
    }
}
