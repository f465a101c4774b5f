//! Incremental content-coding decoders.
//!
//! Response bodies are streams, so decoding happens chunk by chunk
//! through flate2's write-side decoders: compressed bytes go in, decoded
//! bytes accumulate in the inner `Vec` and are drained per feed.

use std::io::{self, Write};
use std::mem;

use bytes::Bytes;
use flate2::write::{DeflateDecoder, MultiGzDecoder, ZlibDecoder};
use futures_util::StreamExt;

use crate::body::ByteStream;
use crate::error::{ErrorKind, FetchError};

/// Streaming decoder for one response's `content-encoding`.
///
/// Decoders sit inside `Option`s so `finish` can consume them by value
/// at end of stream; a `None` decoder means decoding already ended.
pub(crate) enum ContentDecoder {
    Gzip {
        decoder: Option<MultiGzDecoder<Vec<u8>>>,
        // Once a member decoded cleanly, later garbage is ignored rather
        // than failing the stream.
        produced: bool,
    },
    /// `deflate` in the wild is ambiguous: some servers send zlib-wrapped
    /// data, some raw. The variant is picked by sniffing the first
    /// payload byte (compression-method nibble 8 = zlib).
    Deflate(DeflateVariant),
}

pub(crate) enum DeflateVariant {
    Pending,
    Zlib(Option<ZlibDecoder<Vec<u8>>>),
    Raw(Option<DeflateDecoder<Vec<u8>>>),
}

impl ContentDecoder {
    pub(crate) fn gzip() -> Self {
        ContentDecoder::Gzip {
            decoder: Some(MultiGzDecoder::new(Vec::new())),
            produced: false,
        }
    }

    pub(crate) fn deflate() -> Self {
        ContentDecoder::Deflate(DeflateVariant::Pending)
    }

    /// Decode one compressed chunk, returning whatever plaintext it
    /// completed.
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> io::Result<Bytes> {
        match self {
            ContentDecoder::Gzip { decoder, produced } => {
                let Some(gz) = decoder.as_mut() else {
                    return Ok(Bytes::new());
                };
                match gz.write_all(chunk) {
                    Ok(()) => {}
                    // Trailing garbage after a complete member; the member
                    // may have decoded within this same write.
                    Err(e) if *produced || !gz.get_ref().is_empty() => {
                        tracing::debug!("ignoring gzip trailer bytes: {e}");
                        let out = mem::take(gz.get_mut());
                        *decoder = None;
                        return Ok(Bytes::from(out));
                    }
                    Err(e) => return Err(e),
                }
                let out = mem::take(gz.get_mut());
                if !out.is_empty() {
                    *produced = true;
                }
                Ok(Bytes::from(out))
            }
            ContentDecoder::Deflate(variant) => {
                if matches!(variant, DeflateVariant::Pending) {
                    if chunk.is_empty() {
                        return Ok(Bytes::new());
                    }
                    *variant = if chunk[0] & 0x0f == 0x08 {
                        DeflateVariant::Zlib(Some(ZlibDecoder::new(Vec::new())))
                    } else {
                        DeflateVariant::Raw(Some(DeflateDecoder::new(Vec::new())))
                    };
                }
                match variant {
                    DeflateVariant::Zlib(Some(decoder)) => {
                        decoder.write_all(chunk)?;
                        Ok(Bytes::from(mem::take(decoder.get_mut())))
                    }
                    DeflateVariant::Raw(Some(decoder)) => {
                        decoder.write_all(chunk)?;
                        Ok(Bytes::from(mem::take(decoder.get_mut())))
                    }
                    _ => Ok(Bytes::new()),
                }
            }
        }
    }

    /// Flush the decoder at end of stream, returning any tail plaintext.
    pub(crate) fn finish(&mut self) -> io::Result<Bytes> {
        match self {
            ContentDecoder::Gzip { decoder, .. } => match decoder.take() {
                Some(gz) => Ok(Bytes::from(gz.finish()?)),
                None => Ok(Bytes::new()),
            },
            ContentDecoder::Deflate(DeflateVariant::Zlib(decoder)) => match decoder.take() {
                Some(zlib) => Ok(Bytes::from(zlib.finish()?)),
                None => Ok(Bytes::new()),
            },
            ContentDecoder::Deflate(DeflateVariant::Raw(decoder)) => match decoder.take() {
                Some(raw) => Ok(Bytes::from(raw.finish()?)),
                None => Ok(Bytes::new()),
            },
            // Empty body: nothing was ever sniffed.
            ContentDecoder::Deflate(DeflateVariant::Pending) => Ok(Bytes::new()),
        }
    }
}

/// Interpose a decoder on a byte stream.
pub(crate) fn decode_stream(inner: ByteStream, decoder: ContentDecoder, url: String) -> ByteStream {
    struct State {
        inner: ByteStream,
        decoder: ContentDecoder,
        done: bool,
        url: String,
    }

    let state = State {
        inner,
        decoder,
        done: false,
        url,
    };

    Box::pin(futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if state.done {
                return None;
            }
            match state.inner.next().await {
                Some(Ok(chunk)) => match state.decoder.feed(&chunk) {
                    Ok(out) if out.is_empty() => continue,
                    Ok(out) => return Some((Ok(out), state)),
                    Err(e) => {
                        state.done = true;
                        let err = decode_error(&state.url, e);
                        return Some((Err(err), state));
                    }
                },
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.done = true;
                    return match state.decoder.finish() {
                        Ok(tail) if tail.is_empty() => None,
                        Ok(tail) => Some((Ok(tail), state)),
                        Err(e) => Some((Err(decode_error(&state.url, e)), state)),
                    };
                }
            }
        }
    }))
}

fn decode_error(url: &str, err: io::Error) -> FetchError {
    FetchError::with_source(
        ErrorKind::System,
        format!("Invalid response body while trying to fetch {url}: {err}"),
        err,
    )
    .with_code("Z_DATA_ERROR")
}
