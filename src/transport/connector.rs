//! TCP/TLS connection establishment.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use boring::ssl::{SslConnector, SslMethod, SslVersion};
use http::Uri;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{lookup_host, TcpStream};
use tokio_boring::SslStream;

use crate::error::{ErrorKind, FetchError, Result};

/// BoringSSL-backed connector producing plain or TLS streams.
///
/// ALPN offers `h2` then `http/1.1`; the negotiated protocol decides
/// which engine drives the connection.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Connector;

impl Connector {
    pub(crate) fn new() -> Self {
        Self
    }

    /// Connect to the URI's authority, wrapping TLS for `https`.
    pub(crate) async fn connect(&self, uri: &Uri) -> Result<MaybeHttpsStream> {
        let host = uri.host().ok_or_else(|| {
            FetchError::new(ErrorKind::Type, "Only absolute URLs are supported")
        })?;
        let https = uri.scheme_str() == Some("https");
        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });

        let addr = lookup_host((host, port))
            .await
            .map_err(|e| dns_error(uri, host, e))?
            .next()
            .ok_or_else(|| {
                dns_error(
                    uri,
                    host,
                    io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
                )
            })?;

        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|e| FetchError::io(format!("request to {uri} failed, reason: {e}"), e))?;

        if !https {
            return Ok(MaybeHttpsStream::Http(tcp));
        }

        let config = tls_config()?
            .configure()
            .map_err(|e| tls_error(uri, e))?;
        let tls = tokio_boring::connect(config, host, tcp)
            .await
            .map_err(|e| {
                FetchError::new(
                    ErrorKind::System,
                    format!("request to {uri} failed, reason: TLS handshake failed: {e}"),
                )
            })?;
        Ok(MaybeHttpsStream::Https(tls))
    }
}

fn tls_config() -> Result<SslConnector> {
    let mut builder = SslConnector::builder(SslMethod::tls_client())
        .map_err(|e| FetchError::new(ErrorKind::System, format!("TLS setup failed: {e}")))?;
    builder
        .set_min_proto_version(Some(SslVersion::TLS1_2))
        .map_err(|e| FetchError::new(ErrorKind::System, format!("TLS setup failed: {e}")))?;
    builder
        .set_max_proto_version(Some(SslVersion::TLS1_3))
        .map_err(|e| FetchError::new(ErrorKind::System, format!("TLS setup failed: {e}")))?;
    builder
        .set_alpn_protos(b"\x02h2\x08http/1.1")
        .map_err(|e| FetchError::new(ErrorKind::System, format!("TLS setup failed: {e}")))?;
    Ok(builder.build())
}

fn dns_error(uri: &Uri, host: &str, err: io::Error) -> FetchError {
    FetchError::with_source(
        ErrorKind::System,
        format!("request to {uri} failed, reason: getaddrinfo ENOTFOUND {host}"),
        err,
    )
    .with_code("ENOTFOUND")
}

fn tls_error(uri: &Uri, err: impl std::error::Error + Send + Sync + 'static) -> FetchError {
    FetchError::with_source(
        ErrorKind::System,
        format!("request to {uri} failed, reason: TLS configuration failed"),
        err,
    )
}

/// Stream that is either plain TCP (`http`) or TLS (`https`).
pub(crate) enum MaybeHttpsStream {
    Http(TcpStream),
    Https(SslStream<TcpStream>),
}

impl MaybeHttpsStream {
    /// Whether the TLS handshake negotiated HTTP/2 via ALPN.
    ///
    /// Plain TCP has no ALPN and always speaks HTTP/1.1.
    pub(crate) fn is_h2(&self) -> bool {
        match self {
            MaybeHttpsStream::Http(_) => false,
            MaybeHttpsStream::Https(stream) => {
                stream.ssl().selected_alpn_protocol() == Some(b"h2")
            }
        }
    }
}

impl AsyncRead for MaybeHttpsStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_read(cx, buf),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeHttpsStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_write(cx, buf),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_flush(cx),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_shutdown(cx),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
