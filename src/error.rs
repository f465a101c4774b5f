//! Error type for fetch operations.

use std::io;

/// Result type alias using our FetchError type.
pub type Result<T> = std::result::Result<T, FetchError>;

/// Classification of a [`FetchError`].
///
/// Every failure the crate produces carries exactly one kind; callers
/// branch on it rather than on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller misuse: bad URL, invalid header, GET/HEAD with a body,
    /// reading an already-consumed body.
    Type,
    /// Transport, DNS, or decoding failure outside the caller's control.
    System,
    /// `json()` could not parse the body (an empty body is also invalid).
    InvalidJson,
    /// The hop counter would exceed the configured follow limit.
    MaxRedirect,
    /// A 307/308 arrived for a request whose body cannot be replayed.
    UnsupportedRedirect,
    /// A redirect arrived while the redirect mode was `Error`.
    NoRedirect,
    /// Response headers did not arrive before the request deadline.
    RequestTimeout,
    /// Body consumption exceeded the body deadline.
    BodyTimeout,
    /// The accumulated body exceeded the configured size cap.
    MaxSize,
}

/// Error returned by every fallible operation in this crate.
///
/// A single concrete type rather than an enum of payloads: the kind tag
/// classifies the failure, `code` preserves short upstream identifiers
/// (`ECONNREFUSED`, `Z_DATA_ERROR`, ...) and `source` carries the
/// underlying error when one exists.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct FetchError {
    message: String,
    kind: ErrorKind,
    code: Option<String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl FetchError {
    /// Create an error with a kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            code: None,
            source: None,
        }
    }

    /// Create an error wrapping an upstream cause.
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            kind,
            code: None,
            source: Some(Box::new(source)),
        }
    }

    /// Create a `System` error from an I/O failure, preserving the
    /// conventional errno-style code when one can be derived.
    pub fn io(message: impl Into<String>, err: io::Error) -> Self {
        Self {
            message: message.into(),
            kind: ErrorKind::System,
            code: io_code(&err).map(str::to_owned),
            source: Some(Box::new(err)),
        }
    }

    /// Attach a short upstream code (e.g. `ENOTFOUND`, `Z_DATA_ERROR`).
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// The error classification.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Short upstream code, when the cause carried one.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Copy of this error without the boxed cause. Used where one failure
    /// must be delivered to two consumers (tee branches).
    pub(crate) fn replicate(&self) -> Self {
        Self {
            message: self.message.clone(),
            kind: self.kind,
            code: self.code.clone(),
            source: None,
        }
    }
}

/// Map an I/O error onto the errno-style code the original runtime would
/// have reported, where the mapping is unambiguous.
fn io_code(err: &io::Error) -> Option<&'static str> {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
        io::ErrorKind::ConnectionReset => Some("ECONNRESET"),
        io::ErrorKind::ConnectionAborted => Some("ECONNABORTED"),
        io::ErrorKind::BrokenPipe => Some("EPIPE"),
        io::ErrorKind::TimedOut => Some("ETIMEDOUT"),
        _ => None,
    }
}
