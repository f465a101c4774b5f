//! Immutable binary payload with an attached MIME type.

use bytes::Bytes;

/// A byte payload paired with its MIME type.
///
/// Clones are cheap: the content is refcounted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blob {
    content: Bytes,
    content_type: String,
}

impl Blob {
    /// Create a blob from bytes and a MIME type.
    pub fn new(content: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: content_type.into().to_ascii_lowercase(),
        }
    }

    /// Payload size in bytes.
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    /// The MIME type, lowercased. Empty when unknown.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Borrow the payload.
    pub fn as_bytes(&self) -> &[u8] {
        &self.content
    }

    /// Take the payload.
    pub fn into_bytes(self) -> Bytes {
        self.content
    }

    /// The payload decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    /// A sub-range of the payload as a new blob with the same type.
    /// Out-of-range indices clamp to the payload size.
    pub fn slice(&self, start: usize, end: usize) -> Blob {
        let len = self.content.len();
        let start = start.min(len);
        let end = end.clamp(start, len);
        Self {
            content: self.content.slice(start..end),
            content_type: self.content_type.clone(),
        }
    }
}
