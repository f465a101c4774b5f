//! Form bodies: `multipart/form-data` container, its wire encoding, and
//! the parsers behind the `form_data()` accessor.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ErrorKind, FetchError, Result};

/// A single form entry value: a plain text field or an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValue {
    /// A text field.
    Text(String),
    /// A file field: filename, MIME type, and raw content.
    File {
        filename: String,
        content_type: String,
        data: Bytes,
    },
}

impl FormValue {
    /// The value as text; file content is decoded lossily.
    pub fn as_text(&self) -> String {
        match self {
            FormValue::Text(s) => s.clone(),
            FormValue::File { data, .. } => String::from_utf8_lossy(data).into_owned(),
        }
    }
}

/// Multipart form container with a fixed boundary.
///
/// All entries are materialized, so the encoded length is always known
/// and the form can be replayed across redirects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormData {
    boundary: String,
    entries: Vec<(String, FormValue)>,
}

impl FormData {
    /// Create an empty form with a fresh random boundary.
    pub fn new() -> Self {
        Self {
            boundary: random_boundary(),
            entries: Vec::new(),
        }
    }

    fn with_boundary(boundary: &str) -> Self {
        Self {
            boundary: boundary.to_owned(),
            entries: Vec::new(),
        }
    }

    /// Append a text field.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries
            .push((name.into(), FormValue::Text(value.into())));
    }

    /// Append a file field.
    pub fn append_file(
        &mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) {
        self.entries.push((
            name.into(),
            FormValue::File {
                filename: filename.into(),
                content_type: content_type.into(),
                data: data.into(),
            },
        ));
    }

    /// First value for a field name.
    pub fn get(&self, name: &str) -> Option<&FormValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// All values for a field name, in append order.
    pub fn get_all(&self, name: &str) -> Vec<&FormValue> {
        self.entries
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v)
            .collect()
    }

    /// Iterate `(name, value)` entries in append order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the form has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The multipart boundary.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// The `Content-Type` this form encodes as.
    pub(crate) fn content_type(&self) -> String {
        format!("multipart/form-data;boundary={}", self.boundary)
    }

    /// Encoded length in bytes. Always known: entries are materialized.
    pub(crate) fn encoded_len(&self) -> u64 {
        self.encode().len() as u64
    }

    /// Encode the form as a single multipart body.
    pub(crate) fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for (name, value) in &self.entries {
            buf.put_slice(b"--");
            buf.put_slice(self.boundary.as_bytes());
            buf.put_slice(b"\r\n");
            match value {
                FormValue::Text(text) => {
                    buf.put_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n")
                            .as_bytes(),
                    );
                    buf.put_slice(text.as_bytes());
                }
                FormValue::File {
                    filename,
                    content_type,
                    data,
                } => {
                    buf.put_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n"
                        )
                        .as_bytes(),
                    );
                    buf.put_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
                    buf.put_slice(data);
                }
            }
            buf.put_slice(b"\r\n");
        }
        buf.put_slice(b"--");
        buf.put_slice(self.boundary.as_bytes());
        buf.put_slice(b"--\r\n");
        buf.freeze()
    }

    /// Parse a `multipart/form-data` payload delimited by `boundary`.
    pub(crate) fn parse_multipart(body: &[u8], boundary: &str, url: &str) -> Result<FormData> {
        let mut form = FormData::with_boundary(boundary);
        let delimiter = format!("--{boundary}");
        let mut rest = body;

        // Skip any preamble before the first delimiter.
        let first = find(rest, delimiter.as_bytes()).ok_or_else(|| invalid_form(url))?;
        rest = &rest[first + delimiter.len()..];

        loop {
            // After a delimiter: "--" ends the body, CRLF starts a part.
            if rest.starts_with(b"--") {
                break;
            }
            rest = rest.strip_prefix(b"\r\n").ok_or_else(|| invalid_form(url))?;

            let header_end = find(rest, b"\r\n\r\n").ok_or_else(|| invalid_form(url))?;
            let head = &rest[..header_end];
            rest = &rest[header_end + 4..];

            let part_end = find(rest, delimiter.as_bytes()).ok_or_else(|| invalid_form(url))?;
            // Part content excludes the CRLF preceding the delimiter.
            let content = rest[..part_end]
                .strip_suffix(b"\r\n")
                .ok_or_else(|| invalid_form(url))?;
            rest = &rest[part_end + delimiter.len()..];

            let head = String::from_utf8_lossy(head);
            let mut name = None;
            let mut filename = None;
            let mut content_type = None;
            for line in head.split("\r\n") {
                let lower = line.to_ascii_lowercase();
                if lower.starts_with("content-disposition:") {
                    name = disposition_param(line, "name");
                    filename = disposition_param(line, "filename");
                } else if let Some(value) = lower.strip_prefix("content-type:") {
                    content_type = Some(value.trim().to_owned());
                }
            }
            let name = name.ok_or_else(|| invalid_form(url))?;

            match filename {
                Some(filename) => form.entries.push((
                    name,
                    FormValue::File {
                        filename,
                        content_type: content_type.unwrap_or_default(),
                        data: Bytes::copy_from_slice(content),
                    },
                )),
                None => form.entries.push((
                    name,
                    FormValue::Text(String::from_utf8_lossy(content).into_owned()),
                )),
            }
        }

        Ok(form)
    }

    /// Parse an `application/x-www-form-urlencoded` payload.
    pub(crate) fn parse_urlencoded(body: &[u8]) -> FormData {
        let mut form = FormData::new();
        for (name, value) in url::form_urlencoded::parse(body) {
            form.append(name.into_owned(), value.into_owned());
        }
        form
    }
}

impl Default for FormData {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid_form(url: &str) -> FetchError {
    FetchError::new(
        ErrorKind::Type,
        format!("could not parse content as FormData: {url}"),
    )
}

/// First occurrence of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|&i| &haystack[i..i + needle.len()] == needle)
}

/// Extract a quoted parameter from a Content-Disposition line.
fn disposition_param(line: &str, param: &str) -> Option<String> {
    let marker = format!("{param}=\"");
    let start = line.find(&marker)? + marker.len();
    let end = line[start..].find('"')? + start;
    Some(line[start..end].to_owned())
}

/// Random multipart boundary in the conventional dashed form.
fn random_boundary() -> String {
    let mut raw = [0u8; 16];
    getrandom::getrandom(&mut raw).expect("system RNG unavailable");
    let hex: String = raw.iter().map(|b| format!("{b:02x}")).collect();
    format!("------------------------{hex}")
}
