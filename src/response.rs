//! Response value object.

use bytes::Bytes;

use crate::blob::Blob;
use crate::body::Body;
use crate::error::Result;
use crate::form::FormData;
use crate::headers::Headers;

/// An HTTP response. Fields are fixed at construction; only the body
/// mutates, through consumption.
#[derive(Debug)]
pub struct Response {
    url: String,
    status: u16,
    status_text: String,
    headers: Headers,
    body: Body,
}

impl Response {
    /// A synthetic 200 response around a local body. The content type is
    /// inferred from the body shape when the caller supplied none.
    pub fn new(body: impl Into<Body>) -> Self {
        let mut body = body.into();
        let mut headers = Headers::new();
        if let Some(content_type) = body.infer_content_type() {
            // Inference only produces valid header values.
            let _ = headers.append("content-type", &content_type);
        }
        body.set_context("", 0, std::time::Duration::ZERO, headers.get("content-type"));
        Self {
            url: String::new(),
            status: 200,
            status_text: "OK".to_owned(),
            headers,
            body,
        }
    }

    /// Assemble a response from fetched parts. The body's consumption
    /// context is expected to be set already.
    pub(crate) fn from_parts(
        url: String,
        status: u16,
        status_text: String,
        headers: Headers,
        body: Body,
    ) -> Self {
        Self {
            url,
            status,
            status_text,
            headers,
            body,
        }
    }

    /// The final URL after redirects.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// Whether the status is in the 2xx range.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// The response body state.
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Whether the body has begun consumption.
    pub fn body_used(&self) -> bool {
        self.body.body_used()
    }

    /// Consume the body as raw bytes.
    pub async fn bytes(&mut self) -> Result<Bytes> {
        self.body.bytes().await
    }

    /// Consume the body as UTF-8 text.
    pub async fn text(&mut self) -> Result<String> {
        self.body.text().await
    }

    /// Consume the body as JSON.
    pub async fn json<T: serde::de::DeserializeOwned>(&mut self) -> Result<T> {
        self.body.json().await
    }

    /// Consume the body as a blob typed by the response content type.
    pub async fn blob(&mut self) -> Result<Blob> {
        self.body.blob().await
    }

    /// Consume the body as form data.
    pub async fn form_data(&mut self) -> Result<FormData> {
        self.body.form_data().await
    }

    /// Split off an independent copy; fails once the body is used.
    pub fn try_clone(&mut self) -> Result<Response> {
        let body = self.body.try_clone()?;
        Ok(Response {
            url: self.url.clone(),
            status: self.status,
            status_text: self.status_text.clone(),
            headers: self.headers.clone(),
            body,
        })
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(Body::empty())
    }
}
