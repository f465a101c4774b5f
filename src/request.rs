//! Request value object and builder.

use std::time::Duration;

use http::Method;
use url::Url;

use crate::agent::Agent;
use crate::blob::Blob;
use crate::body::Body;
use crate::error::{ErrorKind, FetchError, Result};
use crate::form::FormData;
use crate::headers::Headers;

/// What the fetch loop does when a redirect response arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedirectMode {
    /// Follow up to the configured hop limit.
    #[default]
    Follow,
    /// Return the 3xx response to the caller untouched.
    Manual,
    /// Fail the fetch.
    Error,
}

/// Validate URL input: absolute, scheme `http` or `https`.
pub(crate) fn parse_url(input: &str) -> Result<Url> {
    let url = Url::parse(input)
        .map_err(|_| FetchError::new(ErrorKind::Type, "Only absolute URLs are supported"))?;
    ensure_supported_scheme(&url)?;
    Ok(url)
}

pub(crate) fn ensure_supported_scheme(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        _ => Err(FetchError::new(
            ErrorKind::Type,
            "Only HTTP(S) protocols are supported",
        )),
    }
}

/// An immutable request description; the body is the only part that
/// mutates (through consumption).
#[derive(Debug)]
pub struct Request {
    url: Url,
    method: Method,
    headers: Headers,
    body: Body,
    redirect: RedirectMode,
    follow: u32,
    counter: u32,
    compress: bool,
    timeout: Duration,
    size: u64,
    agent: Option<Agent>,
}

impl Request {
    /// A GET request for the URL with all defaults.
    pub fn new(url: impl AsRef<str>) -> Result<Self> {
        Self::builder(url).build()
    }

    /// Start building a request for the URL.
    pub fn builder(url: impl AsRef<str>) -> RequestBuilder {
        RequestBuilder::new(url.as_ref())
    }

    /// Rebuild this request with overrides; all fields carry over, the
    /// body is moved, not copied.
    pub fn into_builder(self) -> RequestBuilder {
        RequestBuilder {
            url: self.url.as_str().to_owned(),
            method: self.method,
            base_headers: self.headers,
            extra_headers: Vec::new(),
            body: Some(self.body),
            redirect: self.redirect,
            follow: self.follow,
            compress: self.compress,
            timeout: self.timeout,
            size: self.size,
            agent: self.agent,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn redirect(&self) -> RedirectMode {
        self.redirect
    }

    /// Maximum number of redirects to follow; 0 disallows following any.
    pub fn follow(&self) -> u32 {
        self.follow
    }

    /// Redirects already followed in this fetch.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn compress(&self) -> bool {
        self.compress
    }

    /// Request and body deadline; zero means disabled.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Response size cap in bytes; 0 means unbounded.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn agent(&self) -> Option<&Agent> {
        self.agent.as_ref()
    }

    /// Whether the body has begun consumption.
    pub fn body_used(&self) -> bool {
        self.body.body_used()
    }

    /// Consume the body as raw bytes.
    pub async fn bytes(&mut self) -> Result<bytes::Bytes> {
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

    /// Consume the body as a blob typed by the request content type.
    pub async fn blob(&mut self) -> Result<Blob> {
        self.body.blob().await
    }

    /// Consume the body as form data.
    pub async fn form_data(&mut self) -> Result<FormData> {
        self.body.form_data().await
    }

    /// Split off an independent copy; fails once the body is used.
    pub fn try_clone(&mut self) -> Result<Request> {
        let body = self.body.try_clone()?;
        Ok(Request {
            url: self.url.clone(),
            method: self.method.clone(),
            headers: self.headers.clone(),
            body,
            redirect: self.redirect,
            follow: self.follow,
            counter: self.counter,
            compress: self.compress,
            timeout: self.timeout,
            size: self.size,
            agent: self.agent.clone(),
        })
    }

    /// The request body state.
    pub fn body(&self) -> &Body {
        &self.body
    }

    pub(crate) fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    /// Point this request at a redirect target and count the hop.
    pub(crate) fn redirect_to(&mut self, url: Url) {
        self.url = url;
        self.counter += 1;
    }

    /// Rewrite to a bodyless GET (301/302 on POST, any 303).
    pub(crate) fn rewrite_to_get(&mut self) {
        self.method = Method::GET;
        self.body.clear();
        self.headers.delete("content-length");
    }
}

/// Fluent builder for [`Request`].
#[derive(Debug)]
pub struct RequestBuilder {
    url: String,
    method: Method,
    base_headers: Headers,
    extra_headers: Vec<(String, String)>,
    body: Option<Body>,
    redirect: RedirectMode,
    follow: u32,
    compress: bool,
    timeout: Duration,
    size: u64,
    agent: Option<Agent>,
}

impl RequestBuilder {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_owned(),
            method: Method::GET,
            base_headers: Headers::new(),
            extra_headers: Vec::new(),
            body: None,
            redirect: RedirectMode::default(),
            follow: 20,
            compress: true,
            timeout: Duration::ZERO,
            size: 0,
            agent: None,
        }
    }

    /// Set the request method. Normalized to uppercase at build time.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Add a header. Validation happens at build time.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Replace the base header set. Headers added with
    /// [`RequestBuilder::header`] append on top.
    pub fn headers(mut self, headers: Headers) -> Self {
        self.base_headers = headers;
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the redirect mode (default: follow).
    pub fn redirect(mut self, mode: RedirectMode) -> Self {
        self.redirect = mode;
        self
    }

    /// Set the redirect hop limit (default 20; 0 disallows following).
    pub fn follow(mut self, follow: u32) -> Self {
        self.follow = follow;
        self
    }

    /// Enable or disable transparent decompression (default on).
    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Set the request and body deadline (default: disabled).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Cap the response body size in bytes (default: unbounded).
    pub fn size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Use a shared agent for connection policy.
    pub fn agent(mut self, agent: Agent) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Validate everything and produce the request.
    pub fn build(self) -> Result<Request> {
        let url = parse_url(&self.url)?;

        let method = Method::from_bytes(self.method.as_str().to_ascii_uppercase().as_bytes())
            .map_err(|_| FetchError::new(ErrorKind::Type, "invalid request method"))?;

        let mut headers = self.base_headers;
        for (name, value) in &self.extra_headers {
            headers.append(name, value)?;
        }

        let mut body = self.body.unwrap_or_default();
        if (method == Method::GET || method == Method::HEAD) && !body.is_empty_source() {
            return Err(FetchError::new(
                ErrorKind::Type,
                "Request with GET/HEAD method cannot have body",
            ));
        }

        if !headers.has("content-type") {
            if let Some(content_type) = body.infer_content_type() {
                headers.append("content-type", &content_type)?;
            }
        }

        body.set_context(
            url.as_str(),
            self.size,
            self.timeout,
            headers.get("content-type"),
        );

        Ok(Request {
            url,
            method,
            headers,
            body,
            redirect: self.redirect,
            follow: self.follow,
            counter: 0,
            compress: self.compress,
            timeout: self.timeout,
            size: self.size,
            agent: self.agent,
        })
    }
}
