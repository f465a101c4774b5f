//! # wraith
//!
//! WHATWG-fetch-shaped HTTP client: HTTP/1.1 and HTTP/2 over TLS, with a
//! single request–response operation whose response body is a
//! single-use byte stream decodable as bytes, text, JSON, a blob, or a
//! multipart form.
//!
//! ```rust,ignore
//! use wraith::{fetch, Request};
//!
//! let request = Request::new("https://example.com/data.json")?;
//! let mut response = fetch(request).await?;
//! let data: serde_json::Value = response.json().await?;
//! ```

// Core data model
pub mod blob;
pub mod body;
pub mod error;
pub mod form;
pub mod headers;

// Request/response values and the fetch loop
pub mod agent;
pub mod request;
pub mod response;

mod fetch;
mod negotiate;

// Transport layer
mod transport;

// Re-exports for convenient access
pub use agent::Agent;
pub use blob::Blob;
pub use body::{Body, ByteStream};
pub use error::{ErrorKind, FetchError, Result};
pub use fetch::fetch;
pub use form::{FormData, FormValue};
pub use headers::Headers;
pub use request::{RedirectMode, Request, RequestBuilder};
pub use response::Response;
