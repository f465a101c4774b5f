//! The fetch entry point and its redirect loop.

use http::Method;

use crate::body::Body;
use crate::error::{ErrorKind, FetchError, Result};
use crate::negotiate;
use crate::request::{ensure_supported_scheme, RedirectMode, Request};
use crate::response::Response;
use crate::transport;

/// Statuses that trigger redirect handling when Location is present.
fn is_redirect_status(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// Perform a fetch: dispatch the request, follow redirects according to
/// its policy, and return the terminal response with a streaming body.
///
/// # Examples
///
/// ```rust,ignore
/// let mut res = wraith::fetch(wraith::Request::new("http://example.com/")?).await?;
/// let text = res.text().await?;
/// ```
pub async fn fetch(mut request: Request) -> Result<Response> {
    let agent = request.agent().cloned().unwrap_or_default();

    loop {
        let wire_headers = negotiate::wire_headers(
            request.method(),
            request.headers(),
            request.body(),
            request.compress(),
        );
        let wire_body = request.body_mut().wire_body();

        tracing::debug!(method = %request.method(), url = %request.url(), "dispatching request");
        let response = transport::dispatch(
            &agent,
            request.method(),
            request.url(),
            wire_headers,
            wire_body,
            request.compress(),
            request.timeout(),
        )
        .await?;

        if is_redirect_status(response.status) {
            if let Some(location) = response.headers.get("location") {
                match request.redirect() {
                    RedirectMode::Manual => {
                        // The caller inspects the 3xx itself.
                    }
                    RedirectMode::Error => {
                        return Err(FetchError::new(
                            ErrorKind::NoRedirect,
                            format!("redirect mode is set to error: {}", request.url()),
                        ));
                    }
                    RedirectMode::Follow => {
                        if request.counter() + 1 > request.follow() {
                            return Err(FetchError::new(
                                ErrorKind::MaxRedirect,
                                format!("maximum redirect reached at: {}", request.url()),
                            ));
                        }

                        let next = request.url().join(&location).map_err(|_| {
                            FetchError::new(
                                ErrorKind::Type,
                                "Only absolute URLs are supported",
                            )
                        })?;
                        ensure_supported_scheme(&next)?;

                        match response.status {
                            301 | 302 => {
                                if *request.method() == Method::POST {
                                    request.rewrite_to_get();
                                }
                            }
                            303 => request.rewrite_to_get(),
                            // 307/308 replay the method and body; a
                            // stream body cannot be replayed.
                            307 | 308 => {
                                let method = request.method();
                                if request.body().is_stream_backed()
                                    && *method != Method::GET
                                    && *method != Method::HEAD
                                {
                                    return Err(FetchError::new(
                                        ErrorKind::UnsupportedRedirect,
                                        "Cannot follow redirect with body being a readable stream",
                                    ));
                                }
                            }
                            _ => unreachable!(),
                        }

                        tracing::debug!(
                            status = response.status,
                            from = %request.url(),
                            to = %next,
                            hop = request.counter() + 1,
                            "following redirect"
                        );
                        request.redirect_to(next);
                        continue;
                    }
                }
            }
            // A redirect status without Location is terminal.
        }

        let transport::TransportResponse {
            status,
            status_text,
            headers,
            body,
        } = response;

        let mut body = Body::from_byte_stream(body);
        body.set_context(
            request.url().as_str(),
            request.size(),
            request.timeout(),
            headers.get("content-type"),
        );

        return Ok(Response::from_parts(
            request.url().as_str().to_owned(),
            status,
            status_text,
            headers,
            body,
        ));
    }
}
