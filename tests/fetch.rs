//! End-to-end fetch tests against the loopback test server.

mod helpers;

use std::time::{Duration, Instant};

use bytes::Bytes;
use http::Method;
use wraith::{fetch, ErrorKind, FormData, RedirectMode, Request};

use helpers::server::TestServer;

fn stream_body(payload: &'static [u8]) -> wraith::Body {
    let chunks: Vec<Result<Bytes, std::io::Error>> = vec![Ok(Bytes::from_static(payload))];
    wraith::Body::wrap_stream(futures_util::stream::iter(chunks))
}

#[tokio::test]
async fn test_plain_text_fetch() {
    let server = TestServer::spawn().await;
    let mut res = fetch(Request::new(server.url("/hello")).unwrap())
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    assert_eq!(res.status_text(), "OK");
    assert!(res.ok());
    assert_eq!(res.url(), server.url("/hello"));
    assert_eq!(res.headers().get("content-type").unwrap(), "text/plain");
    assert_eq!(res.text().await.unwrap(), "world");
    assert!(res.body_used());
}

#[tokio::test]
async fn test_default_headers_on_the_wire() {
    let server = TestServer::spawn().await;
    let mut res = fetch(Request::new(server.url("/inspect")).unwrap())
        .await
        .unwrap();
    let echo: serde_json::Value = res.json().await.unwrap();

    assert_eq!(echo["method"], "GET");
    assert_eq!(echo["headers"]["accept"], "*/*");
    assert_eq!(echo["headers"]["accept-encoding"], "gzip,deflate");
    let user_agent = echo["headers"]["user-agent"].as_str().unwrap();
    assert!(user_agent.starts_with("wraith/"), "got {user_agent}");
}

#[tokio::test]
async fn test_json_then_second_read_rejects() {
    let server = TestServer::spawn().await;
    let mut res = fetch(Request::new(server.url("/json")).unwrap())
        .await
        .unwrap();

    let value: serde_json::Value = res.json().await.unwrap();
    assert_eq!(value, serde_json::json!({"name": "value"}));

    let err = res.text().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
    assert!(err.to_string().contains("body used already"));
}

#[tokio::test]
async fn test_301_rewrites_post_to_get() {
    let server = TestServer::spawn().await;
    let req = Request::builder(server.url("/redirect/301"))
        .method(Method::POST)
        .body("a=1")
        .build()
        .unwrap();
    let mut res = fetch(req).await.unwrap();

    assert_eq!(res.url(), server.url("/inspect"));
    let echo: serde_json::Value = res.json().await.unwrap();
    assert_eq!(echo["method"], "GET");
    assert_eq!(echo["body"], "");
    assert!(echo["headers"].get("content-length").is_none());
}

#[tokio::test]
async fn test_302_preserves_non_post_method_and_body() {
    let server = TestServer::spawn().await;
    let req = Request::builder(server.url("/redirect/302"))
        .method(Method::PUT)
        .body("a=1")
        .build()
        .unwrap();
    let mut res = fetch(req).await.unwrap();

    let echo: serde_json::Value = res.json().await.unwrap();
    assert_eq!(echo["method"], "PUT");
    assert_eq!(echo["body"], "a=1");
}

#[tokio::test]
async fn test_303_rewrites_any_method_to_get() {
    let server = TestServer::spawn().await;
    let req = Request::builder(server.url("/redirect/303"))
        .method(Method::from_bytes(b"PATCH").unwrap())
        .body("a=1")
        .build()
        .unwrap();
    let mut res = fetch(req).await.unwrap();

    let echo: serde_json::Value = res.json().await.unwrap();
    assert_eq!(echo["method"], "GET");
    assert_eq!(echo["body"], "");
}

#[tokio::test]
async fn test_307_replays_materialized_body() {
    let server = TestServer::spawn().await;
    let req = Request::builder(server.url("/redirect/307"))
        .method(Method::from_bytes(b"PATCH").unwrap())
        .body("a=1")
        .build()
        .unwrap();
    let mut res = fetch(req).await.unwrap();

    let echo: serde_json::Value = res.json().await.unwrap();
    assert_eq!(echo["method"], "PATCH");
    assert_eq!(echo["body"], "a=1");
}

#[tokio::test]
async fn test_307_with_stream_body_rejected() {
    let server = TestServer::spawn().await;
    let req = Request::builder(server.url("/redirect/307"))
        .method(Method::from_bytes(b"PATCH").unwrap())
        .body(stream_body(b"a=1"))
        .build()
        .unwrap();
    let err = fetch(req).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnsupportedRedirect);
    assert!(err.to_string().contains("readable stream"));
}

#[tokio::test]
async fn test_redirect_chain_follow_limit() {
    let server = TestServer::spawn().await;
    let req = Request::builder(server.url("/redirect/chain"))
        .follow(1)
        .build()
        .unwrap();
    let err = fetch(req).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MaxRedirect);
    // Exactly follow + 1 dispatches before failing.
    assert_eq!(server.hits(), 2);

    let req = Request::builder(server.url("/redirect/chain"))
        .follow(2)
        .build()
        .unwrap();
    let mut res = fetch(req).await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "world");
}

#[tokio::test]
async fn test_follow_zero_disallows_any_redirect() {
    let server = TestServer::spawn().await;
    let req = Request::builder(server.url("/redirect/301"))
        .follow(0)
        .build()
        .unwrap();
    let err = fetch(req).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MaxRedirect);
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn test_manual_redirect_returns_3xx() {
    let server = TestServer::spawn().await;
    let req = Request::builder(server.url("/redirect/301"))
        .redirect(RedirectMode::Manual)
        .build()
        .unwrap();
    let mut res = fetch(req).await.unwrap();

    assert_eq!(res.status(), 301);
    assert_eq!(res.headers().get("location").unwrap(), "/inspect");
    assert_eq!(res.text().await.unwrap(), "redirecting");
}

#[tokio::test]
async fn test_error_redirect_mode() {
    let server = TestServer::spawn().await;
    let req = Request::builder(server.url("/redirect/301"))
        .redirect(RedirectMode::Error)
        .build()
        .unwrap();
    let err = fetch(req).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoRedirect);
}

#[tokio::test]
async fn test_redirect_without_location_is_terminal() {
    let server = TestServer::spawn().await;
    let mut res = fetch(Request::new(server.url("/redirect/no-location")).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), 301);
    assert_eq!(res.text().await.unwrap(), "not moving");
}

#[tokio::test]
async fn test_size_cap_rejects_large_body() {
    let server = TestServer::spawn().await;
    let req = Request::builder(server.url("/size/chunk"))
        .size(5)
        .build()
        .unwrap();
    let mut res = fetch(req).await.unwrap();

    let err = res.text().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MaxSize);
    assert!(err.to_string().contains("over limit: 5"));
}

#[tokio::test]
async fn test_request_timeout() {
    let server = TestServer::spawn().await;
    let req = Request::builder(server.url("/timeout"))
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();

    let started = Instant::now();
    let err = fetch(req).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RequestTimeout);
    assert!(err.to_string().contains("network timeout"));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_body_timeout_on_stalled_stream() {
    let server = TestServer::spawn().await;
    let req = Request::builder(server.url("/slow-body"))
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let mut res = fetch(req).await.unwrap();
    assert_eq!(res.status(), 200);

    let err = res.text().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BodyTimeout);
}

#[tokio::test]
async fn test_gzip_transparent_decode() {
    let server = TestServer::spawn().await;
    let mut res = fetch(Request::new(server.url("/gzip")).unwrap())
        .await
        .unwrap();
    // The coding is still echoed even though the body is decoded.
    assert_eq!(res.headers().get("content-encoding").unwrap(), "gzip");
    assert_eq!(res.text().await.unwrap(), "hello world");
}

#[tokio::test]
async fn test_gzip_raw_without_compress() {
    let server = TestServer::spawn().await;
    let req = Request::builder(server.url("/gzip"))
        .compress(false)
        .build()
        .unwrap();
    let mut res = fetch(req).await.unwrap();

    let raw = res.bytes().await.unwrap();
    assert_ne!(&raw[..], b"hello world");
    assert_eq!(&raw[..2], &[0x1f, 0x8b]);
}

#[tokio::test]
async fn test_gzip_with_trailing_garbage() {
    let server = TestServer::spawn().await;
    let mut res = fetch(Request::new(server.url("/gzip-trailing")).unwrap())
        .await
        .unwrap();
    assert_eq!(res.text().await.unwrap(), "hello world");
}

#[tokio::test]
async fn test_deflate_zlib_and_raw() {
    let server = TestServer::spawn().await;
    let mut res = fetch(Request::new(server.url("/deflate")).unwrap())
        .await
        .unwrap();
    assert_eq!(res.text().await.unwrap(), "hello world");

    let mut res = fetch(Request::new(server.url("/deflate-raw")).unwrap())
        .await
        .unwrap();
    assert_eq!(res.text().await.unwrap(), "hello world");
}

#[tokio::test]
async fn test_chunked_response_body() {
    let server = TestServer::spawn().await;
    let mut res = fetch(Request::new(server.url("/chunked")).unwrap())
        .await
        .unwrap();
    assert_eq!(res.text().await.unwrap(), "chunk1chunk2");
}

#[tokio::test]
async fn test_204_has_no_body() {
    let server = TestServer::spawn().await;
    let mut res = fetch(Request::new(server.url("/no-content")).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), 204);
    assert_eq!(res.text().await.unwrap(), "");
}

#[tokio::test]
async fn test_304_echoes_content_encoding_without_decoding() {
    let server = TestServer::spawn().await;
    let mut res = fetch(Request::new(server.url("/not-modified")).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), 304);
    assert_eq!(res.headers().get("content-encoding").unwrap(), "gzip");
    assert_eq!(res.text().await.unwrap(), "");
}

#[tokio::test]
async fn test_set_cookie_get_all() {
    let server = TestServer::spawn().await;
    let res = fetch(Request::new(server.url("/set-cookie")).unwrap())
        .await
        .unwrap();

    assert_eq!(
        res.headers().get_all("set-cookie").unwrap(),
        vec!["a=1", "b=2; Path=/"]
    );
    assert_eq!(res.headers().get("set-cookie").unwrap(), "a=1, b=2; Path=/");
    let err = res.headers().get_all("content-type").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
}

#[tokio::test]
async fn test_response_clone_independence() {
    let server = TestServer::spawn().await;
    let mut res = fetch(Request::new(server.url("/hello")).unwrap())
        .await
        .unwrap();
    let mut copy = res.try_clone().unwrap();

    assert_eq!(copy.text().await.unwrap(), "world");
    assert_eq!(res.text().await.unwrap(), "world");

    assert!(res.try_clone().is_err());
}

#[tokio::test]
async fn test_urlencoded_body_negotiation() {
    let server = TestServer::spawn().await;
    let req = Request::builder(server.url("/inspect"))
        .method(Method::POST)
        .body(wraith::Body::url_encoded([("a", "1"), ("b", "two words")]))
        .build()
        .unwrap();
    let mut res = fetch(req).await.unwrap();

    let echo: serde_json::Value = res.json().await.unwrap();
    assert_eq!(
        echo["headers"]["content-type"],
        "application/x-www-form-urlencoded;charset=UTF-8"
    );
    assert_eq!(echo["body"], "a=1&b=two+words");
}

#[tokio::test]
async fn test_multipart_body_negotiation() {
    let server = TestServer::spawn().await;
    let mut form = FormData::new();
    form.append("field", "value");
    form.append_file("upload", "x.txt", "text/plain", &b"file bytes"[..]);
    let boundary = form.boundary().to_owned();

    let req = Request::builder(server.url("/inspect"))
        .method(Method::POST)
        .body(form)
        .build()
        .unwrap();
    let mut res = fetch(req).await.unwrap();

    let echo: serde_json::Value = res.json().await.unwrap();
    let content_type = echo["headers"]["content-type"].as_str().unwrap();
    assert_eq!(content_type, format!("multipart/form-data;boundary={boundary}"));
    let body = echo["body"].as_str().unwrap();
    assert!(body.contains("name=\"field\""));
    assert!(body.contains("file bytes"));
    let content_length = echo["headers"]["content-length"].as_str().unwrap();
    assert!(content_length.parse::<u64>().unwrap() > 0);
}

#[tokio::test]
async fn test_streaming_request_body_chunked() {
    let server = TestServer::spawn().await;
    let req = Request::builder(server.url("/inspect"))
        .method(Method::POST)
        .body(stream_body(b"streamed payload"))
        .build()
        .unwrap();
    let mut res = fetch(req).await.unwrap();

    let echo: serde_json::Value = res.json().await.unwrap();
    assert_eq!(echo["headers"]["transfer-encoding"], "chunked");
    assert_eq!(echo["body"], "streamed payload");
}

#[tokio::test]
async fn test_connection_refused_preserves_code() {
    // Bind then drop to get a port with nothing listening.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = fetch(Request::new(format!("http://127.0.0.1:{port}/")).unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::System);
    assert_eq!(err.code(), Some("ECONNREFUSED"));
}

#[tokio::test]
async fn test_shared_agent_across_fetches() {
    let server = TestServer::spawn().await;
    let agent = wraith::Agent::new();

    let first = Request::builder(server.url("/hello"))
        .agent(agent.clone())
        .build()
        .unwrap();
    let second = Request::builder(server.url("/hello"))
        .agent(agent)
        .build()
        .unwrap();

    let (a, b) = tokio::join!(fetch(first), fetch(second));
    assert_eq!(a.unwrap().status(), 200);
    assert_eq!(b.unwrap().status(), 200);
}

/// Live-network TLS/ALPN coverage; run explicitly with --ignored.
#[tokio::test]
#[ignore]
async fn test_https_fetch_live() {
    let mut res = fetch(Request::new("https://example.com/").unwrap())
        .await
        .unwrap();
    assert!(res.ok());
    let text = res.text().await.unwrap();
    assert!(text.contains("Example Domain"));
}
