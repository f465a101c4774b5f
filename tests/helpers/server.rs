//! Loopback HTTP/1.1 test server.
//!
//! Raw TCP, literal byte responses; routes cover every end-to-end
//! scenario the fetch tests exercise. Each connection serves a single
//! request (the client sends `Connection: close`).

use std::io::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
use flate2::Compression;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub struct TestServer {
    base: String,
    hits: Arc<AtomicUsize>,
}

impl TestServer {
    /// Bind a random loopback port and start serving in the background.
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test server");
        let port = listener.local_addr().expect("local addr").port();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_for_server = Arc::clone(&hits);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let hits = Arc::clone(&hits_for_server);
                        tokio::spawn(async move {
                            handle_connection(stream, hits).await;
                        });
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            base: format!("http://127.0.0.1:{port}"),
            hits,
        }
    }

    /// Base URL, no trailing slash.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Number of requests served so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

struct ParsedRequest {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl ParsedRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

async fn handle_connection(mut stream: TcpStream, hits: Arc<AtomicUsize>) {
    let Some(request) = read_request(&mut stream).await else {
        return;
    };
    hits.fetch_add(1, Ordering::SeqCst);

    match request.path.as_str() {
        "/hello" => {
            respond(
                &mut stream,
                "200 OK",
                &[("Content-Type", "text/plain".into())],
                b"world",
            )
            .await;
        }
        "/json" => {
            respond(
                &mut stream,
                "200 OK",
                &[("Content-Type", "application/json".into())],
                br#"{"name":"value"}"#,
            )
            .await;
        }
        "/inspect" => {
            let headers: serde_json::Map<String, serde_json::Value> = request
                .headers
                .iter()
                .map(|(n, v)| (n.to_ascii_lowercase(), serde_json::Value::from(v.as_str())))
                .collect();
            let echo = serde_json::json!({
                "method": request.method,
                "body": String::from_utf8_lossy(&request.body),
                "headers": headers,
            });
            respond(
                &mut stream,
                "200 OK",
                &[("Content-Type", "application/json".into())],
                echo.to_string().as_bytes(),
            )
            .await;
        }
        "/redirect/301" => redirect(&mut stream, "301 Moved Permanently", "/inspect").await,
        "/redirect/302" => redirect(&mut stream, "302 Found", "/inspect").await,
        "/redirect/303" => redirect(&mut stream, "303 See Other", "/inspect").await,
        "/redirect/307" => redirect(&mut stream, "307 Temporary Redirect", "/inspect").await,
        "/redirect/308" => redirect(&mut stream, "308 Permanent Redirect", "/inspect").await,
        "/redirect/chain" => redirect(&mut stream, "301 Moved Permanently", "/redirect/chain2").await,
        "/redirect/chain2" => redirect(&mut stream, "301 Moved Permanently", "/hello").await,
        "/redirect/no-location" => {
            respond(&mut stream, "301 Moved Permanently", &[], b"not moving").await;
        }
        "/gzip" => {
            respond(
                &mut stream,
                "200 OK",
                &[
                    ("Content-Type", "text/plain".into()),
                    ("Content-Encoding", "gzip".into()),
                ],
                &gzip(b"hello world"),
            )
            .await;
        }
        "/gzip-trailing" => {
            let mut payload = gzip(b"hello world");
            payload.extend_from_slice(b"\x00\x00junk");
            respond(
                &mut stream,
                "200 OK",
                &[("Content-Encoding", "gzip".into())],
                &payload,
            )
            .await;
        }
        "/deflate" => {
            let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
            enc.write_all(b"hello world").unwrap();
            respond(
                &mut stream,
                "200 OK",
                &[("Content-Encoding", "deflate".into())],
                &enc.finish().unwrap(),
            )
            .await;
        }
        "/deflate-raw" => {
            let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
            enc.write_all(b"hello world").unwrap();
            respond(
                &mut stream,
                "200 OK",
                &[("Content-Encoding", "deflate".into())],
                &enc.finish().unwrap(),
            )
            .await;
        }
        "/timeout" => {
            tokio::time::sleep(Duration::from_secs(10)).await;
            respond(&mut stream, "200 OK", &[], b"too late").await;
        }
        "/slow-body" => {
            let head =
                b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 10\r\nConnection: close\r\n\r\nhello";
            let _ = stream.write_all(head).await;
            let _ = stream.flush().await;
            tokio::time::sleep(Duration::from_secs(10)).await;
            let _ = stream.write_all(b"world").await;
        }
        "/size/chunk" => {
            let body = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n6\r\nhello \r\n5\r\nworld\r\n0\r\n\r\n";
            let _ = stream.write_all(body).await;
        }
        "/chunked" => {
            let body = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nTransfer-Encoding: chunked\r\n\r\n6\r\nchunk1\r\n6\r\nchunk2\r\n0\r\n\r\n";
            let _ = stream.write_all(body).await;
        }
        "/no-content" => {
            let _ = stream
                .write_all(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n")
                .await;
        }
        "/not-modified" => {
            let _ = stream
                .write_all(
                    b"HTTP/1.1 304 Not Modified\r\nContent-Encoding: gzip\r\nConnection: close\r\n\r\n",
                )
                .await;
        }
        "/set-cookie" => {
            respond(
                &mut stream,
                "200 OK",
                &[
                    ("Set-Cookie", "a=1".into()),
                    ("Set-Cookie", "b=2; Path=/".into()),
                ],
                b"cookies",
            )
            .await;
        }
        _ => {
            respond(&mut stream, "404 Not Found", &[], b"not found").await;
        }
    }

    let _ = stream.flush().await;
}

/// Read one request: head, then the body per its framing, so the socket
/// is drained before the response goes out.
async fn read_request(stream: &mut TcpStream) -> Option<ParsedRequest> {
    let mut buffer: Vec<u8> = Vec::new();
    let head_len = loop {
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let mut read_buf = [0u8; 8192];
        let n = stream.read(&mut read_buf).await.ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&read_buf[..n]);
    };

    let head = String::from_utf8_lossy(&buffer[..head_len]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next()?;
    let mut parts = request_line.split(' ');
    let method = parts.next()?.to_owned();
    let path = parts.next()?.to_owned();

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_owned(), value.trim().to_owned()))
        })
        .collect();

    let mut request = ParsedRequest {
        method,
        path,
        headers,
        body: Vec::new(),
    };

    buffer.drain(..head_len);

    if request
        .header("transfer-encoding")
        .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"))
    {
        request.body = read_chunked_body(stream, buffer).await?;
    } else if let Some(len) = request
        .header("content-length")
        .and_then(|cl| cl.parse::<usize>().ok())
    {
        while buffer.len() < len {
            let mut read_buf = [0u8; 8192];
            let n = stream.read(&mut read_buf).await.ok()?;
            if n == 0 {
                break;
            }
            buffer.extend_from_slice(&read_buf[..n]);
        }
        buffer.truncate(len);
        request.body = buffer;
    }

    Some(request)
}

async fn read_chunked_body(stream: &mut TcpStream, mut buffer: Vec<u8>) -> Option<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let (size, line_len) = loop {
            if let Some(pos) = buffer.windows(2).position(|w| w == b"\r\n") {
                let line = String::from_utf8_lossy(&buffer[..pos]).into_owned();
                let size = usize::from_str_radix(line.split(';').next()?.trim(), 16).ok()?;
                break (size, pos + 2);
            }
            let mut read_buf = [0u8; 8192];
            let n = stream.read(&mut read_buf).await.ok()?;
            if n == 0 {
                return None;
            }
            buffer.extend_from_slice(&read_buf[..n]);
        };
        buffer.drain(..line_len);

        while buffer.len() < size + 2 {
            let mut read_buf = [0u8; 8192];
            let n = stream.read(&mut read_buf).await.ok()?;
            if n == 0 {
                return None;
            }
            buffer.extend_from_slice(&read_buf[..n]);
        }

        if size == 0 {
            return Some(body);
        }
        body.extend_from_slice(&buffer[..size]);
        buffer.drain(..size + 2);
    }
}

async fn respond(stream: &mut TcpStream, status: &str, headers: &[(&str, String)], body: &[u8]) {
    let mut response = format!("HTTP/1.1 {status}\r\n");
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    ));
    let mut bytes = response.into_bytes();
    bytes.extend_from_slice(body);
    let _ = stream.write_all(&bytes).await;
}

async fn redirect(stream: &mut TcpStream, status: &str, location: &str) {
    respond(
        stream,
        status,
        &[("Location", location.to_string())],
        b"redirecting",
    )
    .await;
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}
