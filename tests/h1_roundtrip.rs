//! Round trips against a local HTTP/1.1 server: header spoofing, decoding,
//! chunked streaming, passthrough, and deadlines.

use std::io::Write as _;
use std::net::SocketAddr;
use std::time::Duration;

use guise::{Error, HttpVersion, Request, Transport};
use http::header::{HeaderValue, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CONTENT_ENCODING};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Accept one connection, read the request head, send `response`, close.
/// Returns the request head as text for assertions.
async fn one_shot_server(response: Vec<u8>) -> (SocketAddr, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = sock.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            head.extend_from_slice(&buf[..n]);
            if head.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        sock.write_all(&response).await.unwrap();
        sock.shutdown().await.unwrap();
        String::from_utf8_lossy(&head).into_owned()
    });
    (addr, handle)
}

fn plain_response(body: &[u8]) -> Vec<u8> {
    let mut res = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len()).into_bytes();
    res.extend_from_slice(body);
    res
}

#[tokio::test]
async fn spoofed_headers_sent_and_caller_headers_preserved() {
    let (addr, server) = one_shot_server(plain_response(b"ok")).await;

    let transport = Transport::new();
    let req = Request::get(format!("http://{addr}/"))
        .unwrap()
        .header(ACCEPT_LANGUAGE, HeaderValue::from_static("fr-FR"));
    let res = transport.round_trip(req).await.unwrap();
    assert!(res.is_success());
    assert_eq!(res.version, HttpVersion::Http1_1);
    assert_eq!(res.body.bytes().await.unwrap(), "ok".as_bytes());

    let head = server.await.unwrap();
    assert!(head.contains("user-agent: Mozilla/5.0"), "head: {head}");
    assert!(head.contains("Chrome/131"), "head: {head}");
    assert!(head.contains("sec-fetch-mode: navigate"), "head: {head}");
    // The caller's value wins over the canonical one.
    assert!(head.contains("accept-language: fr-FR"), "head: {head}");
    assert!(!head.contains("en-GB"), "head: {head}");
}

#[tokio::test]
async fn gzip_response_is_transparently_decoded() {
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(b"hello compressed world").unwrap();
    let gz = enc.finish().unwrap();

    let mut response = format!(
        "HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
        gz.len()
    )
    .into_bytes();
    response.extend_from_slice(&gz);
    let (addr, _server) = one_shot_server(response).await;

    let transport = Transport::new();
    let res = transport
        .round_trip(Request::get(format!("http://{addr}/")).unwrap())
        .await
        .unwrap();
    assert!(res.headers.get(CONTENT_ENCODING).is_none());
    assert_eq!(res.body.bytes().await.unwrap(), "hello compressed world".as_bytes());
}

#[tokio::test]
async fn caller_accept_encoding_disables_decoding() {
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(b"still compressed").unwrap();
    let gz = enc.finish().unwrap();

    let mut response = format!(
        "HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
        gz.len()
    )
    .into_bytes();
    response.extend_from_slice(&gz);
    let (addr, server) = one_shot_server(response).await;

    let transport = Transport::new();
    let req = Request::get(format!("http://{addr}/"))
        .unwrap()
        .header(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
    let res = transport.round_trip(req).await.unwrap();

    // Encoded bytes arrive untouched, header intact.
    assert_eq!(res.headers.get(CONTENT_ENCODING).unwrap(), "gzip");
    assert_eq!(res.body.bytes().await.unwrap(), gz.as_slice());

    let head = server.await.unwrap();
    assert!(head.contains("accept-encoding: gzip\r\n"), "head: {head}");
    assert!(!head.contains("zstd"), "head: {head}");
}

#[tokio::test]
async fn chunked_responses_stream_chunk_by_chunk() {
    let response = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                     5\r\nfirst\r\n6\r\nsecond\r\n0\r\n\r\n"
        .to_vec();
    let (addr, _server) = one_shot_server(response).await;

    let transport = Transport::new();
    let mut res = transport
        .round_trip(Request::get(format!("http://{addr}/")).unwrap())
        .await
        .unwrap();

    let mut collected = Vec::new();
    while let Some(chunk) = res.body.chunk().await.unwrap() {
        collected.extend_from_slice(&chunk);
    }
    res.body.close().await.unwrap();
    assert_eq!(collected, b"firstsecond");
}

#[tokio::test]
async fn deadline_bounds_the_exchange() {
    // A server that accepts and then never answers.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (_sock, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
    });

    let transport = Transport::new();
    let req = Request::get(format!("http://{addr}/"))
        .unwrap()
        .timeout(Duration::from_millis(200));
    let err = transport.round_trip(req).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "got: {err}");
}

#[tokio::test]
async fn unsupported_schemes_are_rejected() {
    let transport = Transport::new();
    let err = transport
        .round_trip(Request::get("ftp://example.test/file").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedScheme(ref s) if s == "ftp"));
}
