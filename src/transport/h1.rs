//! Plain-framing exchanger: serialize the request onto the stream, parse the
//! response head with httparse, and hand back a streaming body.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::{Method, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, WriteHalf};

use crate::body::{Body, BodyStream};
use crate::chain::{Resource, ResourceChain};
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use crate::transport::dialer::MaybeHttpsStream;
use crate::transport::with_deadline;
use crate::version::HttpVersion;

/// Maximum response head size (64KB).
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Maximum number of headers to parse.
const MAX_HEADERS_COUNT: usize = 100;

const READ_CHUNK: usize = 8 * 1024;

/// Perform one HTTP/1.1 exchange over an owned connection.
///
/// The request deadline bounds the write and the response-head read; body
/// streaming afterwards is unbounded. On any write or parse failure the
/// connection is shut down and the close result joined onto the error.
pub async fn exchange(conn: MaybeHttpsStream, req: &Request) -> Result<Response> {
    let (rd, mut wr) = tokio::io::split(conn);

    let outcome = with_deadline(req.deadline, "HTTP/1.1 exchange", async {
        let head = serialize_request(req)?;
        wr.write_all(&head).await.map_err(|e| Error::http_protocol(format!("failed to write request: {e}")))?;
        if let Some(body) = &req.body {
            wr.write_all(body).await.map_err(|e| Error::http_protocol(format!("failed to write body: {e}")))?;
        }
        wr.flush().await.map_err(|e| Error::http_protocol(format!("failed to flush: {e}")))?;
        read_head(rd, &req.method).await
    })
    .await;

    match outcome {
        Ok((status, headers, raw_body)) => {
            tracing::debug!(status = status.as_u16(), "HTTP/1.1 response head received");
            let mut chain = ResourceChain::new();
            chain.push(Box::new(ConnectionCloser { wr }));
            let body = Body::new(Box::new(raw_body), chain);
            Ok(Response::new(status, headers, HttpVersion::Http1_1, body))
        }
        Err(e) => {
            let close = wr.shutdown().await.map_err(Error::from);
            Err(e.with_cleanup(close))
        }
    }
}

/// Write half of the connection, closed when the body chain closes.
struct ConnectionCloser {
    wr: WriteHalf<MaybeHttpsStream>,
}

#[async_trait]
impl Resource for ConnectionCloser {
    async fn close(&mut self) -> Result<()> {
        self.wr.shutdown().await.map_err(Error::from)
    }
}

/// Serialize the request head (and pick the target form) per RFC 9112.
fn serialize_request(req: &Request) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(1024);

    out.extend_from_slice(req.method.as_str().as_bytes());
    out.push(b' ');
    let path = req
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    out.extend_from_slice(path.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");

    // Host comes from the URL unless the caller supplied one.
    if !req.headers.contains_key(HOST) {
        let host = req
            .uri
            .host()
            .ok_or_else(|| Error::http_protocol("URL has no host"))?;
        out.extend_from_slice(b"Host: ");
        out.extend_from_slice(host.as_bytes());
        if let Some(port) = req.uri.port() {
            out.push(b':');
            out.extend_from_slice(port.as_str().as_bytes());
        }
        out.extend_from_slice(b"\r\n");
    }

    for (name, value) in req.headers.iter() {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    // Content-Length unless the caller framed the body themselves.
    if let Some(body) = &req.body {
        if !req.headers.contains_key(CONTENT_LENGTH) && !req.headers.contains_key(TRANSFER_ENCODING)
        {
            out.extend_from_slice(b"Content-Length: ");
            out.extend_from_slice(body.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
        }
    }

    out.extend_from_slice(b"\r\n");
    Ok(out)
}

/// Read and parse the response head, skipping 1xx informational responses
/// per RFC 9112 Section 6.
pub(crate) async fn read_head<R>(mut io: R, method: &Method) -> Result<(StatusCode, HeaderMap, H1Body<R>)>
where
    R: AsyncRead + Unpin + Send,
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    loop {
        let head_len = loop {
            if let Some(end) = find_head_end(&buf) {
                break end;
            }
            if buf.len() >= MAX_HEAD_SIZE {
                return Err(Error::http_protocol("response head too large"));
            }
            fill(&mut io, &mut buf)
                .await
                .map_err(|e| Error::http_protocol(format!("failed to read response: {e}")))?
                .ok_or_else(|| Error::http_protocol("connection closed before response head"))?;
        };

        let (status, headers) = parse_head(&buf[..head_len])?;
        let _ = buf.split_to(head_len);

        // 1xx responses carry no body; keep reading for the final response.
        // 101 switches protocols, which this transport does not do.
        if status.is_informational() {
            if status == StatusCode::SWITCHING_PROTOCOLS {
                return Err(Error::http_protocol("unexpected 101 Switching Protocols"));
            }
            continue;
        }

        let framing = response_framing(status, method, &headers)?;
        return Ok((status, headers, H1Body { io, buf, framing }));
    }
}

fn parse_head(head: &[u8]) -> Result<(StatusCode, HeaderMap)> {
    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS_COUNT];
    let mut parsed = httparse::Response::new(&mut header_storage);

    match parsed
        .parse(head)
        .map_err(|e| Error::http_protocol(format!("failed to parse response: {e}")))?
    {
        httparse::Status::Complete(_) => {}
        httparse::Status::Partial => {
            return Err(Error::http_protocol("incomplete response head"));
        }
    }

    let code = parsed
        .code
        .ok_or_else(|| Error::http_protocol("missing status code"))?;
    let status = StatusCode::from_u16(code)
        .map_err(|_| Error::http_protocol(format!("invalid status code {code}")))?;

    let mut headers = HeaderMap::with_capacity(parsed.headers.len());
    for h in parsed.headers.iter().filter(|h| !h.name.is_empty()) {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|e| Error::http_protocol(format!("invalid header name: {e}")))?;
        let value = HeaderValue::from_bytes(h.value)
            .map_err(|e| Error::http_protocol(format!("invalid header value: {e}")))?;
        headers.append(name, value);
    }

    Ok((status, headers))
}

/// Determine body framing per RFC 9112 Section 6.3.
fn response_framing(status: StatusCode, method: &Method, headers: &HeaderMap) -> Result<Framing> {
    let no_body = *method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED;
    if no_body {
        return Ok(Framing::Length(0));
    }

    // Transfer-Encoding overrides Content-Length; chunked must be final.
    if let Some(te) = headers.get(TRANSFER_ENCODING) {
        let te = te
            .to_str()
            .map_err(|_| Error::http_protocol("invalid Transfer-Encoding"))?;
        let chunked = te
            .split(',')
            .next_back()
            .map(|s| s.trim().eq_ignore_ascii_case("chunked"))
            .unwrap_or(false);
        return Ok(if chunked {
            Framing::Chunked(ChunkedState::Size)
        } else {
            Framing::UntilClose
        });
    }

    if let Some(cl) = headers.get(CONTENT_LENGTH) {
        let len = cl
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .ok_or_else(|| Error::http_protocol("invalid Content-Length"))?;
        return Ok(Framing::Length(len));
    }

    Ok(Framing::UntilClose)
}

#[derive(Debug)]
enum Framing {
    /// Fixed number of body bytes remaining.
    Length(u64),
    /// Chunked transfer coding.
    Chunked(ChunkedState),
    /// Body delimited by connection close.
    UntilClose,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ChunkedState {
    /// Expecting a chunk-size line.
    Size,
    /// Inside chunk data with this many bytes left.
    Data(u64),
    /// Expecting the CRLF that terminates chunk data.
    DataEnd,
    /// Consuming the trailer section.
    Trailers,
    Done,
}

/// Streaming HTTP/1.1 response body. Owns the read half of the connection;
/// the write half lives in the response's resource chain.
pub struct H1Body<R> {
    io: R,
    buf: BytesMut,
    framing: Framing,
}

impl<R: AsyncRead + Unpin + Send> H1Body<R> {
    async fn fill_or_eof(&mut self, context: &'static str) -> Result<()> {
        fill(&mut self.io, &mut self.buf)
            .await
            .map_err(|e| Error::http_protocol(format!("{context}: {e}")))?
            .ok_or_else(|| Error::http_protocol(format!("connection closed while reading {context}")))?;
        Ok(())
    }

    async fn next_length(&mut self, remaining: u64) -> Result<Option<Bytes>> {
        if remaining == 0 {
            return Ok(None);
        }
        if self.buf.is_empty() {
            let got = fill(&mut self.io, &mut self.buf).await?;
            if got.is_none() {
                return Err(Error::http_protocol(format!(
                    "connection closed with {remaining} body bytes outstanding"
                )));
            }
        }
        let take = (self.buf.len() as u64).min(remaining) as usize;
        let chunk = self.buf.split_to(take).freeze();
        self.framing = Framing::Length(remaining - take as u64);
        Ok(Some(chunk))
    }

    async fn next_until_close(&mut self) -> Result<Option<Bytes>> {
        if !self.buf.is_empty() {
            return Ok(Some(self.buf.split().freeze()));
        }
        match fill(&mut self.io, &mut self.buf).await? {
            Some(_) => Ok(Some(self.buf.split().freeze())),
            None => Ok(None),
        }
    }

    /// The current state is persisted to `self.framing` in the same step
    /// that consumes buffer bytes, so a `next_chunk` future dropped at any
    /// await point leaves the parser resumable.
    async fn next_chunked(&mut self, mut state: ChunkedState) -> Result<Option<Bytes>> {
        loop {
            match state {
                ChunkedState::Size => {
                    let line = loop {
                        if let Some(line) = take_line(&mut self.buf)? {
                            break line;
                        }
                        self.fill_or_eof("chunk size").await?;
                    };
                    let size = parse_chunk_size(&line)?;
                    state = if size == 0 { ChunkedState::Trailers } else { ChunkedState::Data(size) };
                    self.framing = Framing::Chunked(state);
                }
                ChunkedState::Data(remaining) => {
                    if self.buf.is_empty() {
                        self.fill_or_eof("chunk data").await?;
                    }
                    let take = (self.buf.len() as u64).min(remaining) as usize;
                    let chunk = self.buf.split_to(take).freeze();
                    let left = remaining - take as u64;
                    self.framing = Framing::Chunked(if left == 0 {
                        ChunkedState::DataEnd
                    } else {
                        ChunkedState::Data(left)
                    });
                    return Ok(Some(chunk));
                }
                ChunkedState::DataEnd => {
                    while self.buf.len() < 2 {
                        self.fill_or_eof("chunk terminator").await?;
                    }
                    let crlf = self.buf.split_to(2);
                    if &crlf[..] != b"\r\n" {
                        return Err(Error::http_protocol("chunk data not terminated by CRLF"));
                    }
                    state = ChunkedState::Size;
                    self.framing = Framing::Chunked(state);
                }
                ChunkedState::Trailers => {
                    let line = loop {
                        if let Some(line) = take_line(&mut self.buf)? {
                            break line;
                        }
                        self.fill_or_eof("trailers").await?;
                    };
                    if line.is_empty() {
                        state = ChunkedState::Done;
                        self.framing = Framing::Chunked(state);
                    }
                    // Non-empty trailer lines are consumed and ignored.
                }
                ChunkedState::Done => {
                    return Ok(None);
                }
            }
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> BodyStream for H1Body<R> {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        match self.framing {
            Framing::Length(remaining) => self.next_length(remaining).await,
            Framing::UntilClose => self.next_until_close().await,
            Framing::Chunked(state) => self.next_chunked(state).await,
        }
    }
}

/// Read more bytes into `buf`. Returns `Ok(None)` at EOF.
async fn fill<R: AsyncRead + Unpin>(io: &mut R, buf: &mut BytesMut) -> std::io::Result<Option<usize>> {
    buf.reserve(READ_CHUNK);
    let n = io.read_buf(buf).await?;
    Ok(if n == 0 { None } else { Some(n) })
}

/// Find the end of the response head (`\r\n\r\n`).
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Split one CRLF-terminated line off the buffer, without the CRLF.
fn take_line(buf: &mut BytesMut) -> Result<Option<Bytes>> {
    match buf.windows(2).position(|w| w == b"\r\n") {
        Some(pos) => {
            let line = buf.split_to(pos).freeze();
            let _ = buf.split_to(2);
            Ok(Some(line))
        }
        None => {
            if buf.len() > MAX_HEAD_SIZE {
                return Err(Error::http_protocol("line too long"));
            }
            Ok(None)
        }
    }
}

/// Parse a chunk-size line, tolerating chunk extensions after `;`.
fn parse_chunk_size(line: &[u8]) -> Result<u64> {
    let text = std::str::from_utf8(line)
        .map_err(|_| Error::http_protocol("chunk size is not valid UTF-8"))?;
    let size_part = text.split(';').next().unwrap_or("").trim();
    u64::from_str_radix(size_part, 16)
        .map_err(|_| Error::http_protocol(format!("invalid chunk size {size_part:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn collect<R: AsyncRead + Unpin + Send>(mut body: H1Body<R>) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = body.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn content_length_body() {
        let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhellorest-ignored";
        let (status, headers, body) = read_head(Cursor::new(wire.to_vec()), &Method::GET)
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get(CONTENT_LENGTH).unwrap(), "5");
        assert_eq!(collect(body).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn chunked_body_with_extensions_and_trailers() {
        let wire = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                     4;ext=1\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Trailer: v\r\n\r\n";
        let (_, _, body) = read_head(Cursor::new(wire.to_vec()), &Method::GET)
            .await
            .unwrap();
        assert_eq!(collect(body).await.unwrap(), b"Wikipedia");
    }

    #[tokio::test]
    async fn read_until_close_body() {
        let wire = b"HTTP/1.1 200 OK\r\n\r\nstreamed until eof";
        let (_, _, body) = read_head(Cursor::new(wire.to_vec()), &Method::GET)
            .await
            .unwrap();
        assert_eq!(collect(body).await.unwrap(), b"streamed until eof");
    }

    #[tokio::test]
    async fn informational_responses_are_skipped() {
        let wire = b"HTTP/1.1 103 Early Hints\r\nLink: </s.css>\r\n\r\n\
                     HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
        let (status, _, body) = read_head(Cursor::new(wire.to_vec()), &Method::GET)
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(collect(body).await.unwrap(), b"ok");
    }

    #[tokio::test]
    async fn chunked_parsing_survives_a_cancelled_read() {
        let (mut client, server) = tokio::io::duplex(1024);
        client
            .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n")
            .await
            .unwrap();

        let (_, _, mut body) = read_head(server, &Method::GET).await.unwrap();
        assert_eq!(body.next_chunk().await.unwrap().unwrap(), "Wiki");

        // Deliver the next chunk's size line but none of its data, then let
        // a read future time out (and be dropped) while it waits for data.
        client.write_all(b"6\r\n").await.unwrap();
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(50), body.next_chunk()).await;
        assert!(timed_out.is_err());

        // A fresh read picks up exactly where the dropped one left off.
        client.write_all(b"second\r\n0\r\n\r\n").await.unwrap();
        assert_eq!(body.next_chunk().await.unwrap().unwrap(), "second");
        assert!(body.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn head_responses_have_no_body() {
        let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n";
        let (_, _, body) = read_head(Cursor::new(wire.to_vec()), &Method::HEAD)
            .await
            .unwrap();
        assert_eq!(collect(body).await.unwrap(), b"");
    }

    #[tokio::test]
    async fn truncated_content_length_is_an_error() {
        let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort";
        let (_, _, body) = read_head(Cursor::new(wire.to_vec()), &Method::GET)
            .await
            .unwrap();
        assert!(collect(body).await.is_err());
    }

    #[test]
    fn request_line_and_host() {
        let req = Request::get("http://example.test:8080/a/b?q=1").unwrap();
        let bytes = serialize_request(&req).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("GET /a/b?q=1 HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.test:8080\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn content_length_added_for_bodies() {
        let req = Request::get("http://example.test/").unwrap().body("abc");
        let text = String::from_utf8(serialize_request(&req).unwrap()).unwrap();
        assert!(text.contains("Content-Length: 3\r\n"));
    }
}
