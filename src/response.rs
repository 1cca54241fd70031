//! Response descriptor returned by the transport.

use http::header::HeaderMap;
use http::StatusCode;

use crate::body::Body;
use crate::version::HttpVersion;

/// One HTTP response with a streaming body.
///
/// Ownership of the body (and with it the connection) transfers to the
/// caller; reading it to EOF and closing it is the caller's job. Dropping
/// the body without closing still releases the socket, but close errors are
/// only observable through [`Body::close`].
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub version: HttpVersion,
    pub body: Body,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, version: HttpVersion, body: Body) -> Self {
        Self { status, headers, version, body }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Look up a header value as a string, if present and valid UTF-8.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
