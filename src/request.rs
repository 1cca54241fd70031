//! Request descriptor accepted by the transport.

use std::time::Instant;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, Uri};

use crate::error::{Error, Result};

/// One HTTP request. The transport reads and augments the headers but never
/// removes or rewrites what the caller set.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Bounds dialing, the TLS handshake, and the header exchange. Body
    /// streaming after the response returns is deliberately not bounded.
    pub deadline: Option<Instant>,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: None,
            deadline: None,
        }
    }

    /// Build a GET request from a URL string.
    pub fn get(url: impl AsRef<str>) -> Result<Self> {
        let uri: Uri = url
            .as_ref()
            .parse()
            .map_err(|e| Error::http_protocol(format!("invalid URL: {e}")))?;
        Ok(Self::new(Method::GET, uri))
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set an absolute deadline for the dial/handshake/exchange phases.
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Convenience for a deadline relative to now.
    pub fn timeout(self, timeout: std::time::Duration) -> Self {
        self.deadline(Instant::now() + timeout)
    }
}
