//! Negotiated HTTP version.

/// Protocol version a response was exchanged over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpVersion {
    /// Plain text framing.
    #[default]
    Http1_1,
    /// Multiplexed binary framing negotiated via ALPN "h2".
    Http2,
}

impl HttpVersion {
    /// Get human-readable version string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http1_1 => "HTTP/1.1",
            Self::Http2 => "HTTP/2",
        }
    }
}
