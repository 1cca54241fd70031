//! Error types for the guise crate.

use std::fmt;
use std::io;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during a round trip.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Hostname did not resolve to any address.
    #[error("address resolution failed for {0}")]
    Resolve(String),

    /// Transport-layer connect failure.
    #[error("connection error: {0}")]
    Connect(String),

    /// TLS handshake or configuration failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// URL scheme the transport does not speak.
    #[error("unsupported scheme {0:?}")]
    UnsupportedScheme(String),

    /// ALPN negotiated a protocol the router does not know.
    #[error("unsupported negotiated protocol {0:?}")]
    UnsupportedProtocol(String),

    /// HTTP/1.1 write or parse failure.
    #[error("HTTP protocol error: {0}")]
    HttpProtocol(String),

    /// HTTP/2 session or exchange failure.
    #[error("HTTP/2 error: {0}")]
    Http2(#[from] h2::Error),

    /// Content-Encoding token with no matching decoder.
    #[error("unsupported content encoding {0:?}")]
    UnsupportedEncoding(String),

    /// Decoder initialization or feed failure.
    #[error("decode error: {0}")]
    Decode(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Request deadline exceeded.
    #[error("deadline exceeded during {0}")]
    Timeout(String),

    /// Several failures surfaced together, e.g. an exchange error joined
    /// with the error from closing the connection afterwards.
    #[error("{0}")]
    Multiple(Aggregate),
}

impl Error {
    /// Create a connect error.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect(message.into())
    }

    /// Create a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    /// Create an HTTP protocol error.
    pub fn http_protocol(message: impl Into<String>) -> Self {
        Self::HttpProtocol(message.into())
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Combine two errors into one aggregate, flattening nested aggregates.
    ///
    /// Used wherever a failure must be surfaced together with the result of
    /// releasing an already-acquired resource, so neither masks the other.
    pub fn join(self, other: Error) -> Error {
        let mut errors = match self {
            Error::Multiple(Aggregate(list)) => list,
            first => vec![first],
        };
        match other {
            Error::Multiple(Aggregate(list)) => errors.extend(list),
            second => errors.push(second),
        }
        Error::Multiple(Aggregate(errors))
    }

    /// Join a cleanup result onto this error. `Ok` cleanups leave the
    /// original error untouched.
    pub fn with_cleanup(self, cleanup: Result<()>) -> Error {
        match cleanup {
            Ok(()) => self,
            Err(e) => self.join(e),
        }
    }
}

/// An ordered list of errors that occurred together.
#[derive(Debug)]
pub struct Aggregate(pub Vec<Error>);

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; also: ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}
