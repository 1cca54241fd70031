//! guise: an HTTP(S) client transport that looks like Chrome on the wire.
//!
//! Every connection presents a fixed browser fingerprint: Chrome's TLS
//! ClientHello (cipher suites, curves, signature algorithms, GREASE,
//! permuted extensions via BoringSSL), Chrome's request headers, and
//! Chrome's HTTP/2 SETTINGS. ALPN picks HTTP/2 or HTTP/1.1 per connection,
//! and response bodies are transparently decoded (gzip, deflate, br, zstd)
//! unless the caller opts out by setting `Accept-Encoding` themselves.
//!
//! ```no_run
//! use guise::{Request, Transport};
//!
//! # async fn run() -> guise::Result<()> {
//! let transport = Transport::new();
//! let req = Request::get("https://example.com/")?
//!     .timeout(std::time::Duration::from_secs(30));
//! let res = transport.round_trip(req).await?;
//! println!("{} via {}", res.status, res.version.as_str());
//! let text = res.body.bytes().await?;
//! # Ok(())
//! # }
//! ```
//!
//! One exchange per connection. Pooling, redirects, cookies, and proxies are
//! out of scope; compose them above the transport if needed.

pub mod body;
pub mod chain;
pub mod decode;
pub mod error;
pub mod fingerprint;
pub mod headers;
pub mod request;
pub mod response;
pub mod transport;
pub mod version;

pub use body::{Body, BodyStream};
pub use error::{Error, Result};
pub use fingerprint::{Http2Settings, Profile, TlsFingerprint};
pub use request::Request;
pub use response::Response;
pub use transport::{Transport, TransportBuilder};
pub use version::HttpVersion;
