//! The transport facade: dial, spoof, route, exchange, decode.

pub mod dialer;
pub mod h1;
pub mod h2;

use std::future::Future;
use std::sync::OnceLock;
use std::time::Instant;

use http::header::ACCEPT_ENCODING;
use tokio::io::AsyncWriteExt;

use crate::decode::decode_response;
use crate::error::{Error, Result};
use crate::fingerprint::{Http2Settings, Profile};
use crate::headers;
use crate::request::Request;
use crate::response::Response;

pub use dialer::{Alpn, Dialer, MaybeHttpsStream};

/// An HTTP(S) client transport that presents a fixed browser fingerprint:
/// Chrome's TLS ClientHello, header set, and HTTP/2 SETTINGS.
///
/// One exchange per connection; no pooling, redirects, or cookies. Cheap to
/// share behind a reference across tasks.
pub struct Transport {
    profile: Profile,
    dialer: Dialer,
    h2_settings: OnceLock<Http2Settings>,
}

impl Transport {
    /// A transport with the default profile and system trust.
    pub fn new() -> Self {
        TransportBuilder::new().build()
    }

    pub fn builder() -> TransportBuilder {
        TransportBuilder::new()
    }

    /// Perform one HTTP exchange.
    ///
    /// The request deadline bounds dialing, the TLS handshake, and the
    /// exchange of heads; reading the returned body is not bounded. Headers
    /// the caller set are never overwritten by the spoofed set.
    pub async fn round_trip(&self, mut req: Request) -> Result<Response> {
        match req.uri.scheme_str() {
            Some("http") | Some("https") => {}
            other => {
                return Err(Error::UnsupportedScheme(
                    other.unwrap_or("<none>").to_string(),
                ));
            }
        }

        // A caller-set Accept-Encoding means the caller handles decoding;
        // check before the spoofed headers fill it in.
        let caller_handles_encoding = req.headers.contains_key(ACCEPT_ENCODING);

        headers::apply(&mut req.headers, &self.profile.headers());

        let (mut conn, alpn) = with_deadline(
            req.deadline,
            "connect",
            self.dialer.dial(&req.uri),
        )
        .await?;

        let exchanger = match route(req.uri.scheme_str(), &alpn) {
            Ok(exchanger) => exchanger,
            Err(e) => return Err(close_after_route_failure(conn, e).await),
        };

        let mut res = match exchanger {
            Exchanger::Plain => h1::exchange(conn, &req).await?,
            Exchanger::Multiplexed => {
                let settings = self
                    .h2_settings
                    .get_or_init(|| self.profile.http2_settings());
                h2::exchange(conn, &req, settings).await?
            }
        };

        if !caller_handles_encoding {
            if let Err(e) = decode_response(&mut res) {
                // Drain so the peer sees a clean end of stream, then close.
                let cleanup = res.body.drain_and_close().await;
                return Err(e.with_cleanup(cleanup));
            }
        }

        Ok(res)
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

/// Configures a [`Transport`].
pub struct TransportBuilder {
    profile: Profile,
    root_certs: Vec<Vec<u8>>,
    accept_invalid_certs: bool,
}

impl TransportBuilder {
    pub fn new() -> Self {
        Self {
            profile: Profile::default(),
            root_certs: Vec::new(),
            accept_invalid_certs: false,
        }
    }

    /// Select the browser profile to present.
    pub fn profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }

    /// Trust an additional root certificate (DER or PEM).
    pub fn add_root_certificate(mut self, cert: Vec<u8>) -> Self {
        self.root_certs.push(cert);
        self
    }

    /// Disable certificate and hostname verification. Test use only.
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn build(self) -> Transport {
        let dialer = Dialer::new(
            self.profile.tls_fingerprint(),
            self.root_certs,
            self.accept_invalid_certs,
        );
        Transport {
            profile: self.profile,
            dialer,
            h2_settings: OnceLock::new(),
        }
    }
}

impl Default for TransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Which wire protocol carries the exchange.
#[derive(Debug, PartialEq, Eq)]
enum Exchanger {
    /// HTTP/1.1 framing directly on the stream.
    Plain,
    /// An HTTP/2 session.
    Multiplexed,
}

/// Pick the exchanger from the URL scheme and the negotiated ALPN protocol.
/// Cleartext is always HTTP/1.1; h2c upgrades are not attempted.
fn route(scheme: Option<&str>, alpn: &Alpn) -> Result<Exchanger> {
    match (scheme, alpn) {
        (Some("http"), _) => Ok(Exchanger::Plain),
        (Some("https"), Alpn::H2) => Ok(Exchanger::Multiplexed),
        (Some("https"), Alpn::Http1) | (Some("https"), Alpn::None) => Ok(Exchanger::Plain),
        (Some("https"), Alpn::Other(proto)) => {
            Err(Error::UnsupportedProtocol(proto.clone()))
        }
        (other, _) => Err(Error::UnsupportedScheme(
            other.unwrap_or("<none>").to_string(),
        )),
    }
}

/// Shut down a connection no exchanger will take, joining the close result
/// onto the routing error so neither outcome is lost.
async fn close_after_route_failure<C>(mut conn: C, err: Error) -> Error
where
    C: tokio::io::AsyncWrite + Unpin,
{
    let close = conn.shutdown().await.map_err(Error::from);
    err.with_cleanup(close)
}

/// Run `fut` under the request deadline, if one is set. The phase name is
/// what a timeout error reports.
pub(crate) async fn with_deadline<T, F>(
    deadline: Option<Instant>,
    phase: &'static str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        None => fut.await,
        Some(deadline) => {
            let deadline = tokio::time::Instant::from_std(deadline);
            match tokio::time::timeout_at(deadline, fut).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(phase.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::AsyncWrite;

    struct CountingConn {
        shutdowns: Arc<AtomicUsize>,
        fail_shutdown: bool,
    }

    impl AsyncWrite for CountingConn {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            if self.fail_shutdown {
                Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "shutdown failed")))
            } else {
                Poll::Ready(Ok(()))
            }
        }
    }

    #[tokio::test]
    async fn unroutable_alpn_shuts_the_connection_down_once() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let conn = CountingConn { shutdowns: shutdowns.clone(), fail_shutdown: false };

        let routing_err = route(Some("https"), &Alpn::Other("spdy/3".into())).unwrap_err();
        let err = close_after_route_failure(conn, routing_err).await;

        assert!(matches!(err, Error::UnsupportedProtocol(ref p) if p == "spdy/3"));
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn route_failure_joins_a_failed_close() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let conn = CountingConn { shutdowns: shutdowns.clone(), fail_shutdown: true };

        let routing_err = route(Some("https"), &Alpn::Other("spdy/3".into())).unwrap_err();
        let err = close_after_route_failure(conn, routing_err).await;

        match err {
            Error::Multiple(agg) => {
                assert_eq!(agg.0.len(), 2);
                assert!(matches!(agg.0[0], Error::UnsupportedProtocol(_)));
                assert!(matches!(agg.0[1], Error::Io(_)));
            }
            other => panic!("expected aggregate, got {other}"),
        }
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn routing_follows_scheme_and_alpn() {
        assert_eq!(route(Some("http"), &Alpn::None).unwrap(), Exchanger::Plain);
        assert_eq!(route(Some("https"), &Alpn::H2).unwrap(), Exchanger::Multiplexed);
        assert_eq!(route(Some("https"), &Alpn::Http1).unwrap(), Exchanger::Plain);
        assert_eq!(route(Some("https"), &Alpn::None).unwrap(), Exchanger::Plain);

        let err = route(Some("https"), &Alpn::Other("spdy/3".into())).unwrap_err();
        assert!(matches!(err, Error::UnsupportedProtocol(ref p) if p == "spdy/3"));

        let err = route(Some("ftp"), &Alpn::None).unwrap_err();
        assert!(matches!(err, Error::UnsupportedScheme(ref s) if s == "ftp"));
    }

    #[tokio::test]
    async fn deadline_cuts_off_slow_phases() {
        let deadline = Some(Instant::now() + Duration::from_millis(10));
        let err = with_deadline(deadline, "connect", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Timeout(ref phase) if phase == "connect"));
    }

    #[tokio::test]
    async fn no_deadline_means_no_bound() {
        let result: Result<u32> = with_deadline(None, "connect", async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
