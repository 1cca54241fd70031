//! Fingerprinted dialer: TCP connect plus BoringSSL handshake shaped like
//! Chrome's ClientHello.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use boring::ssl::{SslConnector, SslMethod, SslSessionCacheMode, SslVerifyMode, SslVersion};
use boring::x509::X509;
use http::Uri;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_boring::SslStream;

use crate::error::{Error, Result};
use crate::fingerprint::TlsFingerprint;

// FFI bindings for BoringSSL extension control
use boring_sys::SSL_CTX;
use std::os::raw::c_int;

extern "C" {
    /// Enable GREASE (Generate Random Extensions And Sustain Extensibility)
    fn SSL_CTX_set_grease_enabled(ctx: *mut SSL_CTX, enabled: c_int) -> c_int;
    /// Enable extension order permutation (Chrome 110+ behavior)
    fn SSL_CTX_set_permute_extensions(ctx: *mut SSL_CTX, enabled: c_int) -> c_int;
}

/// Negotiated ALPN protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alpn {
    /// HTTP/2 ("h2")
    H2,
    /// HTTP/1.1 ("http/1.1")
    Http1,
    /// Cleartext connection or no protocol negotiated.
    None,
    /// Something the router will refuse.
    Other(String),
}

/// Stream that can be either HTTP (plain TCP) or HTTPS (TLS).
#[derive(Debug)]
pub enum MaybeHttpsStream {
    /// Plain TCP stream for HTTP.
    Http(TcpStream),
    /// TLS-wrapped stream for HTTPS.
    Https(SslStream<TcpStream>),
}

impl MaybeHttpsStream {
    /// The protocol negotiated during the TLS handshake. Plain TCP has no
    /// ALPN, so it reports `Alpn::None`.
    pub fn alpn(&self) -> Alpn {
        match self {
            MaybeHttpsStream::Http(_) => Alpn::None,
            MaybeHttpsStream::Https(stream) => match stream.ssl().selected_alpn_protocol() {
                Some(b"h2") => Alpn::H2,
                Some(b"http/1.1") => Alpn::Http1,
                None => Alpn::None,
                Some(other) => Alpn::Other(String::from_utf8_lossy(other).into_owned()),
            },
        }
    }
}

impl AsyncRead for MaybeHttpsStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_read(cx, buf),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeHttpsStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_write(cx, buf),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_flush(cx),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_shutdown(cx),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Opens connections with a fixed, fingerprinted TLS handshake.
pub struct Dialer {
    fingerprint: TlsFingerprint,
    root_certs: Vec<Vec<u8>>,
    accept_invalid_certs: bool,
}

impl Dialer {
    pub fn new(
        fingerprint: TlsFingerprint,
        root_certs: Vec<Vec<u8>>,
        accept_invalid_certs: bool,
    ) -> Self {
        Self { fingerprint, root_certs, accept_invalid_certs }
    }

    /// Derive `host:port` from the URL, defaulting the port by scheme.
    pub fn addr_from_uri(uri: &Uri) -> Result<(String, u16)> {
        let host = uri
            .host()
            .ok_or_else(|| Error::http_protocol("URL has no host"))?;
        let port = uri.port_u16().unwrap_or(match uri.scheme_str() {
            Some("https") => 443,
            _ => 80,
        });
        Ok((host.to_string(), port))
    }

    /// Open a TCP connection and, for `https`, run the fingerprinted TLS
    /// handshake. Deadline scoping is the caller's job (the facade wraps
    /// this call so the deadline ends with the handshake).
    pub async fn dial(&self, uri: &Uri) -> Result<(MaybeHttpsStream, Alpn)> {
        let (host, port) = Self::addr_from_uri(uri)?;
        let addr = format!("{host}:{port}");

        let socket_addr = tokio::net::lookup_host(&addr)
            .await
            .map_err(|e| Error::Resolve(format!("{addr}: {e}")))?
            .next()
            .ok_or_else(|| Error::Resolve(format!("{addr}: no addresses found")))?;

        let tcp = TcpStream::connect(socket_addr)
            .await
            .map_err(|e| Error::connect(format!("{addr}: {e}")))?;

        if uri.scheme_str() == Some("https") {
            let connector = self.configure_ssl()?;
            let mut config = connector
                .configure()
                .map_err(|e| Error::tls(format!("failed to configure SSL: {e}")))?;
            if self.accept_invalid_certs {
                config.set_verify_hostname(false);
            }

            // On handshake failure tokio-boring drops the stream, which
            // releases the raw connection.
            let ssl_stream = tokio_boring::connect(config, &host, tcp)
                .await
                .map_err(|e| Error::tls(format!("TLS handshake failed: {e}")))?;

            let stream = MaybeHttpsStream::Https(ssl_stream);
            let alpn = stream.alpn();
            tracing::debug!(%host, ?alpn, "TLS handshake complete");
            Ok((stream, alpn))
        } else {
            tracing::debug!(%addr, "cleartext connection established");
            Ok((MaybeHttpsStream::Http(tcp), Alpn::None))
        }
    }

    fn configure_ssl(&self) -> Result<SslConnector> {
        let mut builder = SslConnector::builder(SslMethod::tls_client())
            .map_err(|e| Error::tls(format!("failed to create SSL connector: {e}")))?;

        for cert_bytes in &self.root_certs {
            let cert = X509::from_der(cert_bytes)
                .or_else(|_| X509::from_pem(cert_bytes))
                .map_err(|e| Error::tls(format!("invalid root certificate: {e}")))?;
            builder
                .cert_store_mut()
                .add_cert(cert)
                .map_err(|e| Error::tls(format!("failed to add root certificate: {e}")))?;
        }

        if self.accept_invalid_certs {
            builder.set_verify(SslVerifyMode::NONE);
        }

        let fp = &self.fingerprint;
        if !fp.cipher_list.is_empty() {
            builder
                .set_cipher_list(&fp.cipher_list.join(":"))
                .map_err(|e| Error::tls(format!("failed to set cipher list: {e}")))?;
        }
        if !fp.curves.is_empty() {
            builder
                .set_curves_list(&fp.curves.join(":"))
                .map_err(|e| Error::tls(format!("failed to set curves: {e}")))?;
        }
        if !fp.sigalgs.is_empty() {
            builder
                .set_sigalgs_list(&fp.sigalgs.join(":"))
                .map_err(|e| Error::tls(format!("failed to set signature algorithms: {e}")))?;
        }

        // Chrome emits GREASE values and randomizes extension order.
        unsafe {
            let ctx = builder.as_ptr() as *mut SSL_CTX;
            SSL_CTX_set_grease_enabled(ctx, fp.grease as c_int);
            SSL_CTX_set_permute_extensions(ctx, 1);
        }

        builder
            .set_min_proto_version(Some(SslVersion::TLS1_2))
            .map_err(|e| Error::tls(format!("failed to set min TLS version: {e}")))?;
        builder
            .set_max_proto_version(Some(SslVersion::TLS1_3))
            .map_err(|e| Error::tls(format!("failed to set max TLS version: {e}")))?;

        // Browsers keep client-side session state for resumption.
        builder.set_session_cache_mode(SslSessionCacheMode::CLIENT);

        builder
            .set_alpn_protos(b"\x02h2\x08http/1.1")
            .map_err(|e| Error::tls(format!("failed to set ALPN: {e}")))?;

        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ports_follow_scheme() {
        let https: Uri = "https://example.test/".parse().unwrap();
        assert_eq!(Dialer::addr_from_uri(&https).unwrap(), ("example.test".into(), 443));

        let http: Uri = "http://example.test/".parse().unwrap();
        assert_eq!(Dialer::addr_from_uri(&http).unwrap(), ("example.test".into(), 80));

        let explicit: Uri = "https://example.test:8443/".parse().unwrap();
        assert_eq!(Dialer::addr_from_uri(&explicit).unwrap(), ("example.test".into(), 8443));
    }
}
