//! Browser fingerprint profiles.

use http::header::{HeaderName, HeaderValue};

use super::http2::Http2Settings;
use super::tls::TlsFingerprint;
use crate::headers;

/// Browser identity a transport presents on the wire.
///
/// One fixed profile is modeled; adding more browsers (or more Chrome
/// versions) means adding variants here, nothing else changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    /// Chrome 131 on macOS.
    #[default]
    Chrome131,
}

impl Profile {
    /// The TLS handshake parameters for this profile.
    pub fn tls_fingerprint(&self) -> TlsFingerprint {
        match self {
            Self::Chrome131 => TlsFingerprint::chrome_131(),
        }
    }

    /// The HTTP/2 SETTINGS for this profile.
    pub fn http2_settings(&self) -> Http2Settings {
        match self {
            Self::Chrome131 => Http2Settings::default(),
        }
    }

    /// The canonical header table for this profile.
    pub fn headers(&self) -> Vec<(HeaderName, HeaderValue)> {
        match self {
            Self::Chrome131 => headers::chrome_headers(),
        }
    }
}
