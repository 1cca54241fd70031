//! Canonical browser header set and the spoofing merge policy.

use http::header::{HeaderMap, HeaderName, HeaderValue};

/// Chrome 131 navigation headers, in the order Chrome sends them.
///
/// `Accept-Encoding` advertises everything the decoding pipeline can peel;
/// a caller that sets its own `Accept-Encoding` opts out of decoding and
/// receives the encoded bytes as-is.
pub fn chrome_headers() -> Vec<(HeaderName, HeaderValue)> {
    [
        ("sec-ch-ua", r#""Chromium";v="131", "Google Chrome";v="131", "Not_A Brand";v="24""#),
        ("sec-ch-ua-mobile", "?0"),
        ("sec-ch-ua-platform", r#""macOS""#),
        ("upgrade-insecure-requests", "1"),
        ("user-agent", "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36"),
        ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7"),
        ("sec-fetch-site", "cross-site"),
        ("sec-fetch-mode", "navigate"),
        ("sec-fetch-user", "?1"),
        ("sec-fetch-dest", "document"),
        ("accept-encoding", "gzip, deflate, br, zstd"),
        ("accept-language", "en-GB,en-US;q=0.9,en;q=0.8"),
        ("priority", "u=0, i"),
    ]
    .into_iter()
    .map(|(name, value)| {
        (
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        )
    })
    .collect()
}

/// Merge the canonical set into the request headers.
///
/// Policy: a canonical header is set only when the caller has not supplied
/// one. Caller headers always win, so e.g. a custom `Accept-Language`
/// survives untouched. Use with care: overriding canonical values can
/// thwart the evasion the canonical set exists for.
pub fn apply(headers: &mut HeaderMap, canonical: &[(HeaderName, HeaderValue)]) {
    for (name, value) in canonical {
        if !headers.contains_key(name) {
            headers.insert(name.clone(), value.clone());
        }
    }
}
