//! HTTP/2 fingerprint configuration (SETTINGS frame).

/// Chrome's total connection-level window size (~15MB).
/// Chrome sends initial 65535 + WINDOW_UPDATE of 15663105 = 15728640 total.
pub const CHROME_CONNECTION_WINDOW_SIZE: u32 = 15_728_640;

/// HTTP/2 SETTINGS presented to the server.
///
/// Computed once per transport on first use and shared by every multiplexed
/// exchange afterwards.
#[derive(Debug, Clone)]
pub struct Http2Settings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: u32,
    pub initial_window_size: u32,
    pub connection_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: u32,
}

impl Default for Http2Settings {
    fn default() -> Self {
        // Chrome defaults
        Self {
            header_table_size: 65_536,
            enable_push: false,
            max_concurrent_streams: 1000,
            initial_window_size: 6_291_456,
            connection_window_size: CHROME_CONNECTION_WINDOW_SIZE,
            max_frame_size: 16_384,
            max_header_list_size: 262_144,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chrome_defaults() {
        let s = Http2Settings::default();
        assert_eq!(s.max_header_list_size, 262_144);
        assert!(!s.enable_push);
        assert_eq!(s.initial_window_size, 6_291_456);
    }
}
