//! Core shared types: close status records and connection configuration

use std::time::Duration;

use crate::websocket::{DEFAULT_MAX_PAYLOAD_SIZE, WebSocketError, close_code};

/// Default timeout for a single transport read
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Default upper bound for a single transport read (64KB)
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

/// Status code and reason carried by a close frame.
///
/// Also used for the errors queued by the stream: each one is answered with
/// a close frame built from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// Close status code
    pub code: u16,
    /// Human readable reason
    pub reason: String,
}

impl CloseReason {
    /// Create a close reason.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Normal closure without reason.
    pub fn normal() -> Self {
        Self::new(close_code::NORMAL, "")
    }

    /// Close reason reported when the connection ended without a close frame.
    pub fn abnormal() -> Self {
        Self::new(close_code::ABNORMAL, "")
    }
}

impl From<&WebSocketError> for CloseReason {
    fn from(err: &WebSocketError) -> Self {
        Self::new(err.close_code(), err.to_string())
    }
}

/// Per-connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketConfig {
    /// Largest declared payload length accepted for one frame
    pub max_payload_size: u64,
    /// Timeout applied to every transport read
    pub read_timeout: Duration,
    /// Upper bound for the size of a single transport read
    pub read_chunk_size: usize,
}

impl WebSocketConfig {
    /// Create a configuration with default limits
    pub fn new() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }

    /// Set the largest accepted payload length
    pub fn with_max_payload_size(mut self, max_payload_size: u64) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }

    /// Set the read timeout
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Set the upper bound for a single read. Values below 1 are raised to 1.
    pub fn with_read_chunk_size(mut self, read_chunk_size: usize) -> Self {
        self.read_chunk_size = read_chunk_size.max(1);
        self
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WebSocketConfig::default();
        assert_eq!(config.max_payload_size, 16 * 1024 * 1024);
        assert_eq!(config.read_timeout, Duration::from_secs(30));
        assert_eq!(config.read_chunk_size, 65536);
    }

    #[test]
    fn test_config_builder() {
        let config = WebSocketConfig::new()
            .with_max_payload_size(1024)
            .with_read_timeout(Duration::from_millis(50))
            .with_read_chunk_size(0);

        assert_eq!(config.max_payload_size, 1024);
        assert_eq!(config.read_timeout, Duration::from_millis(50));
        assert_eq!(config.read_chunk_size, 1);
    }

    #[test]
    fn test_close_reason_from_error() {
        let reason = CloseReason::from(&WebSocketError::InvalidPayload);
        assert_eq!(reason.code, 1007);
        assert_eq!(reason.reason, "Invalid UTF-8 in text message");
    }
}
