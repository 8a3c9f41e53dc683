//! Error types for admission control.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in admission control operations.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Client is on the temporary blacklist.
    #[error("client {client} is blacklisted for another {}s", remaining.as_secs())]
    Blacklisted {
        /// The blacklisted client id.
        client: String,
        /// Time left until the entry expires.
        remaining: Duration,
    },

    /// Concurrent connection limit exceeded.
    #[error("connection limit exceeded for {client}: {current}/{max}")]
    ConnectionLimitExceeded {
        /// The client id.
        client: String,
        /// Current open connection count.
        current: u32,
        /// Maximum allowed.
        max: u32,
    },

    /// Sliding window rate limit exceeded.
    #[error("rate limit exceeded for {client}: {count} requests in window (max {max})")]
    RateLimitExceeded {
        /// The rate-limited client id.
        client: String,
        /// Requests observed in the current window, including this one.
        count: u32,
        /// Maximum allowed per window.
        max: u32,
    },

    /// Request failed structural validation.
    #[error("invalid request from {client}: {reason}")]
    InvalidRequest {
        /// The client id.
        client: String,
        /// What the validator objected to.
        reason: String,
    },

    /// Configuration error.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for admission control operations.
pub type AdmissionResult<T> = Result<T, AdmissionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_blacklisted() {
        let err = AdmissionError::Blacklisted {
            client: "203.0.113.7".into(),
            remaining: Duration::from_secs(29),
        };
        let msg = err.to_string();
        assert!(msg.contains("203.0.113.7"));
        assert!(msg.contains("blacklisted"));
        assert!(msg.contains("29s"));
    }

    #[test]
    fn test_error_display_connection_limit() {
        let err = AdmissionError::ConnectionLimitExceeded {
            client: "203.0.113.7".into(),
            current: 10,
            max: 10,
        };
        let msg = err.to_string();
        assert!(msg.contains("connection limit exceeded"));
        assert!(msg.contains("10/10"));
    }

    #[test]
    fn test_error_display_rate_limit() {
        let err = AdmissionError::RateLimitExceeded {
            client: "203.0.113.7".into(),
            count: 21,
            max: 20,
        };
        let msg = err.to_string();
        assert!(msg.contains("rate limit exceeded"));
        assert!(msg.contains("21"));
        assert!(msg.contains("20"));
    }

    #[test]
    fn test_error_display_invalid_request() {
        let err = AdmissionError::InvalidRequest {
            client: "203.0.113.7".into(),
            reason: "identifier too short".into(),
        };
        assert!(err.to_string().contains("identifier too short"));
    }

    #[test]
    fn test_error_display_invalid_config() {
        let err = AdmissionError::InvalidConfig("window must be non-zero".into());
        assert!(err.to_string().contains("window must be non-zero"));
    }

    #[test]
    fn test_error_display_internal() {
        let err = AdmissionError::Internal("unexpected state".into());
        assert!(err.to_string().contains("unexpected state"));
    }
}
