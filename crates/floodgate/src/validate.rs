//! Request validation.

use serde::{Deserialize, Serialize};

use crate::config::ValidationConfig;
use crate::rate_limit::TrafficClass;

/// Transport-independent description of one incoming request.
///
/// The caller extracts these from whatever protocol it speaks; admission
/// control never sees sockets or headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// Self-reported client identifier, e.g. a user agent string.
    pub identifier: Option<String>,
    /// Requested path or operation name.
    pub path: Option<String>,
    /// Traffic class the request belongs to.
    pub class: TrafficClass,
}

impl RequestMetadata {
    /// Metadata for an ordinary request carrying an identifier.
    #[must_use]
    pub fn http(identifier: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            identifier: Some(identifier.into()),
            path: Some(path.into()),
            class: TrafficClass::Http,
        }
    }

    /// Metadata for an ordinary request with no identifier.
    #[must_use]
    pub fn http_anonymous(path: impl Into<String>) -> Self {
        Self {
            identifier: None,
            path: Some(path.into()),
            class: TrafficClass::Http,
        }
    }

    /// Metadata for a datagram, which carries neither identifier nor path.
    #[must_use]
    pub fn datagram() -> Self {
        Self {
            identifier: None,
            path: None,
            class: TrafficClass::Datagram,
        }
    }
}

/// Cheap structural screen for requests.
///
/// Flood tooling commonly omits the identifier or stuffs in a couple of
/// characters; genuine clients send something longer. This is a heuristic,
/// not authentication.
#[derive(Debug)]
pub struct RequestValidator {
    min_identifier_len: usize,
    enabled: bool,
}

impl RequestValidator {
    /// Create a validator requiring identifiers of at least `min_identifier_len` characters.
    #[must_use]
    pub fn new(min_identifier_len: usize) -> Self {
        Self {
            min_identifier_len,
            enabled: true,
        }
    }

    /// Create from configuration.
    #[must_use]
    pub fn from_config(config: &ValidationConfig) -> Self {
        Self {
            min_identifier_len: config.min_identifier_len,
            enabled: config.enabled,
        }
    }

    /// Check whether a request is structurally plausible.
    ///
    /// Datagram traffic has no identifier to inspect and always passes.
    #[must_use]
    pub fn validate(&self, meta: &RequestMetadata) -> bool {
        if !self.enabled {
            return true;
        }
        match meta.class {
            TrafficClass::Datagram => true,
            TrafficClass::Http => meta
                .identifier
                .as_deref()
                .is_some_and(|id| id.chars().count() >= self.min_identifier_len),
        }
    }

    /// Minimum identifier length, in characters.
    #[must_use]
    pub const fn min_identifier_len(&self) -> usize {
        self.min_identifier_len
    }

    /// Check if validation is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("curl/8.4.0", true; "ordinary identifier")]
    #[test_case("abcde", true; "exactly at the minimum")]
    #[test_case("abcd", false; "one below the minimum")]
    #[test_case("", false; "empty identifier")]
    #[test_case("x", false; "single character")]
    fn test_identifier_length_boundary(identifier: &str, expected: bool) {
        let validator = RequestValidator::new(5);
        let meta = RequestMetadata::http(identifier, "/");
        assert_eq!(validator.validate(&meta), expected);
    }

    #[test]
    fn test_missing_identifier_rejected() {
        let validator = RequestValidator::new(5);
        assert!(!validator.validate(&RequestMetadata::http_anonymous("/")));
    }

    #[test]
    fn test_length_counts_characters_not_bytes() {
        let validator = RequestValidator::new(5);
        // Five characters, more than five bytes
        let meta = RequestMetadata::http("ゑゐゆやも", "/");
        assert!(validator.validate(&meta));
    }

    #[test]
    fn test_datagram_skips_identifier_check() {
        let validator = RequestValidator::new(5);
        assert!(validator.validate(&RequestMetadata::datagram()));
    }

    #[test]
    fn test_disabled_validator_accepts_anything() {
        let validator = RequestValidator::from_config(&ValidationConfig {
            min_identifier_len: 5,
            enabled: false,
        });
        assert!(validator.validate(&RequestMetadata::http_anonymous("/")));
        assert!(validator.validate(&RequestMetadata::http("x", "/")));
    }

    #[test]
    fn test_from_config() {
        let validator = RequestValidator::from_config(&ValidationConfig {
            min_identifier_len: 8,
            enabled: true,
        });
        assert_eq!(validator.min_identifier_len(), 8);
        assert!(validator.is_enabled());
        assert!(!validator.validate(&RequestMetadata::http("short", "/")));
    }
}
