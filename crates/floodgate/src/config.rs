//! Admission control configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AdmissionError, AdmissionResult};
use crate::rate_limit::{RatePolicy, TrafficClass};

/// Configuration for sliding window rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests per window for ordinary traffic.
    pub max_requests: u32,
    /// Maximum requests per window for datagram traffic.
    pub datagram_max_requests: u32,
    /// Sliding window duration.
    pub window: Duration,
    /// How long a violating client stays blacklisted.
    pub block_duration: Duration,
    /// Whether to enable rate limiting.
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 20,
            datagram_max_requests: 100,
            window: Duration::from_secs(10),
            block_duration: Duration::from_secs(30),
            enabled: true,
        }
    }
}

impl RateLimitConfig {
    /// Resolve the policy that applies to a traffic class.
    #[must_use]
    pub fn policy_for(&self, class: TrafficClass) -> RatePolicy {
        let max_requests = match class {
            TrafficClass::Http => self.max_requests,
            TrafficClass::Datagram => self.datagram_max_requests,
        };
        RatePolicy {
            max_requests,
            window: self.window,
            // One over the largest per-class limit is enough to observe any
            // violation while keeping per-client memory bounded.
            max_tracked: self.max_requests.max(self.datagram_max_requests) as usize + 1,
        }
    }
}

/// Configuration for concurrent connection limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Maximum concurrent connections per client.
    pub max_per_client: u32,
    /// Whether to enforce the connection limit.
    pub enabled: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_per_client: 10,
            enabled: true,
        }
    }
}

impl ConnectionConfig {
    /// Effective limit: unlimited when enforcement is disabled.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        if self.enabled { self.max_per_client } else { u32::MAX }
    }
}

/// Configuration for request validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Minimum plausible length for a client identifier, in characters.
    pub min_identifier_len: usize,
    /// Whether to enable validation.
    pub enabled: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_identifier_len: 5,
            enabled: true,
        }
    }
}

/// Configuration for load-adaptive response delays.
///
/// Delays step up through three tiers as the globally admitted request
/// rate (requests per second over `window`) crosses each threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadShapingConfig {
    /// Window over which the admitted request rate is measured.
    pub window: Duration,
    /// Rate above which the severe tier applies.
    pub severe_rate: f64,
    /// Delay applied in the severe tier.
    pub severe_delay: Duration,
    /// Rate above which the high tier applies.
    pub high_rate: f64,
    /// Delay applied in the high tier.
    pub high_delay: Duration,
    /// Rate above which the elevated tier applies.
    pub elevated_rate: f64,
    /// Delay applied in the elevated tier.
    pub elevated_delay: Duration,
    /// Whether to enable load shaping.
    pub enabled: bool,
}

impl Default for LoadShapingConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(5),
            severe_rate: 200.0,
            severe_delay: Duration::from_secs(1),
            high_rate: 100.0,
            high_delay: Duration::from_millis(500),
            elevated_rate: 50.0,
            elevated_delay: Duration::from_millis(200),
            enabled: true,
        }
    }
}

/// Configuration for the temporary blacklist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistConfig {
    /// Whether to enable blacklist checks.
    pub enabled: bool,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Configuration for the per-client state store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Number of lock shards for client records.
    pub shards: usize,
    /// Maximum distinct paths tracked per client.
    pub max_tracked_paths: usize,
    /// Maximum distinct identifiers tracked per client.
    pub max_tracked_identifiers: usize,
    /// Identifiers are truncated to this many characters before tracking.
    pub identifier_truncate_len: usize,
    /// Records idle for longer than this are dropped on cleanup.
    pub idle_eviction_age: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            shards: 16,
            max_tracked_paths: 32,
            max_tracked_identifiers: 8,
            identifier_truncate_len: 50,
            idle_eviction_age: Duration::from_secs(600),
        }
    }
}

/// Configuration for the block event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogConfig {
    /// Maximum block events retained; older events are dropped.
    pub capacity: usize,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

/// Main admission control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(Default)]
pub struct AdmissionConfig {
    /// Rate limiting settings.
    pub rate_limit: RateLimitConfig,
    /// Concurrent connection settings.
    pub connection: ConnectionConfig,
    /// Request validation settings.
    pub validation: ValidationConfig,
    /// Load shaping settings.
    pub load_shaping: LoadShapingConfig,
    /// Blacklist settings.
    pub blacklist: BlacklistConfig,
    /// Client state store settings.
    pub store: StoreConfig,
    /// Block event log settings.
    pub events: EventLogConfig,
}

impl AdmissionConfig {
    /// Create a new builder for admission configuration.
    #[must_use]
    pub fn builder() -> AdmissionConfigBuilder {
        AdmissionConfigBuilder::default()
    }

    /// Check the configuration for values the controller cannot operate with.
    ///
    /// # Errors
    ///
    /// Returns `AdmissionError::InvalidConfig` describing the first problem found.
    pub fn validate(&self) -> AdmissionResult<()> {
        if self.rate_limit.window.is_zero() {
            return Err(AdmissionError::InvalidConfig(
                "rate limit window must be non-zero".into(),
            ));
        }
        if self.rate_limit.max_requests == 0 || self.rate_limit.datagram_max_requests == 0 {
            return Err(AdmissionError::InvalidConfig(
                "rate limits must allow at least one request per window".into(),
            ));
        }
        if self.connection.max_per_client == 0 {
            return Err(AdmissionError::InvalidConfig(
                "connection limit must allow at least one connection".into(),
            ));
        }
        if self.load_shaping.window.is_zero() {
            return Err(AdmissionError::InvalidConfig(
                "load shaping window must be non-zero".into(),
            ));
        }
        if self.load_shaping.severe_rate < self.load_shaping.high_rate
            || self.load_shaping.high_rate < self.load_shaping.elevated_rate
        {
            return Err(AdmissionError::InvalidConfig(
                "load shaping rate thresholds must not decrease from elevated to severe".into(),
            ));
        }
        if self.load_shaping.severe_delay < self.load_shaping.high_delay
            || self.load_shaping.high_delay < self.load_shaping.elevated_delay
        {
            return Err(AdmissionError::InvalidConfig(
                "load shaping delays must not decrease from elevated to severe".into(),
            ));
        }
        if self.store.shards == 0 {
            return Err(AdmissionError::InvalidConfig(
                "store must have at least one shard".into(),
            ));
        }
        if self.events.capacity == 0 {
            return Err(AdmissionError::InvalidConfig(
                "event log capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for `AdmissionConfig`.
#[derive(Debug, Clone, Default)]
pub struct AdmissionConfigBuilder {
    config: AdmissionConfig,
}

impl AdmissionConfigBuilder {
    /// Set rate limit configuration.
    #[must_use]
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.config.rate_limit = config;
        self
    }

    /// Set connection configuration.
    #[must_use]
    pub fn connection(mut self, config: ConnectionConfig) -> Self {
        self.config.connection = config;
        self
    }

    /// Set validation configuration.
    #[must_use]
    pub fn validation(mut self, config: ValidationConfig) -> Self {
        self.config.validation = config;
        self
    }

    /// Set load shaping configuration.
    #[must_use]
    pub fn load_shaping(mut self, config: LoadShapingConfig) -> Self {
        self.config.load_shaping = config;
        self
    }

    /// Set blacklist configuration.
    #[must_use]
    pub fn blacklist(mut self, config: BlacklistConfig) -> Self {
        self.config.blacklist = config;
        self
    }

    /// Set client state store configuration.
    #[must_use]
    pub fn store(mut self, config: StoreConfig) -> Self {
        self.config.store = config;
        self
    }

    /// Set event log configuration.
    #[must_use]
    pub fn events(mut self, config: EventLogConfig) -> Self {
        self.config.events = config;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> AdmissionConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AdmissionConfig::default();

        assert_eq!(config.rate_limit.max_requests, 20);
        assert_eq!(config.rate_limit.datagram_max_requests, 100);
        assert_eq!(config.rate_limit.window, Duration::from_secs(10));
        assert_eq!(config.rate_limit.block_duration, Duration::from_secs(30));
        assert_eq!(config.connection.max_per_client, 10);
        assert_eq!(config.validation.min_identifier_len, 5);
        assert!(config.blacklist.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = AdmissionConfig::builder()
            .rate_limit(RateLimitConfig {
                max_requests: 5,
                ..RateLimitConfig::default()
            })
            .connection(ConnectionConfig {
                max_per_client: 2,
                ..ConnectionConfig::default()
            })
            .build();

        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.connection.max_per_client, 2);
        // Untouched sections keep their defaults
        assert_eq!(config.validation.min_identifier_len, 5);
    }

    #[test]
    fn test_policy_for_traffic_class() {
        let config = RateLimitConfig::default();

        let http = config.policy_for(TrafficClass::Http);
        assert_eq!(http.max_requests, 20);
        assert_eq!(http.window, Duration::from_secs(10));

        let datagram = config.policy_for(TrafficClass::Datagram);
        assert_eq!(datagram.max_requests, 100);

        // Retention covers the largest class limit plus the violating request
        assert_eq!(http.max_tracked, 101);
        assert_eq!(datagram.max_tracked, 101);
    }

    #[test]
    fn test_connection_limit_disabled_is_unbounded() {
        let config = ConnectionConfig {
            max_per_client: 10,
            enabled: false,
        };
        assert_eq!(config.limit(), u32::MAX);

        let config = ConnectionConfig::default();
        assert_eq!(config.limit(), 10);
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let config = AdmissionConfig::builder()
            .rate_limit(RateLimitConfig {
                window: Duration::ZERO,
                ..RateLimitConfig::default()
            })
            .build();
        assert!(matches!(
            config.validate(),
            Err(AdmissionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_shards() {
        let config = AdmissionConfig::builder()
            .store(StoreConfig {
                shards: 0,
                ..StoreConfig::default()
            })
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_tiers() {
        let config = AdmissionConfig::builder()
            .load_shaping(LoadShapingConfig {
                severe_rate: 10.0,
                high_rate: 100.0,
                ..LoadShapingConfig::default()
            })
            .build();
        assert!(config.validate().is_err());

        let config = AdmissionConfig::builder()
            .load_shaping(LoadShapingConfig {
                severe_delay: Duration::from_millis(10),
                ..LoadShapingConfig::default()
            })
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_event_capacity() {
        let config = AdmissionConfig::builder()
            .events(EventLogConfig { capacity: 0 })
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_round_trips_through_serde() {
        let config = AdmissionConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: AdmissionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.rate_limit.max_requests, 20);
        assert_eq!(parsed.store.idle_eviction_age, Duration::from_secs(600));
    }
}
