//! # floodgate
//!
//! Admission control and threat scoring for flood-exposed services.
//!
//! Every request passes through [`AdmissionControl::decide`] before the
//! service does any work for it. The checks run in a fixed order and the
//! first failure decides the rejection reason:
//!
//! ## Per-Client Checks
//!
//! - [`Blacklist`] - Temporary bans for rate violators, expired lazily
//! - [`ClientStore`] - Sharded records with exact connection slot accounting
//! - [`RequestWindow`] - Sliding window request budgets per traffic class
//! - [`RequestValidator`] - Identifier plausibility checks
//!
//! ## Service-Wide Pressure
//!
//! - [`LoadShaper`] - Admission delays that grow with global load
//! - [`EventLog`] - Admission counters and a ring of recent block events
//!
//! ## Scoring
//!
//! - [`ThreatLevel`] - Per-client threat classification from history
//! - [`ClientReport`] - Operator-facing summary of one client
//!
//! ## Configuration
//!
//! - [`AdmissionConfig`] - Unified configuration with safe defaults
//! - Per-check `enabled` switches for partial deployments
//!
//! # Example
//!
//! ```rust
//! use floodgate::{AdmissionControl, RequestMetadata, Verdict};
//! use std::time::Instant;
//!
//! let control = AdmissionControl::with_defaults();
//! let meta = RequestMetadata::http("agent/2.1", "/api/items");
//!
//! match control.decide("203.0.113.7", Instant::now(), &meta) {
//!     Ok(Verdict::Admit { delay }) => {
//!         // serve the request, then release its connection slot
//!         assert!(delay.is_zero());
//!         control.on_connection_closed("203.0.113.7");
//!     }
//!     Ok(Verdict::Reject { reason }) => println!("refused: {reason}"),
//!     Err(err) => eprintln!("failing closed: {err}"),
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admission;
pub mod blacklist;
pub mod config;
pub mod error;
pub mod events;
pub mod rate_limit;
pub mod shaper;
pub mod store;
pub mod threat;
pub mod validate;

// Re-export main types
pub use admission::{AdmissionControl, ConnectionPermit, RejectReason, ScopedVerdict, Verdict};
pub use blacklist::Blacklist;
pub use config::{
    AdmissionConfig, AdmissionConfigBuilder, BlacklistConfig, ConnectionConfig, EventLogConfig,
    LoadShapingConfig, RateLimitConfig, StoreConfig, ValidationConfig,
};
pub use error::{AdmissionError, AdmissionResult};
pub use events::{BlockEvent, EventLog, StatsSnapshot};
pub use rate_limit::{RatePolicy, RequestWindow, TrafficClass};
pub use shaper::LoadShaper;
pub use store::{ClientRecord, ClientStore, StoreTotals};
pub use threat::{classify, ClientReport, ThreatLevel};
pub use validate::{RequestMetadata, RequestValidator};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::admission::{AdmissionControl, RejectReason, ScopedVerdict, Verdict};
    pub use crate::config::AdmissionConfig;
    pub use crate::error::{AdmissionError, AdmissionResult};
    pub use crate::events::StatsSnapshot;
    pub use crate::rate_limit::TrafficClass;
    pub use crate::threat::ThreatLevel;
    pub use crate::validate::RequestMetadata;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_basic_admission_flow() {
        let control = AdmissionControl::with_defaults();
        let meta = RequestMetadata::http("agent/2.1", "/api/items");

        let verdict = control.decide("10.0.0.1", Instant::now(), &meta).unwrap();
        assert!(matches!(verdict, Verdict::Admit { .. }));
        control.on_connection_closed("10.0.0.1");
    }

    #[test]
    fn test_connection_limit_integration() {
        let config = AdmissionConfig::builder()
            .connection(ConnectionConfig {
                max_per_client: 2,
                ..ConnectionConfig::default()
            })
            .build();
        let control = AdmissionControl::new(config).unwrap();
        let meta = RequestMetadata::http("agent/2.1", "/api/items");
        let now = Instant::now();

        // First two hold their slots
        assert!(control.decide("10.0.0.2", now, &meta).unwrap().is_admitted());
        assert!(control.decide("10.0.0.2", now, &meta).unwrap().is_admitted());

        let verdict = control.decide("10.0.0.2", now, &meta).unwrap();
        assert_eq!(
            verdict,
            Verdict::Reject {
                reason: RejectReason::ConnectionLimit
            }
        );
    }

    #[test]
    fn test_blacklist_integration() {
        let control = AdmissionControl::with_defaults();
        let meta = RequestMetadata::http("agent/2.1", "/api/items");
        let now = Instant::now();

        control
            .blacklist()
            .block("10.0.0.3", now + Duration::from_secs(60));

        let verdict = control.decide("10.0.0.3", now, &meta).unwrap();
        assert_eq!(
            verdict,
            Verdict::Reject {
                reason: RejectReason::Blacklist
            }
        );
    }
}
