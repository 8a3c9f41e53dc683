//! Per-client threat classification.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::store::ClientRecord;

/// Blocked-to-total ratio above which a client is high threat.
const HIGH_BLOCKED_RATIO: f64 = 0.5;
/// Request rate above which a client is high threat.
const HIGH_REQUEST_RATE: f64 = 50.0;
const MEDIUM_BLOCKED_RATIO: f64 = 0.3;
const MEDIUM_REQUEST_RATE: f64 = 20.0;
const LOW_BLOCKED_RATIO: f64 = 0.1;
const LOW_REQUEST_RATE: f64 = 10.0;

/// Rates are computed over at least this much observation time, so a
/// client's very first requests cannot register as an absurd rate.
const MIN_OBSERVATION: Duration = Duration::from_secs(1);

/// Paths included in a [`ClientReport`].
const REPORT_TOP_PATHS: usize = 5;

/// How hostile a client looks, judged from its history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    /// Nothing noteworthy.
    Normal,
    /// Mildly suspicious history.
    Low,
    /// Repeated rejections or a sustained elevated rate.
    Medium,
    /// Mostly-rejected traffic or flood-level request rates.
    High,
}

impl ThreatLevel {
    /// Stable label for serialization and log fields.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a client from its record, as observed at `now`.
///
/// Two signals feed the verdict: the fraction of this client's requests
/// that were rejected, and its average request rate since first seen.
/// Whichever signal is worse decides the level. Pure with respect to the
/// record; classification never mutates state.
#[must_use]
pub fn classify(record: &ClientRecord, now: Instant) -> ThreatLevel {
    let total = record.total_requests();
    if total == 0 {
        return ThreatLevel::Normal;
    }

    let blocked_ratio = record.blocked_requests() as f64 / total as f64;
    let rate = request_rate(record, now);

    if blocked_ratio > HIGH_BLOCKED_RATIO || rate > HIGH_REQUEST_RATE {
        ThreatLevel::High
    } else if blocked_ratio > MEDIUM_BLOCKED_RATIO || rate > MEDIUM_REQUEST_RATE {
        ThreatLevel::Medium
    } else if blocked_ratio > LOW_BLOCKED_RATIO || rate > LOW_REQUEST_RATE {
        ThreatLevel::Low
    } else {
        ThreatLevel::Normal
    }
}

fn request_rate(record: &ClientRecord, now: Instant) -> f64 {
    let observed = now
        .duration_since(record.first_seen())
        .max(MIN_OBSERVATION)
        .as_secs_f64();
    record.total_requests() as f64 / observed
}

/// Point-in-time summary of one client for operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientReport {
    /// The client this report describes.
    pub client_id: String,
    /// Time between first sighting and the report.
    pub observed_for: Duration,
    /// Requests observed, admitted or not.
    pub total_requests: u64,
    /// Requests rejected by any check.
    pub blocked_requests: u64,
    /// Average requests per second since first seen.
    pub request_rate: f64,
    /// Distinct identifiers the client has presented.
    pub identifiers: Vec<String>,
    /// Most requested paths with hit counts, busiest first.
    pub top_paths: Vec<(String, u64)>,
    /// Threat classification at report time.
    pub threat_level: ThreatLevel,
}

impl ClientReport {
    /// Build a report for `client_id` from its record, as observed at `now`.
    #[must_use]
    pub fn from_record(client_id: &str, record: &ClientRecord, now: Instant) -> Self {
        Self {
            client_id: client_id.to_owned(),
            observed_for: now.duration_since(record.first_seen()),
            total_requests: record.total_requests(),
            blocked_requests: record.blocked_requests(),
            request_rate: request_rate(record, now),
            identifiers: record.identifiers().iter().cloned().collect(),
            top_paths: record.top_paths(REPORT_TOP_PATHS),
            threat_level: classify(record, now),
        }
    }
}
