//! Counters and the block event log.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::admission::RejectReason;
use crate::config::EventLogConfig;

/// One rejected request, kept for operator inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockEvent {
    /// Wall-clock time of the rejection.
    pub at: DateTime<Utc>,
    /// The rejected client.
    pub client_id: String,
    /// Which check rejected the request.
    pub reason: RejectReason,
    /// Context for the rejection, e.g. the observed count or path.
    pub detail: String,
    /// Requests seen from this client so far, including this one.
    pub total_from_client: u64,
}

impl BlockEvent {
    /// Create an event stamped with the current wall-clock time.
    #[must_use]
    pub fn new(
        client_id: &str,
        reason: RejectReason,
        detail: impl Into<String>,
        total_from_client: u64,
    ) -> Self {
        Self {
            at: Utc::now(),
            client_id: client_id.to_owned(),
            reason,
            detail: detail.into(),
            total_from_client,
        }
    }
}

/// Process-lifetime admission statistics.
///
/// Assembled by the controller; counters come from one critical section so
/// the reason histogram always sums to the blocked count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Requests admitted since startup.
    pub admitted: u64,
    /// Requests rejected since startup.
    pub blocked: u64,
    /// Rejections per reason.
    pub reasons: HashMap<RejectReason, u64>,
    /// Clients currently blacklisted.
    pub blacklisted: usize,
    /// Connections currently held open across all clients.
    pub open_connections: u64,
    /// Client records currently tracked.
    pub tracked_clients: usize,
    /// Clients with at least one rejected request.
    pub offenders: usize,
    /// Admitted requests per second over the load shaping window.
    pub admitted_rate: f64,
}

#[derive(Debug, Default)]
struct EventLogInner {
    recent: VecDeque<BlockEvent>,
    reasons: HashMap<RejectReason, u64>,
    blocked: u64,
}

/// Global counters plus a bounded ring of recent block events.
#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    admitted: AtomicU64,
    inner: Mutex<EventLogInner>,
}

impl EventLog {
    /// Create a log retaining up to `capacity` recent block events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            admitted: AtomicU64::new(0),
            inner: Mutex::new(EventLogInner::default()),
        }
    }

    /// Create from configuration.
    #[must_use]
    pub fn from_config(config: &EventLogConfig) -> Self {
        Self::new(config.capacity)
    }

    /// Count one admitted request.
    pub fn record_admit(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one rejection and retain its event, dropping the oldest event
    /// once the ring is full.
    pub fn record_block(&self, event: BlockEvent) {
        let mut inner = self.inner.lock();
        inner.blocked = inner.blocked.saturating_add(1);
        *inner.reasons.entry(event.reason).or_insert(0) += 1;
        if inner.recent.len() >= self.capacity {
            inner.recent.pop_front();
        }
        inner.recent.push_back(event);
    }

    /// The most recent block events, oldest first, at most `limit` of them.
    #[must_use]
    pub fn recent_blocks(&self, limit: usize) -> Vec<BlockEvent> {
        let inner = self.inner.lock();
        let skip = inner.recent.len().saturating_sub(limit);
        inner.recent.iter().skip(skip).cloned().collect()
    }

    /// Requests admitted since startup.
    #[must_use]
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    /// Requests rejected since startup.
    #[must_use]
    pub fn blocked(&self) -> u64 {
        self.inner.lock().blocked
    }

    /// Rejections recorded for one reason.
    #[must_use]
    pub fn reason_count(&self, reason: RejectReason) -> u64 {
        self.inner.lock().reasons.get(&reason).copied().unwrap_or(0)
    }

    /// Blocked count and reason histogram, read in one critical section.
    #[must_use]
    pub fn counters(&self) -> (u64, u64, HashMap<RejectReason, u64>) {
        let inner = self.inner.lock();
        (self.admitted(), inner.blocked, inner.reasons.clone())
    }

    /// Maximum block events retained.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
