//! Sliding window rate limiting.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Class of traffic a request belongs to, used to pick a rate policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficClass {
    /// Ordinary request/response traffic.
    #[default]
    Http,
    /// Connectionless datagram traffic, allowed a higher request budget.
    Datagram,
}

/// Resolved rate limiting parameters for one traffic class.
#[derive(Debug, Clone, Copy)]
pub struct RatePolicy {
    /// Maximum requests allowed per window.
    pub max_requests: u32,
    /// Window duration.
    pub window: Duration,
    /// Maximum timestamps retained per client regardless of verdict.
    pub max_tracked: usize,
}

/// Sliding window of request timestamps for one client.
///
/// Timestamps are supplied by the caller rather than read from the clock,
/// which keeps window arithmetic deterministic under test.
#[derive(Debug)]
pub struct RequestWindow {
    timestamps: VecDeque<Instant>,
}

impl RequestWindow {
    /// Create an empty window.
    #[must_use]
    pub fn new() -> Self {
        Self {
            timestamps: VecDeque::new(),
        }
    }

    /// Record a request at `now` and check it against `policy`.
    ///
    /// Expired timestamps are pruned first, then the new request is recorded.
    /// Returns whether the request is allowed and the number of requests in
    /// the window including this one. The timestamp is retained even when the
    /// request is over the limit, so a client that keeps sending keeps
    /// violating.
    pub fn check_and_record(&mut self, now: Instant, policy: &RatePolicy) -> (bool, u32) {
        self.prune(now, policy.window);
        self.timestamps.push_back(now);
        while self.timestamps.len() > policy.max_tracked {
            self.timestamps.pop_front();
        }
        let count = self.timestamps.len() as u32;
        (count <= policy.max_requests, count)
    }

    /// Count requests currently inside the window ending at `now`.
    pub fn current_count(&mut self, now: Instant, window: Duration) -> u32 {
        self.prune(now, window);
        self.timestamps.len() as u32
    }

    /// Number of timestamps retained, pruned or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether the window holds no timestamps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        // checked_sub covers processes younger than the window
        if let Some(cutoff) = now.checked_sub(window) {
            while self.timestamps.front().is_some_and(|t| *t < cutoff) {
                self.timestamps.pop_front();
            }
        }
    }
}

impl Default for RequestWindow {
    fn default() -> Self {
        Self::new()
    }
}
