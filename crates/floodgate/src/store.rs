//! Sharded per-client state store.

use std::collections::{BTreeSet, HashMap};
use std::hash::{BuildHasher, RandomState};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::config::StoreConfig;
use crate::rate_limit::{RatePolicy, RequestWindow};

/// Everything tracked about one client.
///
/// A record is only ever touched under its shard lock, so checks that read
/// and update it (rate window, connection slots) are exact under concurrency.
#[derive(Debug)]
pub struct ClientRecord {
    /// Sliding window of recent request timestamps.
    window: RequestWindow,
    /// Currently open connections.
    open_connections: u32,
    /// Requests observed, admitted or not.
    total_requests: u64,
    /// Requests rejected by any check.
    blocked_requests: u64,
    /// When the client was first observed.
    first_seen: Instant,
    /// When the client last sent a request.
    last_seen: Instant,
    /// Distinct identifiers presented by the client, truncated and capped.
    identifiers: BTreeSet<String>,
    /// Request counts per path, capped at a configured number of paths.
    paths: HashMap<String, u64>,
    /// Requests for paths beyond the tracking cap.
    path_overflow: u64,
}

impl ClientRecord {
    fn new(now: Instant) -> Self {
        Self {
            window: RequestWindow::new(),
            open_connections: 0,
            total_requests: 0,
            blocked_requests: 0,
            first_seen: now,
            last_seen: now,
            identifiers: BTreeSet::new(),
            paths: HashMap::new(),
            path_overflow: 0,
        }
    }

    /// Record a request arrival, whatever its eventual verdict.
    pub fn note_request(
        &mut self,
        now: Instant,
        identifier: Option<&str>,
        path: Option<&str>,
        limits: &StoreConfig,
    ) {
        self.total_requests = self.total_requests.saturating_add(1);
        self.last_seen = now;

        if let Some(identifier) = identifier {
            let trimmed: String = identifier
                .chars()
                .take(limits.identifier_truncate_len)
                .collect();
            if !self.identifiers.contains(&trimmed)
                && self.identifiers.len() < limits.max_tracked_identifiers
            {
                self.identifiers.insert(trimmed);
            }
        }

        if let Some(path) = path {
            if let Some(count) = self.paths.get_mut(path) {
                *count = count.saturating_add(1);
            } else if self.paths.len() < limits.max_tracked_paths {
                self.paths.insert(path.to_owned(), 1);
            } else {
                self.path_overflow = self.path_overflow.saturating_add(1);
            }
        }
    }

    /// Record that a request from this client was rejected.
    pub fn note_blocked(&mut self) {
        self.blocked_requests = self.blocked_requests.saturating_add(1);
    }

    /// Take a connection slot if one is free under `max`.
    pub fn try_acquire_connection(&mut self, max: u32) -> bool {
        if self.open_connections >= max {
            return false;
        }
        self.open_connections = self.open_connections.saturating_add(1);
        true
    }

    /// Return a connection slot. False when none were held.
    pub fn release_connection(&mut self) -> bool {
        if self.open_connections == 0 {
            return false;
        }
        self.open_connections -= 1;
        true
    }

    /// Record the request in the rate window and check it against `policy`.
    pub fn check_rate(&mut self, now: Instant, policy: &RatePolicy) -> (bool, u32) {
        self.window.check_and_record(now, policy)
    }

    /// Currently open connections.
    #[must_use]
    pub const fn open_connections(&self) -> u32 {
        self.open_connections
    }

    /// Total requests observed from this client.
    #[must_use]
    pub const fn total_requests(&self) -> u64 {
        self.total_requests
    }

    /// Requests rejected by any check.
    #[must_use]
    pub const fn blocked_requests(&self) -> u64 {
        self.blocked_requests
    }

    /// When the client was first observed.
    #[must_use]
    pub const fn first_seen(&self) -> Instant {
        self.first_seen
    }

    /// When the client last sent a request.
    #[must_use]
    pub const fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Distinct identifiers the client has presented.
    #[must_use]
    pub const fn identifiers(&self) -> &BTreeSet<String> {
        &self.identifiers
    }

    /// Most requested paths, busiest first, ties broken by path name.
    #[must_use]
    pub fn top_paths(&self, limit: usize) -> Vec<(String, u64)> {
        let mut paths: Vec<_> = self
            .paths
            .iter()
            .map(|(path, count)| (path.clone(), *count))
            .collect();
        paths.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        paths.truncate(limit);
        paths
    }

    /// Requests for paths beyond the tracking cap.
    #[must_use]
    pub const fn path_overflow(&self) -> u64 {
        self.path_overflow
    }
}

/// Counts aggregated across every client record.
#[derive(Debug, Clone, Copy)]
pub struct StoreTotals {
    /// Records currently tracked.
    pub clients: usize,
    /// Open connections summed over all clients.
    pub open_connections: u64,
    /// Clients with at least one rejected request.
    pub offenders: usize,
}

#[derive(Debug, Default)]
struct Shard {
    records: Mutex<HashMap<String, ClientRecord>>,
}

/// Client records behind an array of lock shards.
///
/// A client id always hashes to the same shard, so operations for one
/// client serialize while unrelated clients proceed in parallel.
#[derive(Debug)]
pub struct ClientStore {
    shards: Box<[Shard]>,
    hasher: RandomState,
}

impl ClientStore {
    /// Create a store with the given number of shards (at least one).
    #[must_use]
    pub fn new(shards: usize) -> Self {
        let count = shards.max(1);
        Self {
            shards: (0..count).map(|_| Shard::default()).collect(),
            hasher: RandomState::new(),
        }
    }

    fn shard_for(&self, client: &str) -> &Shard {
        let index = (self.hasher.hash_one(client) as usize) % self.shards.len();
        &self.shards[index]
    }

    /// Run `f` against the client's record under its shard lock, creating
    /// the record with `now` as first-seen time if the client is new.
    pub fn with_record<R>(
        &self,
        client: &str,
        now: Instant,
        f: impl FnOnce(&mut ClientRecord) -> R,
    ) -> R {
        let mut records = self.shard_for(client).records.lock();
        if let Some(record) = records.get_mut(client) {
            f(record)
        } else {
            let record = records
                .entry(client.to_owned())
                .or_insert_with(|| ClientRecord::new(now));
            f(record)
        }
    }

    /// Run `f` against the client's record if one exists.
    pub fn peek<R>(&self, client: &str, f: impl FnOnce(&ClientRecord) -> R) -> Option<R> {
        let records = self.shard_for(client).records.lock();
        records.get(client).map(f)
    }

    /// Release a connection slot for a client.
    ///
    /// Returns false when the client is unknown or held no slot; the count
    /// never goes below zero.
    pub fn release_connection(&self, client: &str) -> bool {
        let mut records = self.shard_for(client).records.lock();
        records
            .get_mut(client)
            .is_some_and(ClientRecord::release_connection)
    }

    /// Number of client records currently tracked.
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.records.lock().len())
            .sum()
    }

    /// Drop records idle for longer than `max_age`.
    ///
    /// Records holding open connections are kept regardless of idle time.
    pub fn evict_idle(&self, now: Instant, max_age: Duration) -> usize {
        let mut evicted = 0;
        for shard in &self.shards {
            let mut records = shard.records.lock();
            let before = records.len();
            records.retain(|_, record| {
                record.open_connections > 0 || now.duration_since(record.last_seen) <= max_age
            });
            evicted += before - records.len();
        }
        if evicted > 0 {
            debug!(evicted, "evicted idle client records");
        }
        evicted
    }

    /// Aggregate counts across all records.
    ///
    /// Shards are locked one at a time, so the result can trail concurrent
    /// updates but each record is read consistently.
    #[must_use]
    pub fn totals(&self) -> StoreTotals {
        let mut totals = StoreTotals {
            clients: 0,
            open_connections: 0,
            offenders: 0,
        };
        for shard in &self.shards {
            let records = shard.records.lock();
            totals.clients += records.len();
            for record in records.values() {
                totals.open_connections += u64::from(record.open_connections);
                if record.blocked_requests > 0 {
                    totals.offenders += 1;
                }
            }
        }
        totals
    }
}
