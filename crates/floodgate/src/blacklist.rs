//! Temporary client blacklist with lazy expiry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::BlacklistConfig;

/// Temporary blacklist of client ids.
///
/// Entries expire by deadline rather than by sweeper: an expired entry is
/// removed the next time that client is looked up, and [`Blacklist::evict_expired`]
/// sweeps the rest during periodic maintenance. There is no background task.
#[derive(Debug)]
pub struct Blacklist {
    /// Blocked clients and their expiry deadlines.
    entries: Mutex<HashMap<String, Instant>>,
    /// Whether blacklist checks are enabled.
    enabled: bool,
}

impl Blacklist {
    /// Create an enabled blacklist.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            enabled: true,
        }
    }

    /// Create from configuration.
    #[must_use]
    pub fn from_config(config: &BlacklistConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            enabled: config.enabled,
        }
    }

    /// Block a client until the given deadline.
    ///
    /// Re-blocking an already blocked client replaces its deadline. No-op
    /// when the blacklist is disabled.
    pub fn block(&self, client: &str, until: Instant) {
        if !self.enabled {
            return;
        }
        let mut entries = self.entries.lock();
        if entries.insert(client.to_owned(), until).is_some() {
            info!(client = %client, "client re-blacklisted");
        } else {
            info!(client = %client, "client blacklisted");
        }
    }

    /// Time left on a client's block, evicting the entry if it has expired.
    ///
    /// Returns `None` when the client is not blocked. A deadline exactly
    /// equal to `now` counts as expired.
    #[must_use]
    pub fn remaining(&self, client: &str, now: Instant) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        let mut entries = self.entries.lock();
        match entries.get(client) {
            Some(&until) if now < until => Some(until - now),
            Some(_) => {
                entries.remove(client);
                debug!(client = %client, "blacklist entry expired");
                None
            }
            None => None,
        }
    }

    /// Check if a client is currently blocked.
    #[must_use]
    pub fn is_blocked(&self, client: &str, now: Instant) -> bool {
        self.remaining(client, now).is_some()
    }

    /// Remove a client's block ahead of its deadline.
    ///
    /// Returns whether an entry was present, expired or not.
    pub fn unblock(&self, client: &str) -> bool {
        let removed = self.entries.lock().remove(client).is_some();
        if removed {
            info!(client = %client, "client unblocked");
        }
        removed
    }

    /// Drop every entry, returning how many were present.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let cleared = entries.len();
        entries.clear();
        if cleared > 0 {
            info!(cleared, "blacklist cleared");
        }
        cleared
    }

    /// Sweep entries whose deadline has passed.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, until| *until > now);
        let removed = before.saturating_sub(entries.len());
        if removed > 0 {
            debug!(removed, "evicted expired blacklist entries");
        }
        removed
    }

    /// Number of clients whose blocks have not yet expired.
    #[must_use]
    pub fn blocked_count(&self, now: Instant) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|until| **until > now)
            .count()
    }

    /// Check if blacklist enforcement is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for Blacklist {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_and_check() {
        let blacklist = Blacklist::new();
        let t0 = Instant::now();

        blacklist.block("203.0.113.7", t0 + Duration::from_secs(30));

        assert!(blacklist.is_blocked("203.0.113.7", t0));
        assert!(!blacklist.is_blocked("198.51.100.2", t0));
    }

    #[test]
    fn test_expiry_boundary() {
        let blacklist = Blacklist::new();
        let t0 = Instant::now();
        let until = t0 + Duration::from_secs(30);

        blacklist.block("203.0.113.7", until);

        assert!(blacklist.is_blocked("203.0.113.7", t0 + Duration::from_secs(29)));
        // Exactly at the deadline the block is over
        assert!(!blacklist.is_blocked("203.0.113.7", until));
        assert!(!blacklist.is_blocked("203.0.113.7", t0 + Duration::from_secs(31)));
    }

    #[test]
    fn test_lookup_evicts_expired_entry() {
        let blacklist = Blacklist::new();
        let t0 = Instant::now();

        blacklist.block("203.0.113.7", t0 + Duration::from_secs(30));
        assert_eq!(blacklist.blocked_count(t0), 1);

        // Consulting after expiry removes the entry entirely
        assert!(!blacklist.is_blocked("203.0.113.7", t0 + Duration::from_secs(31)));
        assert_eq!(blacklist.clear(), 0);
    }

    #[test]
    fn test_remaining_counts_down() {
        let blacklist = Blacklist::new();
        let t0 = Instant::now();

        blacklist.block("203.0.113.7", t0 + Duration::from_secs(30));

        assert_eq!(
            blacklist.remaining("203.0.113.7", t0),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            blacklist.remaining("203.0.113.7", t0 + Duration::from_secs(12)),
            Some(Duration::from_secs(18))
        );
        assert_eq!(blacklist.remaining("203.0.113.7", t0 + Duration::from_secs(30)), None);
    }

    #[test]
    fn test_reblock_replaces_deadline() {
        let blacklist = Blacklist::new();
        let t0 = Instant::now();

        blacklist.block("203.0.113.7", t0 + Duration::from_secs(10));
        blacklist.block("203.0.113.7", t0 + Duration::from_secs(60));

        assert!(blacklist.is_blocked("203.0.113.7", t0 + Duration::from_secs(30)));
    }

    #[test]
    fn test_unblock() {
        let blacklist = Blacklist::new();
        let t0 = Instant::now();

        blacklist.block("203.0.113.7", t0 + Duration::from_secs(30));

        assert!(blacklist.unblock("203.0.113.7"));
        assert!(!blacklist.is_blocked("203.0.113.7", t0));
        // Second unblock has nothing to remove
        assert!(!blacklist.unblock("203.0.113.7"));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let blacklist = Blacklist::new();
        let t0 = Instant::now();

        blacklist.block("203.0.113.7", t0 + Duration::from_secs(30));
        blacklist.block("198.51.100.2", t0 + Duration::from_secs(30));

        assert_eq!(blacklist.clear(), 2);
        assert_eq!(blacklist.clear(), 0);
    }

    #[test]
    fn test_evict_expired_sweeps_only_past_deadlines() {
        let blacklist = Blacklist::new();
        let t0 = Instant::now();

        blacklist.block("a", t0 + Duration::from_secs(10));
        blacklist.block("b", t0 + Duration::from_secs(20));
        blacklist.block("c", t0 + Duration::from_secs(30));

        assert_eq!(blacklist.evict_expired(t0 + Duration::from_secs(25)), 2);
        assert_eq!(blacklist.blocked_count(t0 + Duration::from_secs(25)), 1);
        assert!(blacklist.is_blocked("c", t0 + Duration::from_secs(25)));
    }

    #[test]
    fn test_disabled_blacklist_never_blocks() {
        let blacklist = Blacklist::from_config(&BlacklistConfig { enabled: false });
        let t0 = Instant::now();

        blacklist.block("203.0.113.7", t0 + Duration::from_secs(30));

        assert!(!blacklist.is_blocked("203.0.113.7", t0));
        assert_eq!(blacklist.blocked_count(t0), 0);
    }
}
