//! Unified admission control pipeline.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::blacklist::Blacklist;
use crate::config::AdmissionConfig;
use crate::error::{AdmissionError, AdmissionResult};
use crate::events::{BlockEvent, EventLog, StatsSnapshot};
use crate::rate_limit::RatePolicy;
use crate::shaper::LoadShaper;
use crate::store::{ClientRecord, ClientStore};
use crate::threat::{classify, ClientReport, ThreatLevel};
use crate::validate::{RequestMetadata, RequestValidator};

/// Which check rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The client is on the temporary blacklist.
    Blacklist,
    /// The client has too many connections open.
    ConnectionLimit,
    /// The client exceeded its request budget for the window.
    RateLimit,
    /// The request failed structural validation.
    InvalidRequest,
}

impl RejectReason {
    /// Stable label for serialization and log fields.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Blacklist => "blacklist",
            Self::ConnectionLimit => "connection_limit",
            Self::RateLimit => "rate_limit",
            Self::InvalidRequest => "invalid_request",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an admission decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Serve the request after the given delay (zero under light load).
    Admit {
        /// Load shaping delay to apply before serving.
        delay: Duration,
    },
    /// Refuse the request.
    Reject {
        /// Which check failed.
        reason: RejectReason,
    },
}

impl Verdict {
    /// Check if the request was admitted.
    #[must_use]
    pub const fn is_admitted(&self) -> bool {
        matches!(self, Self::Admit { .. })
    }

    /// Check if the request was rejected.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Reject { .. })
    }

    /// The shaping delay. Rejected requests pay none.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        match self {
            Self::Admit { delay } => *delay,
            Self::Reject { .. } => Duration::ZERO,
        }
    }

    /// Sleep out the shaping delay of an admitted verdict.
    ///
    /// Returns immediately for rejections or a zero delay. Call this
    /// outside any lock, which is everywhere: the decision that produced
    /// the verdict has already released its locks.
    pub async fn apply_delay(&self) {
        if let Self::Admit { delay } = self {
            if !delay.is_zero() {
                tokio::time::sleep(*delay).await;
            }
        }
    }
}

/// Holds one admitted request's connection slot, releasing it on drop.
///
/// Obtained from [`AdmissionControl::decide_scoped`]. Dropping the permit
/// releases the slot even when the task handling the request is cancelled
/// mid-flight.
#[must_use = "dropping the permit immediately releases the connection slot"]
pub struct ConnectionPermit<'a> {
    control: &'a AdmissionControl,
    client_id: String,
    released: bool,
}

impl ConnectionPermit<'_> {
    /// The client this permit belongs to.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Release the slot now instead of at the end of scope.
    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if !self.released {
            self.released = true;
            self.control.on_connection_closed(&self.client_id);
        }
    }
}

impl Drop for ConnectionPermit<'_> {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for ConnectionPermit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPermit")
            .field("client_id", &self.client_id)
            .field("released", &self.released)
            .finish()
    }
}

/// Outcome of a scoped admission decision.
#[derive(Debug)]
pub enum ScopedVerdict<'a> {
    /// Serve the request after the given delay, holding `permit` while it runs.
    Admit {
        /// Load shaping delay to apply before serving.
        delay: Duration,
        /// Guard for the request's connection slot.
        permit: ConnectionPermit<'a>,
    },
    /// Refuse the request. No slot is held.
    Reject {
        /// Which check failed.
        reason: RejectReason,
    },
}

impl<'a> ScopedVerdict<'a> {
    /// Check if the request was admitted.
    #[must_use]
    pub const fn is_admitted(&self) -> bool {
        matches!(self, Self::Admit { .. })
    }

    /// Take the permit out of an admitted verdict.
    #[must_use]
    pub fn into_permit(self) -> Option<ConnectionPermit<'a>> {
        match self {
            Self::Admit { permit, .. } => Some(permit),
            Self::Reject { .. } => None,
        }
    }
}

/// Admission control for one service: every request passes through
/// [`AdmissionControl::decide`] before any work is done for it.
///
/// All state lives in memory and all public methods take `&self`; share
/// one instance across tasks with [`Arc`].
#[derive(Debug)]
pub struct AdmissionControl {
    /// Configuration.
    config: AdmissionConfig,
    /// Per-client records behind sharded locks.
    store: ClientStore,
    /// Temporary blacklist.
    blacklist: Blacklist,
    /// Structural request validation.
    validator: RequestValidator,
    /// Load-adaptive delays.
    shaper: LoadShaper,
    /// Counters and recent block events.
    events: EventLog,
}

impl AdmissionControl {
    /// Create a controller after validating the configuration.
    ///
    /// # Errors
    ///
    /// Returns `AdmissionError::InvalidConfig` when the configuration is
    /// unusable, e.g. a zero-length window.
    pub fn new(config: AdmissionConfig) -> AdmissionResult<Self> {
        config.validate()?;
        Ok(Self::from_parts(config))
    }

    /// Create a controller with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::from_parts(AdmissionConfig::default())
    }

    fn from_parts(config: AdmissionConfig) -> Self {
        let store = ClientStore::new(config.store.shards);
        let blacklist = Blacklist::from_config(&config.blacklist);
        let validator = RequestValidator::from_config(&config.validation);
        let shaper = LoadShaper::from_config(&config.load_shaping);
        let events = EventLog::from_config(&config.events);

        Self {
            config,
            store,
            blacklist,
            validator,
            shaper,
            events,
        }
    }

    // ==================== Decision Pipeline ====================

    /// Decide whether to admit one request observed at `now`.
    ///
    /// Checks run in a fixed order and the first failure decides the
    /// rejection reason:
    /// 1. Blacklist
    /// 2. Connection limit
    /// 3. Rate limit (a violation also blacklists the client)
    /// 4. Validation
    ///
    /// An admitted request holds one connection slot until
    /// [`Self::on_connection_closed`] is called for it, exactly once.
    /// Prefer [`Self::decide_scoped`] where cancellation could skip that
    /// call. The returned delay is not slept here; apply it with
    /// [`Verdict::apply_delay`] before serving.
    ///
    /// # Errors
    ///
    /// Rejections are ordinary [`Verdict::Reject`] values, not errors.
    /// `Err` is reserved for internal faults; callers that cannot tell the
    /// difference should treat one as a rejection and fail closed.
    pub fn decide(
        &self,
        client_id: &str,
        now: Instant,
        meta: &RequestMetadata,
    ) -> AdmissionResult<Verdict> {
        let blacklisted_for = self.blacklist.remaining(client_id, now);
        let policy = self.config.rate_limit.policy_for(meta.class);

        let (checked, total) = self.store.with_record(client_id, now, |record| {
            let checked = self.run_checks(record, client_id, now, meta, blacklisted_for, &policy);
            (checked, record.total_requests())
        });

        match checked {
            Ok(()) => {
                let delay = self.shaper.record_and_delay(now);
                self.events.record_admit();
                debug!(
                    client = %client_id,
                    delay_ms = delay.as_millis() as u64,
                    "request admitted"
                );
                Ok(Verdict::Admit { delay })
            }
            Err(err) => self.reject(client_id, now, meta, err, total),
        }
    }

    /// Like [`Self::decide`], but an admission carries a [`ConnectionPermit`]
    /// that releases the connection slot when dropped.
    ///
    /// # Errors
    ///
    /// As for [`Self::decide`].
    pub fn decide_scoped<'a>(
        &'a self,
        client_id: &str,
        now: Instant,
        meta: &RequestMetadata,
    ) -> AdmissionResult<ScopedVerdict<'a>> {
        match self.decide(client_id, now, meta)? {
            Verdict::Admit { delay } => Ok(ScopedVerdict::Admit {
                delay,
                permit: ConnectionPermit {
                    control: self,
                    client_id: client_id.to_owned(),
                    released: false,
                },
            }),
            Verdict::Reject { reason } => Ok(ScopedVerdict::Reject { reason }),
        }
    }

    /// Per-client checks, all under the client's shard lock so that
    /// concurrent decisions for one client cannot interleave between a
    /// read and its matching update.
    fn run_checks(
        &self,
        record: &mut ClientRecord,
        client_id: &str,
        now: Instant,
        meta: &RequestMetadata,
        blacklisted_for: Option<Duration>,
        policy: &RatePolicy,
    ) -> AdmissionResult<()> {
        record.note_request(now, meta.identifier.as_deref(), meta.path.as_deref(), &self.config.store);

        if let Some(remaining) = blacklisted_for {
            record.note_blocked();
            return Err(AdmissionError::Blacklisted {
                client: client_id.to_owned(),
                remaining,
            });
        }

        let limit = self.config.connection.limit();
        if !record.try_acquire_connection(limit) {
            record.note_blocked();
            return Err(AdmissionError::ConnectionLimitExceeded {
                client: client_id.to_owned(),
                current: record.open_connections(),
                max: limit,
            });
        }

        if self.config.rate_limit.enabled {
            let (allowed, count) = record.check_rate(now, policy);
            if !allowed {
                record.release_connection();
                record.note_blocked();
                return Err(AdmissionError::RateLimitExceeded {
                    client: client_id.to_owned(),
                    count,
                    max: policy.max_requests,
                });
            }
        }

        if !self.validator.validate(meta) {
            record.release_connection();
            record.note_blocked();
            return Err(AdmissionError::InvalidRequest {
                client: client_id.to_owned(),
                reason: "missing or implausible identifier".into(),
            });
        }

        Ok(())
    }

    /// Translate a check failure into a verdict, with its side effects:
    /// rate violations blacklist the client, and every rejection is
    /// counted and logged.
    fn reject(
        &self,
        client_id: &str,
        now: Instant,
        meta: &RequestMetadata,
        err: AdmissionError,
        total_from_client: u64,
    ) -> AdmissionResult<Verdict> {
        let reason = match &err {
            AdmissionError::Blacklisted { .. } => RejectReason::Blacklist,
            AdmissionError::ConnectionLimitExceeded { .. } => RejectReason::ConnectionLimit,
            AdmissionError::RateLimitExceeded { count, max, .. } => {
                self.blacklist
                    .block(client_id, now + self.config.rate_limit.block_duration);
                warn!(
                    client = %client_id,
                    count = *count,
                    max = *max,
                    "rate limit exceeded, client blacklisted"
                );
                RejectReason::RateLimit
            }
            AdmissionError::InvalidRequest { .. } => RejectReason::InvalidRequest,
            AdmissionError::InvalidConfig(_) | AdmissionError::Internal(_) => return Err(err),
        };

        let detail = Self::detail_for(&err, meta);
        self.events
            .record_block(BlockEvent::new(client_id, reason, detail, total_from_client));
        debug!(client = %client_id, reason = %reason, "request rejected");
        Ok(Verdict::Reject { reason })
    }

    fn detail_for(err: &AdmissionError, meta: &RequestMetadata) -> String {
        let path = meta.path.as_deref().unwrap_or("-");
        match err {
            AdmissionError::Blacklisted { remaining, .. } => format!(
                "blacklisted for another {}s, requested {path}",
                remaining.as_secs()
            ),
            AdmissionError::ConnectionLimitExceeded { current, max, .. } => {
                format!("{current}/{max} concurrent connections")
            }
            AdmissionError::RateLimitExceeded { count, .. } => {
                format!("{count} requests in window, requested {path}")
            }
            AdmissionError::InvalidRequest { reason, .. } => format!("{reason}, requested {path}"),
            AdmissionError::InvalidConfig(_) | AdmissionError::Internal(_) => err.to_string(),
        }
    }

    // ==================== Connection Lifecycle ====================

    /// Release the connection slot of an admitted request.
    ///
    /// Must be called exactly once per admission that was not handed a
    /// [`ConnectionPermit`]. A release with no matching admission is
    /// ignored; the count never goes below zero.
    pub fn on_connection_closed(&self, client_id: &str) {
        if !self.store.release_connection(client_id) {
            warn!(client = %client_id, "connection close without matching admission");
        }
    }

    // ==================== Administration ====================

    /// Drop every blacklist entry, returning how many were present.
    ///
    /// Idempotent: a second call returns zero.
    pub fn admin_clear_blacklist(&self) -> usize {
        self.blacklist.clear()
    }

    /// Remove one client's blacklist entry ahead of its deadline.
    ///
    /// Returns whether an entry was present.
    pub fn admin_unblock(&self, client_id: &str) -> bool {
        self.blacklist.unblock(client_id)
    }

    // ==================== Statistics ====================

    /// Aggregate statistics as observed at `now`.
    #[must_use]
    pub fn snapshot(&self, now: Instant) -> StatsSnapshot {
        let (admitted, blocked, reasons) = self.events.counters();
        let totals = self.store.totals();
        StatsSnapshot {
            admitted,
            blocked,
            reasons,
            blacklisted: self.blacklist.blocked_count(now),
            open_connections: totals.open_connections,
            tracked_clients: totals.clients,
            offenders: totals.offenders,
            admitted_rate: self.shaper.current_rate(now),
        }
    }

    /// The most recent block events, oldest first, at most `limit` of them.
    #[must_use]
    pub fn recent_blocks(&self, limit: usize) -> Vec<BlockEvent> {
        self.events.recent_blocks(limit)
    }

    /// Summary of one client's history, or `None` for an unknown client.
    #[must_use]
    pub fn client_report(&self, client_id: &str, now: Instant) -> Option<ClientReport> {
        self.store
            .peek(client_id, |record| ClientReport::from_record(client_id, record, now))
    }

    /// Threat classification for one client, or `None` for an unknown client.
    #[must_use]
    pub fn threat_level(&self, client_id: &str, now: Instant) -> Option<ThreatLevel> {
        self.store.peek(client_id, |record| classify(record, now))
    }

    // ==================== Maintenance ====================

    /// Drop idle client records and expired blacklist entries.
    ///
    /// Returns the number of client records evicted. Records with open
    /// connections are kept regardless of idle time.
    pub fn cleanup(&self, now: Instant) -> usize {
        self.blacklist.evict_expired(now);
        self.store
            .evict_idle(now, self.config.store.idle_eviction_age)
    }

    /// Run [`Self::cleanup`] every `period` until the task is aborted.
    ///
    /// Spawn this on the runtime and keep the handle to stop it:
    ///
    /// ```ignore
    /// let handle = tokio::spawn(Arc::clone(&control).run_maintenance(period));
    /// ```
    pub async fn run_maintenance(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.cleanup(Instant::now());
        }
    }

    // ==================== Component Access ====================

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Get a reference to the blacklist.
    #[must_use]
    pub const fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    /// Get a reference to the event log.
    #[must_use]
    pub const fn event_log(&self) -> &EventLog {
        &self.events
    }
}

impl Default for AdmissionControl {
    fn default() -> Self {
        Self::with_defaults()
    }
}
