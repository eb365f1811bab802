//! Presence tracking.
//!
//! A best-effort heartbeat signal: online reports are coalesced per user, a
//! background task re-asserts online while the client is active, and lookups
//! go through a TTL cache invalidated by the store's presence change feed.
//! Presence failures are logged and swallowed; they never block anything.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::config::PresenceConfig;
use crate::domain::repository::ClientContext;
use crate::infrastructure::presence_cache::PresenceCache;

/// Client visibility transition, as reported by the host UI.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    Foreground,
    Background,
}

pub struct PresenceTracker {
    ctx: Arc<ClientContext>,
    config: PresenceConfig,
    cache: PresenceCache,
    last_report: DashMap<String, Instant>,
    // Heartbeat gate: while the client is backgrounded the heartbeat must not
    // re-assert online over the offline report.
    foregrounded: AtomicBool,
}

impl PresenceTracker {
    pub fn new(ctx: Arc<ClientContext>, config: PresenceConfig) -> Arc<Self> {
        let cache = PresenceCache::new(config.cache_ttl_secs, config.cache_max_entries);
        Arc::new(Self {
            ctx,
            config,
            cache,
            last_report: DashMap::new(),
            foregrounded: AtomicBool::new(true),
        })
    }

    /// Report the user online. Calls are coalesced to at most one store write
    /// per user per throttle window; excess calls are dropped silently. The
    /// throttle stamp is only recorded after a successful write, so a failed
    /// report does not suppress the next one.
    pub async fn report_online(&self, user_id: &str) {
        if !self.throttle_allows(user_id) {
            return;
        }
        if self.write_presence(user_id, true).await {
            self.stamp(user_id);
        }
    }

    /// Immediate offline report, not subject to the throttle. Clears the
    /// throttle stamp so a following online report goes straight through.
    pub async fn report_offline(&self, user_id: &str) {
        self.last_report.remove(user_id);
        self.write_presence(user_id, false).await;
    }

    /// Visibility transitions are discrete user-visible events, not polling
    /// noise, so they bypass the throttle in both directions. They also flip
    /// the heartbeat gate: a backgrounded client stays offline until it comes
    /// back to the foreground.
    pub async fn visibility_changed(&self, user_id: &str, visibility: Visibility) {
        match visibility {
            Visibility::Foreground => {
                self.foregrounded.store(true, Ordering::Relaxed);
                if self.write_presence(user_id, true).await {
                    self.stamp(user_id);
                }
            }
            Visibility::Background => {
                self.foregrounded.store(false, Ordering::Relaxed);
                self.last_report.remove(user_id);
                self.write_presence(user_id, false).await;
            }
        }
    }

    /// A user is online if their last_seen_at falls within the recency
    /// window. The stored boolean is only a hint; lookup failures report
    /// offline.
    pub async fn is_online(&self, user_id: &str) -> bool {
        let now = Utc::now();
        if let Some(record) = self.cache.get(user_id).await {
            return record.is_recent(self.config.online_recency_secs, now);
        }

        match self.ctx.presence.presence(user_id).await {
            Ok(Some(record)) => {
                let online = record.is_recent(self.config.online_recency_secs, now);
                self.cache.set(record).await;
                online
            }
            Ok(None) => false,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "presence lookup failed");
                false
            }
        }
    }

    /// Re-assert the context user online on the heartbeat cadence while the
    /// client is foregrounded, until the shutdown signal flips, then report
    /// offline once on the way out. Ticks while backgrounded are skipped.
    pub fn spawn_heartbeat(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tracker.config.heartbeat_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !tracker.foregrounded.load(Ordering::Relaxed) {
                            continue;
                        }
                        let user_id = tracker.ctx.user_id.clone();
                        if tracker.write_presence(&user_id, true).await {
                            tracker.stamp(&user_id);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            let user_id = tracker.ctx.user_id.clone();
                            tracker.write_presence(&user_id, false).await;
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Invalidate cached lookups when the store reports presence row changes.
    pub fn spawn_cache_invalidation(self: &Arc<Self>) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        let mut changes = tracker.ctx.presence.subscribe_changes();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => tracker.cache.invalidate(&change.user_id).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "presence change feed lagged, clearing cache");
                        tracker.cache.clear().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn write_presence(&self, user_id: &str, is_online: bool) -> bool {
        match self
            .ctx
            .presence
            .update_presence(user_id, is_online, Utc::now())
            .await
        {
            Ok(()) => {
                self.cache.invalidate(user_id).await;
                true
            }
            Err(err) => {
                // best-effort signal, never surfaced
                warn!(user_id = %user_id, is_online, error = %err, "presence update failed");
                false
            }
        }
    }

    fn throttle_allows(&self, user_id: &str) -> bool {
        match self.last_report.get(user_id) {
            Some(stamp) => {
                Instant::now().saturating_duration_since(*stamp) >= self.config.report_throttle()
            }
            None => true,
        }
    }

    fn stamp(&self, user_id: &str) {
        self.last_report.insert(user_id.to_string(), Instant::now());
    }
}
