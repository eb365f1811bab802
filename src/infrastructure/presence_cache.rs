//! TTL'd local cache of presence lookups, to keep `is_online` checks from
//! hammering the store. Entries are dropped on expiry, on realtime
//! invalidation, and oldest-first when the cache is full.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::model::PresenceRecord;

#[derive(Clone, Debug)]
struct CacheEntry {
    record: PresenceRecord,
    cached_at: Instant,
}

pub struct PresenceCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_size: usize,
}

impl PresenceCache {
    pub fn new(ttl_secs: u64, max_size: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(ttl_secs),
            max_size,
        }
    }

    pub async fn get(&self, user_id: &str) -> Option<PresenceRecord> {
        let entries = self.entries.read().await;
        let entry = entries.get(user_id)?;
        if entry.cached_at.elapsed() < self.ttl {
            debug!(user_id = %user_id, "presence cache hit");
            return Some(entry.record.clone());
        }
        None
    }

    pub async fn set(&self, record: PresenceRecord) {
        let mut entries = self.entries.write().await;

        if entries.len() >= self.max_size {
            Self::cleanup_expired(&mut entries, self.ttl);
        }
        if entries.len() >= self.max_size {
            Self::cleanup_oldest(&mut entries);
        }

        entries.insert(
            record.user_id.clone(),
            CacheEntry {
                record,
                cached_at: Instant::now(),
            },
        );
    }

    pub async fn invalidate(&self, user_id: &str) {
        self.entries.write().await.remove(user_id);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    fn cleanup_expired(entries: &mut HashMap<String, CacheEntry>, ttl: Duration) {
        entries.retain(|_, entry| entry.cached_at.elapsed() < ttl);
    }

    fn cleanup_oldest(entries: &mut HashMap<String, CacheEntry>) {
        if let Some(oldest) = entries
            .iter()
            .min_by_key(|(_, entry)| entry.cached_at)
            .map(|(user_id, _)| user_id.clone())
        {
            entries.remove(&oldest);
        }
    }
}
