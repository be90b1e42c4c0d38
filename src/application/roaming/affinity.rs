//! Session → backend affinity cache
//!
//! Remembers which backend authorized a session so that stop and charge
//! detail record requests go there first. Entries are hints: they expire
//! after the TTL and the oldest entry is evicted once the cache is full.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use super::backend::{BackendId, SessionId};

pub const DEFAULT_AFFINITY_CAPACITY: usize = 10_000;

#[derive(Debug, Clone)]
struct AffinityEntry {
    backend_id: BackendId,
    authorized_at: DateTime<Utc>,
}

/// Not synchronised; the router keeps it behind its own lock.
#[derive(Debug)]
pub struct AffinityCache {
    entries: HashMap<SessionId, AffinityEntry>,
    ttl: Option<Duration>,
    capacity: usize,
}

impl AffinityCache {
    /// `ttl = None` keeps entries until they are evicted or cleared.
    pub fn new(ttl: Option<Duration>, capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    fn is_expired(&self, entry: &AffinityEntry, now: DateTime<Utc>) -> bool {
        self.ttl
            .map_or(false, |ttl| now - entry.authorized_at >= ttl)
    }

    /// Record `backend_id` for `session_id`, replacing any previous entry.
    pub fn insert(&mut self, session_id: SessionId, backend_id: BackendId, now: DateTime<Utc>) {
        if !self.entries.contains_key(&session_id) && self.entries.len() >= self.capacity {
            self.purge_expired(now);
            if self.entries.len() >= self.capacity {
                self.evict_oldest();
            }
        }
        self.entries.insert(
            session_id,
            AffinityEntry {
                backend_id,
                authorized_at: now,
            },
        );
    }

    /// Cached backend for `session_id`; an expired entry is dropped.
    pub fn get(&mut self, session_id: &SessionId, now: DateTime<Utc>) -> Option<BackendId> {
        let expired = self.is_expired(self.entries.get(session_id)?, now);
        if expired {
            self.entries.remove(session_id);
            return None;
        }
        self.entries.get(session_id).map(|e| e.backend_id.clone())
    }

    pub fn remove(&mut self, session_id: &SessionId) -> Option<BackendId> {
        self.entries.remove(session_id).map(|e| e.backend_id)
    }

    /// Drop every entry pointing at `backend_id`; returns how many were removed.
    pub fn remove_backend(&mut self, backend_id: &BackendId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| &e.backend_id != backend_id);
        before - self.entries.len()
    }

    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let before = self.entries.len();
        self.entries.retain(|_, e| now - e.authorized_at < ttl);
        before - self.entries.len()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.authorized_at)
            .map(|(session_id, _)| session_id.clone());
        if let Some(session_id) = oldest {
            self.entries.remove(&session_id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for AffinityCache {
    fn default() -> Self {
        Self::new(None, DEFAULT_AFFINITY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn entries_expire_after_ttl() {
        let mut cache = AffinityCache::new(Some(Duration::minutes(10)), 16);
        let session = SessionId::new("S1");
        cache.insert(session.clone(), BackendId::new("B1"), t0());

        assert_eq!(
            cache.get(&session, t0() + Duration::minutes(9)),
            Some(BackendId::new("B1"))
        );
        assert_eq!(cache.get(&session, t0() + Duration::minutes(10)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn full_cache_evicts_oldest() {
        let mut cache = AffinityCache::new(None, 2);
        cache.insert(SessionId::new("S1"), BackendId::new("B1"), t0());
        cache.insert(SessionId::new("S2"), BackendId::new("B1"), t0() + Duration::seconds(1));
        cache.insert(SessionId::new("S3"), BackendId::new("B2"), t0() + Duration::seconds(2));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&SessionId::new("S1"), t0()), None);
        assert!(cache.get(&SessionId::new("S3"), t0()).is_some());
    }

    #[test]
    fn reinserting_does_not_evict() {
        let mut cache = AffinityCache::new(None, 1);
        cache.insert(SessionId::new("S1"), BackendId::new("B1"), t0());
        cache.insert(SessionId::new("S1"), BackendId::new("B2"), t0());

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&SessionId::new("S1"), t0()), Some(BackendId::new("B2")));
    }

    #[test]
    fn remove_backend_drops_its_sessions() {
        let mut cache = AffinityCache::default();
        cache.insert(SessionId::new("S1"), BackendId::new("B1"), t0());
        cache.insert(SessionId::new("S2"), BackendId::new("B2"), t0());
        cache.insert(SessionId::new("S3"), BackendId::new("B1"), t0());

        assert_eq!(cache.remove_backend(&BackendId::new("B1")), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.remove(&SessionId::new("S2")), Some(BackendId::new("B2")));
    }
}
