//! Concurrency wrapper around a [`StatusTimeline`]
//!
//! Writes are serialised per channel and publish a fresh immutable snapshot;
//! readers clone the snapshot `Arc` and never block on a writer that is busy
//! notifying listeners. Listeners run synchronously on the writer's stack, in
//! registration order, while the writer still holds the channel, so a single
//! entity's changes are observed in application order.

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, warn};

use super::model::{StatusValue, Timestamped, WriteMode};
use super::timeline::{History, StatusTimeline, TimelineSettings};
use crate::shared::{DomainResult, SharedClock};

/// Message delivered to listeners when the current value of a channel changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange<K, V> {
    pub timestamp: DateTime<Utc>,
    pub entity_id: K,
    pub old_status: V,
    pub new_status: V,
}

/// Synchronous observer of a status channel.
///
/// An error returned here is handed back to the caller of the write that
/// caused the change; the write itself stays applied.
pub trait StatusListener<K, V>: Send + Sync {
    fn on_status_changed(&self, change: &StatusChange<K, V>) -> DomainResult<()>;
}

impl<K, V, F> StatusListener<K, V> for F
where
    F: Fn(&StatusChange<K, V>) -> DomainResult<()> + Send + Sync,
{
    fn on_status_changed(&self, change: &StatusChange<K, V>) -> DomainResult<()> {
        self(change)
    }
}

pub type SharedStatusListener<K, V> = Arc<dyn StatusListener<K, V>>;

/// Handle returned by [`StatusChannel::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

pub struct StatusChannel<K, V> {
    entity_id: K,
    name: &'static str,
    snapshot: RwLock<Arc<StatusTimeline<V>>>,
    writer: Mutex<()>,
    listeners: RwLock<Vec<(ListenerId, SharedStatusListener<K, V>)>>,
    next_listener_id: AtomicU64,
    clock: SharedClock,
}

impl<K, V> StatusChannel<K, V>
where
    K: Clone + Display + Send + Sync,
    V: StatusValue,
{
    /// Create a channel whose first entry is stamped with the clock's now.
    pub fn new(
        entity_id: K,
        name: &'static str,
        initial: V,
        settings: TimelineSettings,
        clock: SharedClock,
    ) -> Self {
        let initial = Timestamped::new(clock.now(), initial);
        Self::with_initial(entity_id, name, initial, settings, clock)
    }

    pub fn with_initial(
        entity_id: K,
        name: &'static str,
        initial: Timestamped<V>,
        settings: TimelineSettings,
        clock: SharedClock,
    ) -> Self {
        Self {
            entity_id,
            name,
            snapshot: RwLock::new(Arc::new(StatusTimeline::new(initial, settings))),
            writer: Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            clock,
        }
    }

    pub fn entity_id(&self) -> &K {
        &self.entity_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Set the status, stamped with the clock's now.
    pub fn set_status(&self, value: V, mode: WriteMode) -> DomainResult<()> {
        let now = self.clock.now();
        self.set_status_at(value, now, mode)
    }

    pub fn set_status_at(
        &self,
        value: V,
        timestamp: DateTime<Utc>,
        mode: WriteMode,
    ) -> DomainResult<()> {
        let _writer = self.writer.lock();
        self.apply(Timestamped::new(timestamp, value), mode)
    }

    /// Apply several writes in the given order under one writer turn.
    ///
    /// Every item is applied even if a listener fails on an earlier one; the
    /// first listener error is returned.
    pub fn set_statuses<I>(&self, values: I, mode: WriteMode) -> DomainResult<()>
    where
        I: IntoIterator<Item = Timestamped<V>>,
    {
        let _writer = self.writer.lock();
        let mut first_error = None;
        for entry in values {
            if let Err(e) = self.apply(entry, mode) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn current_status(&self) -> DomainResult<Timestamped<V>> {
        self.snapshot.read().current().cloned()
    }

    pub fn history(&self, limit: usize) -> History<V> {
        History::new(self.snapshot(), limit)
    }

    /// Immutable view of the whole timeline as of now
    pub fn snapshot(&self) -> Arc<StatusTimeline<V>> {
        self.snapshot.read().clone()
    }

    pub fn subscribe(&self, listener: SharedStatusListener<K, V>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.write().push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let len_before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() < len_before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Caller must hold `self.writer`.
    fn apply(&self, entry: Timestamped<V>, mode: WriteMode) -> DomainResult<()> {
        let current = self.snapshot();
        let previous = current.current().ok().cloned();

        let mut next = StatusTimeline::clone(&current);
        next.insert(entry, mode);
        let head = next.current()?.clone();
        *self.snapshot.write() = Arc::new(next);

        metrics::counter!("status_writes_total", "channel" => self.name).increment(1);

        match previous {
            Some(previous) if previous.value != head.value => {
                debug!(
                    entity_id = %self.entity_id,
                    channel = self.name,
                    old = %previous.value,
                    new = %head.value,
                    "Status changed"
                );
                self.notify(&StatusChange {
                    timestamp: head.timestamp,
                    entity_id: self.entity_id.clone(),
                    old_status: previous.value,
                    new_status: head.value,
                })
            }
            _ => Ok(()),
        }
    }

    fn notify(&self, change: &StatusChange<K, V>) -> DomainResult<()> {
        let listeners: Vec<_> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        let mut first_error = None;
        for listener in listeners {
            if let Err(e) = listener.on_status_changed(change) {
                warn!(
                    entity_id = %self.entity_id,
                    channel = self.name,
                    error = %e,
                    "Status listener failed"
                );
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl<K: Display, V> std::fmt::Debug for StatusChannel<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusChannel")
            .field("entity_id", &self.entity_id.to_string())
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
