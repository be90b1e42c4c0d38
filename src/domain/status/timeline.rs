//! Bounded, newest-first status history

use std::collections::VecDeque;
use std::sync::Arc;

use super::model::{BackfillPolicy, StatusValue, TimestampResolution, Timestamped, WriteMode};
use crate::shared::{DomainError, DomainResult};

pub const DEFAULT_RETENTION: usize = 50;

/// Tuning knobs shared by every timeline of a network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineSettings {
    /// Maximum number of retained entries (at least one)
    pub retention: usize,
    pub resolution: TimestampResolution,
    pub backfill: BackfillPolicy,
}

impl Default for TimelineSettings {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            resolution: TimestampResolution::default(),
            backfill: BackfillPolicy::default(),
        }
    }
}

/// Newest-first sequence of timestamped values.
///
/// Not synchronised; [`super::StatusChannel`] wraps it in a copy-on-write
/// snapshot.
#[derive(Debug, Clone)]
pub struct StatusTimeline<V> {
    entries: VecDeque<Timestamped<V>>,
    settings: TimelineSettings,
}

impl<V: StatusValue> StatusTimeline<V> {
    pub fn new(initial: Timestamped<V>, settings: TimelineSettings) -> Self {
        let mut timeline = Self::empty(settings);
        timeline.entries.push_front(initial);
        timeline
    }

    pub fn empty(settings: TimelineSettings) -> Self {
        Self {
            entries: VecDeque::new(),
            settings: TimelineSettings {
                retention: settings.retention.max(1),
                ..settings
            },
        }
    }

    pub fn settings(&self) -> TimelineSettings {
        self.settings
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The head entry. An empty timeline is a contract violation.
    pub fn current(&self) -> DomainResult<&Timestamped<V>> {
        self.entries
            .front()
            .ok_or_else(|| DomainError::Data("status timeline is empty".to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Timestamped<V>> {
        self.entries.iter()
    }

    /// Apply one write.
    ///
    /// In [`WriteMode::Replace`] an entry sharing the new entry's truncated
    /// timestamp is overwritten (under the ordered policy the new entry then
    /// takes its place by timestamp); [`WriteMode::Insert`] always adds. Where the
    /// entry lands when it is older than the head depends on the
    /// [`BackfillPolicy`].
    pub fn insert(&mut self, entry: Timestamped<V>, mode: WriteMode) {
        let resolution = self.settings.resolution;
        let truncated = resolution.truncate(entry.timestamp);

        match self.settings.backfill {
            BackfillPolicy::Prepend => {
                let replace_head = mode == WriteMode::Replace
                    && self
                        .entries
                        .front()
                        .is_some_and(|head| resolution.truncate(head.timestamp) == truncated);

                if replace_head {
                    self.entries[0] = entry;
                } else {
                    self.entries.push_front(entry);
                }
            }
            BackfillPolicy::Ordered => {
                if mode == WriteMode::Replace {
                    // the slot may hold several Insert duplicates; drop the closest one
                    let same_slot = self
                        .entries
                        .iter()
                        .enumerate()
                        .filter(|(_, e)| resolution.truncate(e.timestamp) == truncated)
                        .min_by_key(|(_, e)| {
                            (e.timestamp - entry.timestamp)
                                .num_microseconds()
                                .map_or(i64::MAX, i64::abs)
                        })
                        .map(|(index, _)| index);
                    if let Some(index) = same_slot {
                        self.entries.remove(index);
                    }
                }

                let index = self
                    .entries
                    .iter()
                    .position(|e| e.timestamp <= entry.timestamp)
                    .unwrap_or(self.entries.len());
                self.entries.insert(index, entry);
            }
        }

        while self.entries.len() > self.settings.retention {
            self.entries.pop_back();
        }
    }
}

/// Lazy, restartable view over a timeline snapshot, newest first.
#[derive(Debug, Clone)]
pub struct History<V> {
    snapshot: Arc<StatusTimeline<V>>,
    limit: usize,
}

impl<V: StatusValue> History<V> {
    pub(crate) fn new(snapshot: Arc<StatusTimeline<V>>, limit: usize) -> Self {
        Self { snapshot, limit }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Timestamped<V>> {
        self.snapshot.iter().take(self.limit)
    }

    pub fn len(&self) -> usize {
        self.snapshot.len().min(self.limit)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<Timestamped<V>> {
        self.iter().cloned().collect()
    }
}

impl<'a, V: StatusValue> IntoIterator for &'a History<V> {
    type Item = &'a Timestamped<V>;
    type IntoIter = std::iter::Take<std::collections::vec_deque::Iter<'a, Timestamped<V>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.snapshot.entries.iter().take(self.limit)
    }
}
