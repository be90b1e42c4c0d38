//! Charging network entity

use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::status::{
    AdminStatus, ChargingStatus, History, StatusChannel, TimelineSettings, Timestamped, WriteMode,
};
use crate::shared::{DomainResult, SharedClock};

/// Opaque, totally ordered entity identifier
pub trait EntityKey: Clone + Eq + Ord + Hash + Debug + Display + Send + Sync + 'static {}

impl<T> EntityKey for T where T: Clone + Eq + Ord + Hash + Debug + Display + Send + Sync + 'static {}

/// Containment level, leaf first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    ChargePoint,
    Station,
    Site,
    Operator,
    Network,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChargePoint => "ChargePoint",
            Self::Station => "Station",
            Self::Site => "Site",
            Self::Operator => "Operator",
            Self::Network => "Network",
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entity of the network with its two status channels
pub struct Entity<K> {
    id: K,
    kind: EntityKind,
    status: Arc<StatusChannel<K, ChargingStatus>>,
    admin_status: Arc<StatusChannel<K, AdminStatus>>,
    created_at: DateTime<Utc>,
}

pub type SharedEntity<K> = Arc<Entity<K>>;

impl<K: EntityKey> Entity<K> {
    /// Both channels start with the given values, stamped with the clock's now.
    pub fn new(
        id: K,
        kind: EntityKind,
        status: ChargingStatus,
        admin_status: AdminStatus,
        settings: TimelineSettings,
        clock: SharedClock,
    ) -> Self {
        let created_at = clock.now();
        Self {
            status: Arc::new(StatusChannel::with_initial(
                id.clone(),
                "status",
                Timestamped::new(created_at, status),
                settings,
                clock.clone(),
            )),
            admin_status: Arc::new(StatusChannel::with_initial(
                id.clone(),
                "admin_status",
                Timestamped::new(created_at, admin_status),
                settings,
                clock,
            )),
            id,
            kind,
            created_at,
        }
    }

    pub fn id(&self) -> &K {
        &self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Operational status channel; aggregation and event forwarding subscribe here.
    pub fn status_channel(&self) -> &Arc<StatusChannel<K, ChargingStatus>> {
        &self.status
    }

    /// Administrative status channel.
    pub fn admin_status_channel(&self) -> &Arc<StatusChannel<K, AdminStatus>> {
        &self.admin_status
    }

    // ── Operational status ─────────────────────────────────────

    /// Write `status` stamped with the clock's now.
    pub fn set_status(&self, status: ChargingStatus, mode: WriteMode) -> DomainResult<()> {
        self.status.set_status(status, mode)
    }

    /// Write `status` at an explicit timestamp, possibly older than the head.
    pub fn set_status_at(
        &self,
        status: ChargingStatus,
        timestamp: DateTime<Utc>,
        mode: WriteMode,
    ) -> DomainResult<()> {
        self.status.set_status_at(status, timestamp, mode)
    }

    /// Head of the operational timeline.
    pub fn current_status(&self) -> DomainResult<Timestamped<ChargingStatus>> {
        self.status.current_status()
    }

    /// Up to `limit` operational entries, newest first.
    pub fn status_history(&self, limit: usize) -> History<ChargingStatus> {
        self.status.history(limit)
    }

    // ── Administrative status ──────────────────────────────────

    /// Write `status` stamped with the clock's now.
    pub fn set_admin_status(&self, status: AdminStatus, mode: WriteMode) -> DomainResult<()> {
        self.admin_status.set_status(status, mode)
    }

    pub fn set_admin_status_at(
        &self,
        status: AdminStatus,
        timestamp: DateTime<Utc>,
        mode: WriteMode,
    ) -> DomainResult<()> {
        self.admin_status.set_status_at(status, timestamp, mode)
    }

    /// Head of the administrative timeline.
    pub fn current_admin_status(&self) -> DomainResult<Timestamped<AdminStatus>> {
        self.admin_status.current_status()
    }

    /// Up to `limit` administrative entries, newest first.
    pub fn admin_status_history(&self, limit: usize) -> History<AdminStatus> {
        self.admin_status.history(limit)
    }
}

impl<K: Display> Debug for Entity<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id.to_string())
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
