//! Status listener that republishes changes on the [`EventBus`]

use std::fmt::Display;
use std::sync::Arc;

use crate::domain::events::{Event, StatusChangedEvent};
use crate::domain::{EntityKey, EntityKind, ListenerId, SharedEntity, StatusChange, StatusListener};
use crate::shared::DomainResult;

use super::event_bus::SharedEventBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Status,
    AdminStatus,
}

/// Forwards one channel of one entity to the event bus.
///
/// Publishing never fails the write: with no subscribers the event is
/// simply dropped.
pub struct StatusEventForwarder {
    bus: SharedEventBus,
    kind: EntityKind,
    channel: Channel,
}

impl StatusEventForwarder {
    /// Subscribe forwarders to both channels of `entity`.
    pub fn attach<K: EntityKey>(
        bus: &SharedEventBus,
        entity: &SharedEntity<K>,
    ) -> (ListenerId, ListenerId) {
        let status = entity.status_channel().subscribe(Arc::new(Self {
            bus: bus.clone(),
            kind: entity.kind(),
            channel: Channel::Status,
        }));
        let admin = entity.admin_status_channel().subscribe(Arc::new(Self {
            bus: bus.clone(),
            kind: entity.kind(),
            channel: Channel::AdminStatus,
        }));
        (status, admin)
    }
}

impl<K: Display, V: Display> StatusListener<K, V> for StatusEventForwarder {
    fn on_status_changed(&self, change: &StatusChange<K, V>) -> DomainResult<()> {
        let payload = StatusChangedEvent {
            entity_id: change.entity_id.to_string(),
            entity_kind: self.kind.to_string(),
            old_status: change.old_status.to_string(),
            new_status: change.new_status.to_string(),
            timestamp: change.timestamp,
        };
        let event = match self.channel {
            Channel::Status => Event::EntityStatusChanged(payload),
            Channel::AdminStatus => Event::EntityAdminStatusChanged(payload),
        };
        self.bus.publish(event);
        Ok(())
    }
}
