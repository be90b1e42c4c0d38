//! Domain layer: entities, status channels, command outcomes and events

pub mod entity;
pub mod events;
pub mod results;
pub mod status;

// Re-export commonly used types
pub use entity::{Entity, EntityKey, EntityKind, SharedEntity};
pub use results::{flatten, CommandResult, FlattenedResult, ResultKind, Warning};
pub use status::{
    AdminStatus, BackfillPolicy, ChargingStatus, History, ListenerId, StatusChange, StatusChannel,
    StatusListener, StatusTimeline, StatusValue, TimelineSettings, TimestampResolution,
    Timestamped, WriteMode,
};

pub use crate::shared::errors::{DomainError, DomainResult};
