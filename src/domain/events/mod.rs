//! Domain events
//!
//! Event types that represent facts about what happened in the network.
//! The EventBus implementation lives in `application::events`.

pub mod types;

pub use types::{
    AuthorizationEvent, ChargeDetailRecordEvent, Event, EventMessage, StatusChangedEvent,
};
