//! Application events (pub/sub)
//!
//! Event types are defined in `domain::events`. The broadcast `EventBus`
//! and the listener that feeds it from status channels live here.

pub mod event_bus;
pub mod forwarder;

pub use crate::domain::events::types;
pub use crate::domain::events::types::*;

pub use event_bus::{create_event_bus, EventBus, EventSubscriber, SharedEventBus};
pub use forwarder::StatusEventForwarder;
