//! # Charging Network
//!
//! Status core for a network of EV charging infrastructure.
//!
//! ## Architecture
//!
//! - **domain**: entities, time-stamped status channels, command outcomes and events
//! - **application**: aggregation up the containment hierarchy, status reports,
//!   the entity registry and the roaming affinity router
//! - **shared**: clock and error types
//! - **config**: TOML application configuration

pub mod application;
pub mod config;
pub mod domain;
pub mod shared;

pub use config::{config_path_from_env, default_config_path, AppConfig};

pub use application::{
    create_affinity_router, create_event_bus, AffinityRouter, ChargingNetwork, Event, EventBus,
    SharedEventBus,
};
pub use domain::{
    flatten, AdminStatus, ChargingStatus, CommandResult, EntityKind, ResultKind, WriteMode,
};
pub use shared::{DomainError, DomainResult};
