//! Trackable entities of the charging network
//!
//! Contains the [`Entity`] type and its [`EntityKind`].

pub mod model;

pub use model::{Entity, EntityKey, EntityKind, SharedEntity};
