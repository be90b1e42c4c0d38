//! Command outcomes and their reconciliation
//!
//! A command sent to several targets produces one [`CommandResult`] per
//! target; [`flatten`] reduces them to one verdict.

pub mod command_result;
pub mod flatten;
pub mod kind;

pub use command_result::{CommandResult, Warning};
pub use flatten::{flatten, FlattenedResult};
pub use kind::ResultKind;
