//! Status aggregation up the containment hierarchy
//!
//! ```text
//! child write ──► child StatusChannel ──► AggregationListener
//!                                               │
//!                                     ChannelAggregator::recompute
//!                                     (aggregation fn over all children)
//!                                               │ value changed?
//!                                               ▼
//!                                  parent StatusChannel ──► ... (next level)
//! ```
//!
//! Propagation is synchronous and recursive on the writer's call stack.

pub mod functions;
pub mod tree;

pub use functions::{default_aggregator, majority, AggregationFn};
pub use tree::AggregationTree;
