//! Time-stamped status channels
//!
//! Every entity carries two independent channels (operational and
//! administrative), each backed by a bounded [`StatusTimeline`].

pub mod channel;
pub mod model;
pub mod timeline;

pub use channel::{ListenerId, SharedStatusListener, StatusChange, StatusChannel, StatusListener};
pub use model::{
    AdminStatus, BackfillPolicy, ChargingStatus, StatusValue, TimestampResolution, Timestamped,
    WriteMode,
};
pub use timeline::{History, StatusTimeline, TimelineSettings, DEFAULT_RETENTION};
