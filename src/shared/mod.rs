pub mod clock;
pub mod errors;

pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use errors::{ConfigError, DomainError, DomainResult};
