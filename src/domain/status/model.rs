//! Status value objects
//!
//! The variant order of [`ChargingStatus`] and [`AdminStatus`] is the total
//! order used to break aggregation ties and to order report entries. Do not
//! reorder variants.

use std::fmt::{Debug, Display};
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Anything that can be recorded on a status timeline.
pub trait StatusValue:
    Clone + Eq + Ord + Hash + Debug + Display + Send + Sync + 'static
{
}

impl<T> StatusValue for T where
    T: Clone + Eq + Ord + Hash + Debug + Display + Send + Sync + 'static
{
}

/// Operational status of any entity in the charging network
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChargingStatus {
    Available,
    Preparing,
    Charging,
    SuspendedEV,
    SuspendedEVSE,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
    /// Not currently communicating
    Offline,
    Unknown,
}

impl Default for ChargingStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl Display for ChargingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Available => "Available",
            Self::Preparing => "Preparing",
            Self::Charging => "Charging",
            Self::SuspendedEV => "SuspendedEV",
            Self::SuspendedEVSE => "SuspendedEVSE",
            Self::Finishing => "Finishing",
            Self::Reserved => "Reserved",
            Self::Unavailable => "Unavailable",
            Self::Faulted => "Faulted",
            Self::Offline => "Offline",
            Self::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

impl From<&str> for ChargingStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "available" => Self::Available,
            "preparing" => Self::Preparing,
            "charging" => Self::Charging,
            "suspendedev" => Self::SuspendedEV,
            "suspendedevse" => Self::SuspendedEVSE,
            "finishing" => Self::Finishing,
            "reserved" => Self::Reserved,
            "unavailable" => Self::Unavailable,
            "faulted" => Self::Faulted,
            "offline" => Self::Offline,
            _ => Self::Unknown,
        }
    }
}

/// Administrative (enabled/disabled) status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AdminStatus {
    Operational,
    /// Only usable by the operator's own staff
    InternalUse,
    Planned,
    OutOfService,
    Blocked,
    Deleted,
    Unknown,
}

impl Default for AdminStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl Display for AdminStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Operational => "Operational",
            Self::InternalUse => "InternalUse",
            Self::Planned => "Planned",
            Self::OutOfService => "OutOfService",
            Self::Blocked => "Blocked",
            Self::Deleted => "Deleted",
            Self::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

impl From<&str> for AdminStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "operational" => Self::Operational,
            "internaluse" => Self::InternalUse,
            "planned" => Self::Planned,
            "outofservice" => Self::OutOfService,
            "blocked" => Self::Blocked,
            "deleted" => Self::Deleted,
            _ => Self::Unknown,
        }
    }
}

/// A status value and the instant it became effective
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamped<V> {
    pub timestamp: DateTime<Utc>,
    pub value: V,
}

impl<V> Timestamped<V> {
    pub fn new(timestamp: DateTime<Utc>, value: V) -> Self {
        Self { timestamp, value }
    }
}

impl<V: Display> Display for Timestamped<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {}", self.value, self.timestamp.to_rfc3339())
    }
}

/// How a write treats an existing entry with the same truncated timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Overwrite the entry sharing the truncated timestamp
    #[default]
    Replace,
    /// Always add a new entry
    Insert,
}

/// Granularity at which two timestamps count as "the same instant"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampResolution {
    Millisecond,
    #[default]
    Second,
    Minute,
}

impl TimestampResolution {
    fn step_millis(self) -> i64 {
        match self {
            Self::Millisecond => 1,
            Self::Second => 1_000,
            Self::Minute => 60_000,
        }
    }

    pub fn truncate(self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let step = self.step_millis();
        let millis = timestamp.timestamp_millis().div_euclid(step) * step;
        DateTime::from_timestamp_millis(millis).unwrap_or(timestamp)
    }
}

/// Where a write lands when its timestamp is older than the current head
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackfillPolicy {
    /// Insert at the position matching its timestamp; the head always holds
    /// the greatest timestamp.
    #[default]
    Ordered,
    /// Always become the new head, whatever its timestamp.
    Prepend,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn total_order_follows_declaration() {
        assert!(ChargingStatus::Available < ChargingStatus::Charging);
        assert!(ChargingStatus::Charging < ChargingStatus::Faulted);
        assert!(AdminStatus::Operational < AdminStatus::OutOfService);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(ChargingStatus::from("CHARGING"), ChargingStatus::Charging);
        assert_eq!(ChargingStatus::from("bogus"), ChargingStatus::Unknown);
        assert_eq!(AdminStatus::from("internalUse"), AdminStatus::InternalUse);
    }

    #[test]
    fn truncate_drops_sub_resolution_parts() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 42).unwrap()
            + chrono::Duration::milliseconds(731);

        assert_eq!(
            TimestampResolution::Second.truncate(ts),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 42).unwrap()
        );
        assert_eq!(
            TimestampResolution::Minute.truncate(ts),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap()
        );
        assert_eq!(TimestampResolution::Millisecond.truncate(ts), ts);
    }
}
