//! Status histogram over a set of entities
//!
//! Wire format:
//!
//! ```json
//! {
//!   "@context": "urn:charging-network:report:ChargePoint:status",
//!   "count": 3,
//!   "report": { "Charging": { "count": 2, "percentage": 66.67 }, ... },
//!   "timestamp": "2024-01-01T00:00:00+00:00"
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use tracing::warn;

use crate::domain::{
    AdminStatus, ChargingStatus, EntityKey, EntityKind, SharedEntity, StatusValue, Timestamped,
};
use crate::shared::Clock;

/// Which status channel a report covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportChannel {
    Status,
    AdminStatus,
}

impl ReportChannel {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::AdminStatus => "adminStatus",
        }
    }
}

/// Report type URI; `kind` is `None` for mixed entity sets.
pub fn report_context(kind: Option<EntityKind>, channel: ReportChannel) -> String {
    let kind = kind.map_or("Entity", |k| k.as_str());
    format!("urn:charging-network:report:{}:{}", kind, channel.as_str())
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReportEntry<V> {
    pub value: V,
    pub count: usize,
    /// Share of the report's total, rounded to two decimals
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport<V> {
    pub context: String,
    /// Number of distinct entities counted
    pub count: usize,
    /// Ordered by descending count, then by value
    pub entries: Vec<StatusReportEntry<V>>,
    pub timestamp: DateTime<Utc>,
}

impl<V: StatusValue> StatusReport<V> {
    pub fn entry(&self, value: &V) -> Option<&StatusReportEntry<V>> {
        self.entries.iter().find(|e| &e.value == value)
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Build a report from `(entity, current status)` pairs.
///
/// An entity listed more than once is counted once, with its most recently
/// timestamped status. Empty input yields an empty report.
pub fn generate<K, V, I>(context: impl Into<String>, items: I, timestamp: DateTime<Utc>) -> StatusReport<V>
where
    K: Ord,
    V: StatusValue,
    I: IntoIterator<Item = (K, Timestamped<V>)>,
{
    let mut latest: BTreeMap<K, Timestamped<V>> = BTreeMap::new();
    for (key, status) in items {
        match latest.get(&key) {
            Some(existing) if existing.timestamp >= status.timestamp => {}
            _ => {
                latest.insert(key, status);
            }
        }
    }

    let total = latest.len();
    let mut counts: BTreeMap<V, usize> = BTreeMap::new();
    for status in latest.into_values() {
        *counts.entry(status.value).or_default() += 1;
    }

    let mut entries: Vec<_> = counts
        .into_iter()
        .map(|(value, count)| StatusReportEntry {
            value,
            count,
            percentage: round2(count as f64 / total as f64 * 100.0),
        })
        .collect();
    // stable sort keeps the ascending value order among equal counts
    entries.sort_by(|a, b| b.count.cmp(&a.count));

    StatusReport {
        context: context.into(),
        count: total,
        entries,
        timestamp,
    }
}

fn common_kind<K: EntityKey>(entities: &[SharedEntity<K>]) -> Option<EntityKind> {
    let first = entities.first()?.kind();
    entities.iter().all(|e| e.kind() == first).then_some(first)
}

/// Operational status report over `entities`.
pub fn generate_status_report<K: EntityKey>(
    entities: &[SharedEntity<K>],
    clock: &dyn Clock,
) -> StatusReport<ChargingStatus> {
    let items = entities.iter().filter_map(|entity| match entity.current_status() {
        Ok(status) => Some((entity.id().clone(), status)),
        Err(e) => {
            warn!(entity_id = %entity.id(), error = %e, "Skipping entity in status report");
            None
        }
    });
    generate(
        report_context(common_kind(entities), ReportChannel::Status),
        items,
        clock.now(),
    )
}

/// Administrative status report over `entities`.
pub fn generate_admin_status_report<K: EntityKey>(
    entities: &[SharedEntity<K>],
    clock: &dyn Clock,
) -> StatusReport<AdminStatus> {
    let items = entities
        .iter()
        .filter_map(|entity| match entity.current_admin_status() {
            Ok(status) => Some((entity.id().clone(), status)),
            Err(e) => {
                warn!(entity_id = %entity.id(), error = %e, "Skipping entity in admin status report");
                None
            }
        });
    generate(
        report_context(common_kind(entities), ReportChannel::AdminStatus),
        items,
        clock.now(),
    )
}

impl<V: Display> Display for StatusReport<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} entities", self.count)?;
        for (i, entry) in self.entries.iter().enumerate() {
            let separator = if i == 0 { "; " } else { ", " };
            write!(
                f,
                "{}{}: {} ({:.2})",
                separator, entry.value, entry.count, entry.percentage
            )?;
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct EntryBody {
    count: usize,
    percentage: f64,
}

struct Entries<'a, V>(&'a [StatusReportEntry<V>]);

impl<V: Display> Serialize for Entries<'_, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for entry in self.0 {
            map.serialize_entry(
                &entry.value.to_string(),
                &EntryBody {
                    count: entry.count,
                    percentage: entry.percentage,
                },
            )?;
        }
        map.end()
    }
}

impl<V: Display> Serialize for StatusReport<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry("@context", &self.context)?;
        map.serialize_entry("count", &self.count)?;
        map.serialize_entry("report", &Entries(&self.entries))?;
        map.serialize_entry("timestamp", &self.timestamp.to_rfc3339())?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Entity, TimelineSettings, WriteMode};
    use crate::shared::ManualClock;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn entity(id: &str, clock: &ManualClock) -> SharedEntity<String> {
        Arc::new(Entity::new(
            id.to_string(),
            EntityKind::ChargePoint,
            ChargingStatus::Available,
            AdminStatus::OutOfService,
            TimelineSettings::default(),
            Arc::new(clock.clone()),
        ))
    }

    #[test]
    fn admin_report_uses_current_status_only() {
        let clock = ManualClock::new(t0());
        let e = entity("E", &clock);
        e.set_admin_status_at(AdminStatus::InternalUse, t0() + Duration::seconds(1), WriteMode::Replace)
            .unwrap();
        e.set_admin_status_at(AdminStatus::Operational, t0() + Duration::seconds(2), WriteMode::Replace)
            .unwrap();

        let report = generate_admin_status_report(&[e], &clock);

        assert_eq!(report.count, 1);
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].value, AdminStatus::Operational);
        assert_eq!(report.entries[0].count, 1);
        assert_eq!(report.entries[0].percentage, 100.0);

        let json = report.to_json().unwrap();
        assert_eq!(json["count"], 1);
        assert_eq!(json["report"]["Operational"]["count"], 1);
        assert_eq!(json["report"]["Operational"]["percentage"], 100.0);
        assert_eq!(json["@context"], "urn:charging-network:report:ChargePoint:adminStatus");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn empty_input_is_a_valid_report() {
        let clock = ManualClock::new(t0());
        let report = generate_status_report::<String>(&[], &clock);

        assert_eq!(report.count, 0);
        assert!(report.entries.is_empty());
        assert_eq!(report.to_string(), "0 entities");
        assert_eq!(report.context, "urn:charging-network:report:Entity:status");
    }

    #[test]
    fn duplicates_keep_most_recent_status() {
        let items = vec![
            ("E1", Timestamped::new(t0(), ChargingStatus::Available)),
            ("E1", Timestamped::new(t0() + Duration::seconds(5), ChargingStatus::Charging)),
            ("E1", Timestamped::new(t0() + Duration::seconds(2), ChargingStatus::Faulted)),
            ("E2", Timestamped::new(t0(), ChargingStatus::Available)),
        ];

        let report = generate("ctx", items, t0());

        assert_eq!(report.count, 2);
        assert_eq!(report.entry(&ChargingStatus::Charging).unwrap().count, 1);
        assert_eq!(report.entry(&ChargingStatus::Available).unwrap().count, 1);
        assert!(report.entry(&ChargingStatus::Faulted).is_none());
    }

    #[test]
    fn entries_sorted_and_rendered() {
        let items = vec![
            ("E1", Timestamped::new(t0(), ChargingStatus::Charging)),
            ("E2", Timestamped::new(t0(), ChargingStatus::Faulted)),
            ("E3", Timestamped::new(t0(), ChargingStatus::Charging)),
            ("E4", Timestamped::new(t0(), ChargingStatus::Available)),
        ];

        let report = generate("ctx", items, t0());
        let order: Vec<_> = report.entries.iter().map(|e| e.value).collect();

        assert_eq!(
            order,
            vec![
                ChargingStatus::Charging,
                ChargingStatus::Available,
                ChargingStatus::Faulted
            ]
        );
        assert_eq!(
            report.to_string(),
            "4 entities; Charging: 2 (50.00), Available: 1 (25.00), Faulted: 1 (25.00)"
        );
    }

    #[test]
    fn percentages_round_to_two_decimals() {
        let items = vec![
            ("E1", Timestamped::new(t0(), ChargingStatus::Charging)),
            ("E2", Timestamped::new(t0(), ChargingStatus::Charging)),
            ("E3", Timestamped::new(t0(), ChargingStatus::Available)),
        ];

        let report = generate("ctx", items, t0());
        assert_eq!(report.entries[0].percentage, 66.67);
        assert_eq!(report.entries[1].percentage, 33.33);
    }
}
