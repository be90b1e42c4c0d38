//! Charging network registry
//!
//! Owns every entity by key and the containment hierarchy between them.
//! Containment is a forest: a child has at most one parent, and moving it
//! means detaching it first.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::application::aggregation::{AggregationFn, AggregationTree};
use crate::application::events::{SharedEventBus, StatusEventForwarder};
use crate::application::reports::{
    generate_admin_status_report, generate_status_report, StatusReport,
};
use crate::domain::{
    AdminStatus, ChargingStatus, Entity, EntityKey, EntityKind, SharedEntity, TimelineSettings,
};
use crate::shared::{DomainError, DomainResult, SharedClock};

pub struct ChargingNetwork<K: EntityKey> {
    entities: DashMap<K, SharedEntity<K>>,
    /// child → parent
    parents: Mutex<BTreeMap<K, K>>,
    tree: AggregationTree<K>,
    settings: TimelineSettings,
    clock: SharedClock,
    event_bus: Option<SharedEventBus>,
}

/// Shared network type
pub type SharedChargingNetwork<K> = Arc<ChargingNetwork<K>>;

impl<K: EntityKey> ChargingNetwork<K> {
    /// Empty network; every entity added later uses `settings`.
    pub fn new(settings: TimelineSettings, clock: SharedClock) -> Self {
        Self {
            entities: DashMap::new(),
            parents: Mutex::new(BTreeMap::new()),
            tree: AggregationTree::new(clock.clone()),
            settings,
            clock,
            event_bus: None,
        }
    }

    /// Forward status changes of every entity added from now on to `bus`.
    pub fn with_event_bus(mut self, bus: SharedEventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Wrap in an `Arc` for sharing across tasks.
    pub fn shared(self) -> SharedChargingNetwork<K> {
        Arc::new(self)
    }

    // ── Entities ───────────────────────────────────────────────

    /// Create and register an entity. Fails with `Conflict` if `id` is taken.
    pub fn add_entity(
        &self,
        id: K,
        kind: EntityKind,
        status: ChargingStatus,
        admin_status: AdminStatus,
    ) -> DomainResult<SharedEntity<K>> {
        match self.entities.entry(id.clone()) {
            Entry::Occupied(_) => {
                warn!(entity_id = %id, "Entity already registered");
                Err(DomainError::Conflict(format!("Entity {}", id)))
            }
            Entry::Vacant(vacant) => {
                let entity = Arc::new(Entity::new(
                    id,
                    kind,
                    status,
                    admin_status,
                    self.settings,
                    self.clock.clone(),
                ));
                if let Some(bus) = &self.event_bus {
                    StatusEventForwarder::attach(bus, &entity);
                }
                info!(entity_id = %entity.id(), %kind, %status, %admin_status, "Entity added");
                vacant.insert(entity.clone());
                Ok(entity)
            }
        }
    }

    /// Like [`Self::get`] but fails with `NotFound`.
    pub fn entity(&self, id: &K) -> DomainResult<SharedEntity<K>> {
        self.get(id).ok_or_else(|| DomainError::entity_not_found(id))
    }

    pub fn get(&self, id: &K) -> Option<SharedEntity<K>> {
        self.entities.get(id).map(|e| e.value().clone())
    }

    pub fn contains(&self, id: &K) -> bool {
        self.entities.contains_key(id)
    }

    /// All entities of `kind`, ordered by id.
    pub fn entities_of_kind(&self, kind: EntityKind) -> Vec<SharedEntity<K>> {
        let mut entities: Vec<_> = self
            .entities
            .iter()
            .filter(|e| e.kind() == kind)
            .map(|e| e.value().clone())
            .collect();
        entities.sort_by(|a, b| a.id().cmp(b.id()));
        entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    // ── Containment ────────────────────────────────────────────

    /// Place `child` below `parent`.
    ///
    /// Fails with `Conflict` if `child` already has another parent and with
    /// `Cycle` if `parent` sits below `child`. Re-attaching to the same
    /// parent only recomputes it. Any other error is raised by the
    /// recomputation and the edge stays.
    pub fn attach(&self, parent: &K, child: &K) -> DomainResult<()> {
        let parent_entity = self.entity(parent)?;
        let child_entity = self.entity(child)?;

        let reserved = {
            let mut parents = self.parents.lock();
            match parents.get(child) {
                Some(current) if current != parent => {
                    warn!(%parent, %child, current_parent = %current, "Child already attached elsewhere");
                    return Err(DomainError::Conflict(format!(
                        "{} is already attached below {}",
                        child, current
                    )));
                }
                Some(_) => false,
                None => {
                    parents.insert(child.clone(), parent.clone());
                    true
                }
            }
        };

        let result = self.tree.attach(&parent_entity, &child_entity);
        // only a cycle is rejected before the edge exists; any later error
        // comes from recomputing and leaves the edge in place
        if reserved && matches!(result, Err(DomainError::Cycle { .. })) {
            self.parents.lock().remove(child);
        }
        result
    }

    /// Returns `Ok(false)` if `child` was not attached below `parent`.
    pub fn detach(&self, parent: &K, child: &K) -> DomainResult<bool> {
        let parent_entity = self.entity(parent)?;
        let child_entity = self.entity(child)?;

        {
            let mut parents = self.parents.lock();
            if parents.get(child) != Some(parent) {
                debug!(%parent, %child, "Detach of unknown edge");
                return Ok(false);
            }
            parents.remove(child);
        }

        self.tree.detach(&parent_entity, &child_entity)
    }

    /// Direct children of `parent`, ordered by id.
    pub fn children_of(&self, parent: &K) -> Vec<K> {
        self.tree.children_of(parent)
    }

    /// The single parent of `child`, if attached.
    pub fn parent_of(&self, child: &K) -> Option<K> {
        self.parents.lock().get(child).cloned()
    }

    /// Replace the majority vote on `parent`'s status and recompute it.
    pub fn set_status_aggregator(
        &self,
        parent: &K,
        function: AggregationFn<K, ChargingStatus>,
    ) -> DomainResult<()> {
        let parent = self.entity(parent)?;
        self.tree.set_status_aggregator(&parent, function)
    }

    /// Admin status counterpart of [`Self::set_status_aggregator`].
    pub fn set_admin_status_aggregator(
        &self,
        parent: &K,
        function: AggregationFn<K, AdminStatus>,
    ) -> DomainResult<()> {
        let parent = self.entity(parent)?;
        self.tree.set_admin_status_aggregator(&parent, function)
    }

    // ── Reports ────────────────────────────────────────────────

    /// Status distribution over every entity of `kind`.
    pub fn status_report(&self, kind: EntityKind) -> StatusReport<ChargingStatus> {
        generate_status_report(&self.entities_of_kind(kind), self.clock.as_ref())
    }

    pub fn admin_status_report(&self, kind: EntityKind) -> StatusReport<AdminStatus> {
        generate_admin_status_report(&self.entities_of_kind(kind), self.clock.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::{create_event_bus, Event};
    use crate::domain::{StatusChange, WriteMode};
    use crate::shared::ManualClock;
    use chrono::{Duration, TimeZone, Utc};

    struct Fixture {
        clock: ManualClock,
        network: ChargingNetwork<String>,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
            let network = ChargingNetwork::new(TimelineSettings::default(), Arc::new(clock.clone()));
            Self { clock, network }
        }

        fn add(&self, id: &str, kind: EntityKind) -> SharedEntity<String> {
            self.network
                .add_entity(id.to_string(), kind, ChargingStatus::Available, AdminStatus::Operational)
                .unwrap()
        }

        fn tick(&self) {
            self.clock.advance(Duration::seconds(1));
        }
    }

    fn id(s: &str) -> String {
        s.to_string()
    }

    #[test]
    fn duplicate_ids_conflict() {
        let f = Fixture::new();
        f.add("CP1", EntityKind::ChargePoint);

        let err = f
            .network
            .add_entity(id("CP1"), EntityKind::Station, ChargingStatus::Unknown, AdminStatus::Unknown)
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(f.network.len(), 1);
    }

    #[test]
    fn unknown_entity_is_not_found() {
        let f = Fixture::new();
        f.add("ST1", EntityKind::Station);

        let err = f.network.attach(&id("ST1"), &id("CP9")).unwrap_err();
        assert_eq!(err, DomainError::entity_not_found("CP9"));
    }

    #[test]
    fn statuses_roll_up_to_the_site() {
        let f = Fixture::new();
        f.add("SITE", EntityKind::Site);
        f.add("ST1", EntityKind::Station);
        f.add("ST2", EntityKind::Station);
        let cps: Vec<_> = ["CP1", "CP2", "CP3"]
            .iter()
            .map(|cp| f.add(cp, EntityKind::ChargePoint))
            .collect();

        f.network.attach(&id("SITE"), &id("ST1")).unwrap();
        f.network.attach(&id("SITE"), &id("ST2")).unwrap();
        f.network.attach(&id("ST1"), &id("CP1")).unwrap();
        f.network.attach(&id("ST1"), &id("CP2")).unwrap();
        f.network.attach(&id("ST2"), &id("CP3")).unwrap();

        f.tick();
        for cp in &cps {
            cp.set_status(ChargingStatus::Charging, WriteMode::Replace).unwrap();
        }

        let site = f.network.entity(&id("SITE")).unwrap();
        assert_eq!(site.current_status().unwrap().value, ChargingStatus::Charging);
        assert_eq!(f.network.children_of(&id("ST1")), vec![id("CP1"), id("CP2")]);
        assert_eq!(f.network.parent_of(&id("CP3")), Some(id("ST2")));
        assert_eq!(f.network.parent_of(&id("SITE")), None);
    }

    #[test]
    fn child_has_at_most_one_parent() {
        let f = Fixture::new();
        f.add("ST1", EntityKind::Station);
        f.add("ST2", EntityKind::Station);
        f.add("CP1", EntityKind::ChargePoint);

        f.network.attach(&id("ST1"), &id("CP1")).unwrap();
        // same edge again is fine
        f.network.attach(&id("ST1"), &id("CP1")).unwrap();

        let err = f.network.attach(&id("ST2"), &id("CP1")).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        assert!(f.network.detach(&id("ST1"), &id("CP1")).unwrap());
        assert!(!f.network.detach(&id("ST1"), &id("CP1")).unwrap());
        f.network.attach(&id("ST2"), &id("CP1")).unwrap();
        assert_eq!(f.network.parent_of(&id("CP1")), Some(id("ST2")));
    }

    #[test]
    fn rejected_cycle_leaves_no_parent() {
        let f = Fixture::new();
        f.add("A", EntityKind::Site);
        f.add("B", EntityKind::Station);

        f.network.attach(&id("A"), &id("B")).unwrap();
        let err = f.network.attach(&id("B"), &id("A")).unwrap_err();

        assert!(matches!(err, DomainError::Cycle { .. }));
        assert_eq!(f.network.parent_of(&id("A")), None);
    }

    #[test]
    fn failing_parent_listener_keeps_the_edge() {
        let f = Fixture::new();
        let st1 = f
            .network
            .add_entity(id("ST1"), EntityKind::Station, ChargingStatus::Unknown, AdminStatus::Operational)
            .unwrap();
        f.add("ST2", EntityKind::Station);
        let cp1 = f.add("CP1", EntityKind::ChargePoint);
        f.tick();
        cp1.set_status(ChargingStatus::Charging, WriteMode::Replace).unwrap();
        st1.status_channel().subscribe(Arc::new(
            |_: &StatusChange<String, ChargingStatus>| -> DomainResult<()> {
                Err(DomainError::Data("listener rejected".to_string()))
            },
        ));

        let err = f.network.attach(&id("ST1"), &id("CP1")).unwrap_err();
        assert_eq!(err, DomainError::Data("listener rejected".to_string()));
        assert_eq!(st1.current_status().unwrap().value, ChargingStatus::Charging);
        assert_eq!(f.network.parent_of(&id("CP1")), Some(id("ST1")));
        assert_eq!(f.network.children_of(&id("ST1")), vec![id("CP1")]);

        let err = f.network.attach(&id("ST2"), &id("CP1")).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert!(f.network.children_of(&id("ST2")).is_empty());
    }

    #[test]
    fn reports_by_kind() {
        let f = Fixture::new();
        f.add("ST1", EntityKind::Station);
        let cp1 = f.add("CP1", EntityKind::ChargePoint);
        f.add("CP2", EntityKind::ChargePoint);

        f.tick();
        cp1.set_status(ChargingStatus::Faulted, WriteMode::Replace).unwrap();
        cp1.set_admin_status(AdminStatus::OutOfService, WriteMode::Replace)
            .unwrap();

        let report = f.network.status_report(EntityKind::ChargePoint);
        assert_eq!(report.count, 2);
        assert_eq!(report.context, "urn:charging-network:report:ChargePoint:status");
        assert_eq!(report.entry(&ChargingStatus::Faulted).unwrap().percentage, 50.0);

        let admin = f.network.admin_status_report(EntityKind::ChargePoint);
        assert_eq!(admin.entry(&AdminStatus::OutOfService).unwrap().count, 1);

        let ids: Vec<_> = f
            .network
            .entities_of_kind(EntityKind::ChargePoint)
            .iter()
            .map(|e| e.id().clone())
            .collect();
        assert_eq!(ids, vec![id("CP1"), id("CP2")]);
    }

    #[test]
    fn custom_aggregator_replaces_majority() {
        let f = Fixture::new();
        let station = f.add("ST1", EntityKind::Station);
        f.add("CP1", EntityKind::ChargePoint);
        let cp2 = f.add("CP2", EntityKind::ChargePoint);
        f.network.attach(&id("ST1"), &id("CP1")).unwrap();
        f.network.attach(&id("ST1"), &id("CP2")).unwrap();

        // any faulted charge point faults the station
        f.network
            .set_status_aggregator(
                &id("ST1"),
                Arc::new(|children: &BTreeMap<String, ChargingStatus>| -> Result<ChargingStatus, String> {
                    Ok(if children.values().any(|s| *s == ChargingStatus::Faulted) {
                        ChargingStatus::Faulted
                    } else {
                        ChargingStatus::Available
                    })
                }),
            )
            .unwrap();

        f.tick();
        cp2.set_status(ChargingStatus::Faulted, WriteMode::Replace).unwrap();
        assert_eq!(station.current_status().unwrap().value, ChargingStatus::Faulted);
    }

    #[test]
    fn status_changes_reach_the_event_bus() {
        let clock = ManualClock::new(Utc::now());
        let bus = create_event_bus(16);
        let mut subscriber = bus.subscribe();
        let network: ChargingNetwork<String> =
            ChargingNetwork::new(TimelineSettings::default(), Arc::new(clock.clone()))
                .with_event_bus(bus.clone());
        let cp = network
            .add_entity(id("CP1"), EntityKind::ChargePoint, ChargingStatus::Available, AdminStatus::Operational)
            .unwrap();

        clock.advance(Duration::seconds(1));
        cp.set_status(ChargingStatus::Preparing, WriteMode::Replace).unwrap();

        let message = subscriber.try_recv().expect("status event");
        assert!(matches!(message.event, Event::EntityStatusChanged(_)));
        assert_eq!(message.event.entity_id(), Some("CP1"));
    }
}
